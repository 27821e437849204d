//! Local video upload: uploaded recordings to interview Q&A rows

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::interview::round_unit;
use super::stages::{extract_and_classify, transcribe_video, validate_video};
use super::{
    processed_at, run_items, ItemSlot, PipelineContext, PipelineServices, StagingDir,
    WorkflowOptions,
};
use crate::error::{Error, Result};
use crate::generation::{ClassifyContext, ExtractionMode};
use crate::media::{self, AudioWindow};
use crate::processing::{JobControl, JobHandle};
use crate::types::{Column, Workflow};

/// `metadata` field of the upload form
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    #[serde(flatten)]
    pub options: WorkflowOptions,
    pub candidate_name: String,
    pub round: String,
}

/// A video already streamed to disk by the HTTP layer
#[derive(Debug, Clone)]
pub struct UploadedVideo {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub metadata: UploadMetadata,
    pub files: Vec<UploadedVideo>,
    /// Directory holding `files`, removed once every file was written out
    pub upload_dir: PathBuf,
}

impl UploadRequest {
    pub fn validate(&self) -> Result<()> {
        if self.metadata.candidate_name.trim().is_empty() {
            return Err(Error::InvalidInput("candidateName is required".to_string()));
        }
        if self.files.is_empty() {
            return Err(Error::InvalidInput("No video files uploaded".to_string()));
        }
        Ok(())
    }
}

pub async fn run(
    services: Arc<PipelineServices>,
    request: UploadRequest,
    handle: JobHandle,
) -> Result<serde_json::Value> {
    let control = handle.control().clone();

    let media = services.media.clone();
    control.guard(media::blocking(move || media.check_available())).await?;

    let ctx = PipelineContext::prepare(
        &services,
        Workflow::Upload,
        &request.metadata.options,
        handle.id(),
    )
    .await?;
    ctx.ensure_header(&control).await?;

    let classify = ClassifyContext {
        product: ctx.product.clone(),
        ..Default::default()
    };

    let report = run_items(
        &ctx,
        &handle,
        &request.files,
        1,
        |_, file| file.filename.clone(),
        |slot| process_file(&ctx, &classify, &request, slot, &control),
    )
    .await?;

    let clean = report.skipped.is_empty();
    let result = ctx.finish(report).await?;
    if clean {
        StagingDir::remove_dir(&request.upload_dir).await;
    }
    Ok(result)
}

async fn process_file(
    ctx: &PipelineContext,
    classify: &ClassifyContext,
    request: &UploadRequest,
    slot: ItemSlot,
    control: &JobControl,
) -> Result<Vec<Vec<String>>> {
    let file = &request.files[slot.index];
    let metadata = &request.metadata;

    // uploads have no second source to fall back to
    let duration = validate_video(ctx, &file.path, control).await?;
    tracing::info!("Upload {} is {:.0}s", file.filename, duration);

    let client = ctx.client.pinned(round_unit(&metadata.round, 0));
    let transcript = transcribe_video(
        ctx,
        &client,
        &file.path,
        AudioWindow::default(),
        &slot.work_dir,
        control,
    )
    .await?;

    let items = extract_and_classify(
        ctx,
        &client,
        &transcript,
        ExtractionMode::Interview,
        classify,
        control,
    )
    .await?;

    let schema = Workflow::Upload.schema();
    let processed = processed_at();
    Ok(items
        .iter()
        .map(|item| {
            schema
                .row()
                .set_str(Column::CandidateName, &metadata.candidate_name)
                .set_str(Column::InterviewRound, &metadata.round)
                .set_str(Column::FileName, &file.filename)
                .set_str(Column::Product, &ctx.product)
                .item(item)
                .set_str(Column::ProcessedAt, &processed)
                .build()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_parses_flattened_options() {
        let metadata: UploadMetadata = serde_json::from_str(
            r#"{"product": "Go", "provider": "openai", "candidateName": "Lin", "round": "2"}"#,
        )
        .unwrap();
        assert_eq!(metadata.options.product, "Go");
        assert_eq!(metadata.round, "2");

        let request = UploadRequest {
            metadata,
            files: Vec::new(),
            upload_dir: PathBuf::from("/tmp/none"),
        };
        assert!(matches!(request.validate(), Err(Error::InvalidInput(_))));
    }
}
