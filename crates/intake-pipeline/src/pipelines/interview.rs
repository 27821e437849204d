//! Interview analyzer: recording links to interview Q&A rows

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::stages::{extract_and_classify, transcribe_video, validate_video};
use super::{processed_at, run_items, ItemSlot, PipelineContext, PipelineServices, WorkflowOptions};
use crate::error::{Error, Result};
use crate::generation::{ClassifyContext, ExtractionMode};
use crate::media::{self, AudioWindow};
use crate::processing::{JobControl, JobHandle};
use crate::types::{Column, Workflow};

/// One candidate recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewRow {
    pub candidate_name: String,
    #[serde(default)]
    pub candidate_email: Option<String>,
    pub round: String,
    pub recording_link: String,
    #[serde(default)]
    pub start_seconds: Option<f64>,
    #[serde(default)]
    pub end_seconds: Option<f64>,
}

impl InterviewRow {
    fn window(&self) -> Result<AudioWindow> {
        AudioWindow::new(self.start_seconds, self.end_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewRequest {
    #[serde(flatten)]
    pub options: WorkflowOptions,
    pub rows: Vec<InterviewRow>,
}

impl InterviewRequest {
    pub fn validate(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::InvalidInput("No interview rows provided".to_string()));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.candidate_name.trim().is_empty() || row.recording_link.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "Row {} needs a candidate name and a recording link",
                    i + 1
                )));
            }
            row.window()
                .map_err(|e| Error::InvalidInput(format!("Row {}: {}", i + 1, e)))?;
        }
        Ok(())
    }
}

/// Credential slot for a round: "Round 2" uses key #2, unnumbered rounds use the row
pub fn round_unit(round: &str, fallback: usize) -> usize {
    let digits: String = round
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse::<usize>()
        .map(|n| n.saturating_sub(1))
        .unwrap_or(fallback)
}

pub async fn run(
    services: Arc<PipelineServices>,
    request: InterviewRequest,
    handle: JobHandle,
) -> Result<serde_json::Value> {
    let control = handle.control().clone();

    let media = services.media.clone();
    control.guard(media::blocking(move || media.check_available())).await?;

    let ctx = PipelineContext::prepare(&services, Workflow::Interview, &request.options, handle.id()).await?;
    ctx.ensure_header(&control).await?;

    let classify = ClassifyContext {
        product: ctx.product.clone(),
        ..Default::default()
    };

    let report = run_items(
        &ctx,
        &handle,
        &request.rows,
        1,
        |index, row| format!("row {} ({}, {})", index + 1, row.candidate_name, row.round),
        |slot| process_row(&ctx, &classify, &request.rows[slot.index], slot, &control),
    )
    .await?;

    ctx.finish(report).await
}

/// Download with the public link, falling back to the Drive API when the file
/// is not a usable video
async fn stage_recording(
    ctx: &PipelineContext,
    link: &str,
    dest: &Path,
    control: &JobControl,
) -> Result<f64> {
    control.guard(ctx.fetcher.download(link, dest, control)).await?;

    match validate_video(ctx, dest, control).await {
        Ok(duration) => Ok(duration),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            tracing::warn!("Downloaded file is not a usable video ({}), retrying via Drive API", e);
            let _ = tokio::fs::remove_file(dest).await;
            control
                .guard(ctx.fetcher.download_authenticated(link, dest, control))
                .await
                .map_err(|fallback| {
                    if fallback.is_cancelled() {
                        fallback
                    } else {
                        Error::media(format!("{}; fallback download failed: {}", e, fallback))
                    }
                })?;
            validate_video(ctx, dest, control).await
        }
    }
}

async fn process_row(
    ctx: &PipelineContext,
    classify: &ClassifyContext,
    row: &InterviewRow,
    slot: ItemSlot,
    control: &JobControl,
) -> Result<Vec<Vec<String>>> {
    let video = slot.work_dir.join("recording.mp4");
    let duration = stage_recording(ctx, row.recording_link.trim(), &video, control).await?;
    tracing::info!("Recording for {} is {:.0}s", row.candidate_name, duration);

    let client = ctx.client.pinned(round_unit(&row.round, slot.index));
    let transcript =
        transcribe_video(ctx, &client, &video, row.window()?, &slot.work_dir, control).await?;

    let items = extract_and_classify(
        ctx,
        &client,
        &transcript,
        ExtractionMode::Interview,
        classify,
        control,
    )
    .await?;

    let schema = Workflow::Interview.schema();
    let processed = processed_at();
    Ok(items
        .iter()
        .map(|item| {
            schema
                .row()
                .set_str(Column::CandidateName, &row.candidate_name)
                .set(Column::CandidateEmail, row.candidate_email.clone())
                .set_str(Column::InterviewRound, &row.round)
                .set_str(Column::RecordingLink, &row.recording_link)
                .set_str(Column::Product, &ctx.product)
                .item(item)
                .set_str(Column::ProcessedAt, &processed)
                .build()
        })
        .collect())
}
