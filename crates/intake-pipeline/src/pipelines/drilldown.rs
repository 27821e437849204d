//! Drilldown: interview transcript documents to Q&A rows, several rows at a time

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::stages::extract_and_classify;
use super::{processed_at, run_items, ItemSlot, PipelineContext, PipelineServices, WorkflowOptions};
use crate::error::{Error, Result};
use crate::generation::{ClassifyContext, ExtractionMode};
use crate::processing::{JobControl, JobHandle};
use crate::types::{Column, Workflow};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrilldownRow {
    pub candidate_name: String,
    pub round: String,
    pub transcript_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrilldownRequest {
    #[serde(flatten)]
    pub options: WorkflowOptions,
    pub rows: Vec<DrilldownRow>,
}

impl DrilldownRequest {
    pub fn validate(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::InvalidInput("No drilldown rows provided".to_string()));
        }
        if let Some(i) = self
            .rows
            .iter()
            .position(|r| r.transcript_link.trim().is_empty())
        {
            return Err(Error::InvalidInput(format!(
                "Row {} has no transcript link",
                i + 1
            )));
        }
        Ok(())
    }
}

pub async fn run(
    services: Arc<PipelineServices>,
    request: DrilldownRequest,
    handle: JobHandle,
) -> Result<serde_json::Value> {
    let control = handle.control().clone();
    let ctx = PipelineContext::prepare(&services, Workflow::Drilldown, &request.options, handle.id()).await?;
    ctx.ensure_header(&control).await?;

    let classify = ClassifyContext {
        product: ctx.product.clone(),
        ..Default::default()
    };
    let workers = services.config.drilldown.workers;
    tracing::info!("Drilldown over {} rows with {} worker(s)", request.rows.len(), workers);

    let report = run_items(
        &ctx,
        &handle,
        &request.rows,
        workers,
        |index, row| format!("row {} ({}, {})", index + 1, row.candidate_name, row.round),
        |slot| process_row(&ctx, &classify, &request.rows[slot.index], slot, &control),
    )
    .await?;

    ctx.finish(report).await
}

async fn process_row(
    ctx: &PipelineContext,
    classify: &ClassifyContext,
    row: &DrilldownRow,
    slot: ItemSlot,
    control: &JobControl,
) -> Result<Vec<Vec<String>>> {
    let link = row.transcript_link.trim();
    let transcript = control.guard(ctx.fetcher.fetch_text(link, control)).await?;
    tokio::fs::write(slot.work_dir.join("transcript.txt"), &transcript).await?;

    // each worker keeps its own credential
    let client = ctx.client.pinned(slot.worker);
    let items = extract_and_classify(
        ctx,
        &client,
        &transcript,
        ExtractionMode::Interview,
        classify,
        control,
    )
    .await?;

    let schema = Workflow::Drilldown.schema();
    let processed = processed_at();
    Ok(items
        .iter()
        .map(|item| {
            schema
                .row()
                .set_str(Column::CandidateName, &row.candidate_name)
                .set_str(Column::InterviewRound, &row.round)
                .set_str(Column::TranscriptLink, link)
                .set_str(Column::Product, &ctx.product)
                .item(item)
                .set_str(Column::ProcessedAt, &processed)
                .build()
        })
        .collect())
}
