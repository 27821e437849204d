//! Assignment links: assignment pages to question-only rows

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
pub struct AssignmentRow {
    pub assignment_name: String,
    pub link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    #[serde(flatten)]
    pub options: WorkflowOptions,
    /// Reference syllabus for curriculum coverage
    #[serde(default)]
    pub syllabus: Option<String>,
    pub rows: Vec<AssignmentRow>,
}

impl AssignmentRequest {
    pub fn validate(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::InvalidInput("No assignment rows provided".to_string()));
        }
        if let Some(i) = self.rows.iter().position(|r| r.link.trim().is_empty()) {
            return Err(Error::InvalidInput(format!("Row {} has no link", i + 1)));
        }
        Ok(())
    }
}

pub async fn run(
    services: Arc<PipelineServices>,
    request: AssignmentRequest,
    handle: JobHandle,
) -> Result<serde_json::Value> {
    let control = handle.control().clone();
    let ctx = PipelineContext::prepare(&services, Workflow::Assignment, &request.options, handle.id()).await?;
    ctx.ensure_header(&control).await?;

    let classify = ClassifyContext {
        product: ctx.product.clone(),
        syllabus: request.syllabus.clone(),
        with_coverage: true,
    };

    let report = run_items(
        &ctx,
        &handle,
        &request.rows,
        1,
        |index, row| format!("row {} ({})", index + 1, row.assignment_name),
        |slot| process_row(&ctx, &classify, &request.rows[slot.index], slot, &control),
    )
    .await?;

    ctx.finish(report).await
}

async fn process_row(
    ctx: &PipelineContext,
    classify: &ClassifyContext,
    row: &AssignmentRow,
    slot: ItemSlot,
    control: &JobControl,
) -> Result<Vec<Vec<String>>> {
    let link = row.link.trim();
    let text = control.guard(ctx.fetcher.fetch_text(link, control)).await?;
    tokio::fs::write(slot.work_dir.join("assignment.txt"), &text).await?;

    let items = extract_and_classify(
        ctx,
        &ctx.client,
        &text,
        ExtractionMode::QuestionsOnly,
        classify,
        control,
    )
    .await?;

    let schema = Workflow::Assignment.schema();
    let processed = processed_at();
    Ok(items
        .iter()
        .map(|item| {
            schema
                .row()
                .set_str(Column::AssignmentName, &row.assignment_name)
                .set_str(Column::AssignmentLink, link)
                .set_str(Column::Product, &ctx.product)
                .item(item)
                .set_str(Column::ProcessedAt, &processed)
                .build()
        })
        .collect())
}
