//! Assessments: documents (one zip, or individual uploads) to question rows

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::sync::Arc;

use super::stages::{document_text, extract_and_classify, safe_file_name};
use super::{processed_at, run_items, ItemSlot, PipelineContext, PipelineServices, WorkflowOptions};
use crate::error::{Error, Result};
use crate::generation::{ClassifyContext, ExtractionMode};
use crate::processing::{JobControl, JobHandle};
use crate::types::{Column, DocumentKind, SourceDocument, Workflow};

/// `metadata` field of both assessment forms
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentMetadata {
    #[serde(flatten)]
    pub options: WorkflowOptions,
    /// Defaults to the archive or file name
    #[serde(default)]
    pub assessment_name: Option<String>,
    /// Reference syllabus for curriculum coverage
    #[serde(default)]
    pub syllabus: Option<String>,
}

/// A file received in a multipart form
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub filename: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct AssessmentZipRequest {
    pub metadata: AssessmentMetadata,
    pub archive: UploadedDocument,
}

#[derive(Debug, Clone)]
pub struct AssessmentFilesRequest {
    pub metadata: AssessmentMetadata,
    pub files: Vec<UploadedDocument>,
}

/// One document to process; `document` is `None` for unsupported uploads
struct DocumentItem {
    filename: String,
    assessment: String,
    document: Option<SourceDocument>,
}

fn file_stem(name: &str) -> String {
    let name = safe_file_name(name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// Archive entries that are never treated as documents
fn is_ignored_entry(name: &str) -> bool {
    name.ends_with('/')
        || name
            .split('/')
            .any(|part| part == "__MACOSX" || part.starts_with('.'))
}

/// Supported documents in a zip, in archive order
pub fn read_archive(data: &[u8]) -> Result<Vec<SourceDocument>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let mut documents = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if entry.is_dir() || is_ignored_entry(&name) {
            continue;
        }
        if DocumentKind::from_filename(&name).is_none() {
            tracing::debug!("Ignoring unsupported archive entry {}", name);
            continue;
        }

        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        if let Some(document) = SourceDocument::detect(name, buf) {
            documents.push(document);
        }
    }
    Ok(documents)
}

pub async fn run_zip(
    services: Arc<PipelineServices>,
    request: AssessmentZipRequest,
    handle: JobHandle,
) -> Result<serde_json::Value> {
    let archive = request.archive.data.clone();
    let documents = tokio::task::spawn_blocking(move || read_archive(&archive))
        .await
        .map_err(|e| Error::internal(format!("Archive task failed: {}", e)))??;
    if documents.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{} contains no supported documents",
            request.archive.filename
        )));
    }
    tracing::info!("{}: {} documents", request.archive.filename, documents.len());

    let assessment = request
        .metadata
        .assessment_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| file_stem(&request.archive.filename));
    let items = documents
        .into_iter()
        .map(|document| DocumentItem {
            filename: document.filename.clone(),
            assessment: assessment.clone(),
            document: Some(document),
        })
        .collect();

    run_documents(services, Workflow::AssessmentZip, request.metadata, items, handle).await
}

pub async fn run_individual(
    services: Arc<PipelineServices>,
    request: AssessmentFilesRequest,
    handle: JobHandle,
) -> Result<serde_json::Value> {
    let name = request
        .metadata
        .assessment_name
        .clone()
        .filter(|n| !n.trim().is_empty());
    let items = request
        .files
        .into_iter()
        .map(|file| DocumentItem {
            assessment: name.clone().unwrap_or_else(|| file_stem(&file.filename)),
            document: SourceDocument::detect(file.filename.clone(), file.data.to_vec()),
            filename: file.filename,
        })
        .collect();

    run_documents(
        services,
        Workflow::AssessmentIndividual,
        request.metadata,
        items,
        handle,
    )
    .await
}

async fn run_documents(
    services: Arc<PipelineServices>,
    workflow: Workflow,
    metadata: AssessmentMetadata,
    items: Vec<DocumentItem>,
    handle: JobHandle,
) -> Result<serde_json::Value> {
    let control = handle.control().clone();
    let ctx = PipelineContext::prepare(&services, workflow, &metadata.options, handle.id()).await?;
    ctx.ensure_header(&control).await?;

    let classify = ClassifyContext {
        product: ctx.product.clone(),
        syllabus: metadata.syllabus.clone(),
        with_coverage: true,
    };

    let report = run_items(
        &ctx,
        &handle,
        &items,
        1,
        |_, item| item.filename.clone(),
        |slot| process_document(&ctx, &classify, &items[slot.index], slot, &control),
    )
    .await?;

    ctx.finish(report).await
}

async fn process_document(
    ctx: &PipelineContext,
    classify: &ClassifyContext,
    item: &DocumentItem,
    slot: ItemSlot,
    control: &JobControl,
) -> Result<Vec<Vec<String>>> {
    let document = item.document.as_ref().ok_or_else(|| {
        Error::InvalidInput(format!("{} is not a supported document type", item.filename))
    })?;

    let text = document_text(&ctx.client, document, &slot.work_dir, control).await?;
    let items = extract_and_classify(
        ctx,
        &ctx.client,
        &text,
        ExtractionMode::Document,
        classify,
        control,
    )
    .await?;

    let schema = ctx.workflow.schema();
    let processed = processed_at();
    Ok(items
        .iter()
        .map(|classified| {
            schema
                .row()
                .set_str(Column::AssessmentName, &item.assessment)
                .set_str(Column::FileName, &item.filename)
                .set_str(Column::Product, &ctx.product)
                .item(classified)
                .set_str(Column::ProcessedAt, &processed)
                .build()
        })
        .collect())
}
