//! Workflow start endpoints
//!
//! Every handler validates its input, registers a job and returns its id at once.
//! Multipart forms carry a `metadata` JSON field next to the uploaded files.

use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pipelines::assessment::{
    self, AssessmentFilesRequest, AssessmentMetadata, AssessmentZipRequest, UploadedDocument,
};
use crate::pipelines::assignment::{self, AssignmentRequest};
use crate::pipelines::drilldown::{self, DrilldownRequest};
use crate::pipelines::interview::{self, InterviewRequest};
use crate::pipelines::stages::safe_file_name;
use crate::pipelines::upload::{self, UploadMetadata, UploadRequest, UploadedVideo};
use crate::pipelines::StagingDir;
use crate::server::state::AppState;
use crate::types::Workflow;

const METADATA_FIELD: &str = "metadata";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub job_id: Uuid,
}

fn multipart_error(e: impl std::fmt::Display) -> Error {
    Error::InvalidInput(format!("Failed to read multipart field: {}", e))
}

async fn read_metadata<T: DeserializeOwned>(field: Field<'_>) -> Result<T> {
    let data = field.bytes().await.map_err(multipart_error)?;
    serde_json::from_slice(&data)
        .map_err(|e| Error::InvalidInput(format!("Invalid metadata: {}", e)))
}

fn field_filename(field: &Field<'_>) -> Option<String> {
    field
        .file_name()
        .map(str::to_string)
        .filter(|name| !name.trim().is_empty())
}

/// POST /api/interviews/analyze
pub async fn analyze_interviews(
    State(state): State<AppState>,
    Json(request): Json<InterviewRequest>,
) -> Result<Json<StartResponse>> {
    request.validate()?;
    let services = state.services();
    let job = state
        .jobs()
        .create_job(Workflow::Interview.as_str(), move |handle| {
            interview::run(services, request, handle)
        });
    Ok(Json(StartResponse { job_id: job.id }))
}

/// POST /api/drilldown
pub async fn start_drilldown(
    State(state): State<AppState>,
    Json(request): Json<DrilldownRequest>,
) -> Result<Json<StartResponse>> {
    request.validate()?;
    let services = state.services();
    let job = state
        .jobs()
        .create_job(Workflow::Drilldown.as_str(), move |handle| {
            drilldown::run(services, request, handle)
        });
    Ok(Json(StartResponse { job_id: job.id }))
}

/// POST /api/assignments
pub async fn start_assignments(
    State(state): State<AppState>,
    Json(request): Json<AssignmentRequest>,
) -> Result<Json<StartResponse>> {
    request.validate()?;
    let services = state.services();
    let job = state
        .jobs()
        .create_job(Workflow::Assignment.as_str(), move |handle| {
            assignment::run(services, request, handle)
        });
    Ok(Json(StartResponse { job_id: job.id }))
}

/// Stream one uploaded video to disk
async fn save_video(mut field: Field<'_>, dest: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

async fn read_upload_form(
    multipart: &mut Multipart,
    upload_dir: &Path,
) -> Result<(Option<UploadMetadata>, Vec<UploadedVideo>)> {
    let mut metadata = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(METADATA_FIELD) {
            metadata = Some(read_metadata(field).await?);
            continue;
        }
        let Some(filename) = field_filename(&field) else {
            continue;
        };

        let path = upload_dir.join(format!("{:02}-{}", files.len() + 1, safe_file_name(&filename)));
        let size = save_video(field, &path).await?;
        tracing::info!("Received upload {} ({} bytes)", filename, size);
        files.push(UploadedVideo { filename, path });
    }
    Ok((metadata, files))
}

/// POST /api/interviews/upload
pub async fn upload_interviews(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<StartResponse>> {
    let upload_dir: PathBuf = state
        .config()
        .media
        .work_dir
        .join("uploads")
        .join(Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&upload_dir).await?;

    let request = match read_upload_form(&mut multipart, &upload_dir).await {
        Ok((Some(metadata), files)) => UploadRequest {
            metadata,
            files,
            upload_dir: upload_dir.clone(),
        },
        Ok((None, _)) => {
            StagingDir::remove_dir(&upload_dir).await;
            return Err(Error::InvalidInput("metadata field is required".to_string()));
        }
        Err(e) => {
            StagingDir::remove_dir(&upload_dir).await;
            return Err(e);
        }
    };
    if let Err(e) = request.validate() {
        StagingDir::remove_dir(&upload_dir).await;
        return Err(e);
    }

    let services = state.services();
    let job = state.jobs().create_job_with_cleanup(
        Workflow::Upload.as_str(),
        move |handle| upload::run(services, request, handle),
        move || async move { StagingDir::remove_dir(&upload_dir).await },
    );
    Ok(Json(StartResponse { job_id: job.id }))
}

async fn read_document_form(
    multipart: &mut Multipart,
) -> Result<(AssessmentMetadata, Vec<UploadedDocument>)> {
    let mut metadata = AssessmentMetadata::default();
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(METADATA_FIELD) {
            metadata = read_metadata(field).await?;
            continue;
        }
        let Some(filename) = field_filename(&field) else {
            continue;
        };
        let data = field.bytes().await.map_err(multipart_error)?;
        tracing::info!("Received {} ({} bytes)", filename, data.len());
        files.push(UploadedDocument { filename, data });
    }
    Ok((metadata, files))
}

/// POST /api/assessments/zip
pub async fn assessments_zip(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<StartResponse>> {
    let (metadata, mut files) = read_document_form(&mut multipart).await?;
    if files.len() != 1 {
        return Err(Error::InvalidInput(format!(
            "Expected exactly one zip file, got {}",
            files.len()
        )));
    }
    let archive = files.remove(0);
    if !archive.filename.to_lowercase().ends_with(".zip") {
        return Err(Error::InvalidInput(format!(
            "{} is not a zip archive",
            archive.filename
        )));
    }

    let request = AssessmentZipRequest { metadata, archive };
    let services = state.services();
    let job = state
        .jobs()
        .create_job(Workflow::AssessmentZip.as_str(), move |handle| {
            assessment::run_zip(services, request, handle)
        });
    Ok(Json(StartResponse { job_id: job.id }))
}

/// POST /api/assessments/individual
pub async fn assessments_individual(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<StartResponse>> {
    let (metadata, files) = read_document_form(&mut multipart).await?;
    if files.is_empty() {
        return Err(Error::InvalidInput("No documents uploaded".to_string()));
    }

    let request = AssessmentFilesRequest { metadata, files };
    let services = state.services();
    let job = state
        .jobs()
        .create_job(Workflow::AssessmentIndividual.as_str(), move |handle| {
            assessment::run_individual(services, request, handle)
        });
    Ok(Json(StartResponse { job_id: job.id }))
}
