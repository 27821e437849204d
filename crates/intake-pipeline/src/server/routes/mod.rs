//! API routes for the intake server

pub mod jobs;
pub mod workflows;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Job control
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        // JSON workflows
        .route("/interviews/analyze", post(workflows::analyze_interviews))
        .route("/drilldown", post(workflows::start_drilldown))
        .route("/assignments", post(workflows::start_assignments))
        // Multipart workflows with a larger body limit
        .route(
            "/interviews/upload",
            post(workflows::upload_interviews).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route(
            "/assessments/zip",
            post(workflows::assessments_zip).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route(
            "/assessments/individual",
            post(workflows::assessments_individual)
                .layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "intake-pipeline",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Question extraction from interviews, assessments and assignments into classified sheet rows",
        "endpoints": {
            "POST /api/interviews/analyze": "Analyze interview recordings from links",
            "POST /api/interviews/upload": "Analyze uploaded interview videos (multipart)",
            "POST /api/drilldown": "Extract Q&A from interview transcript documents",
            "POST /api/assessments/zip": "Extract questions from a zip of documents (multipart)",
            "POST /api/assessments/individual": "Extract questions from uploaded documents (multipart)",
            "POST /api/assignments": "Extract questions from assignment links",
            "GET /api/jobs": "List jobs",
            "GET /api/jobs/:id": "Poll a job",
            "POST /api/jobs/:id/cancel": "Cancel a job"
        },
        "workflows": [
            "interview",
            "upload",
            "drilldown",
            "assessment_zip",
            "assessment_individual",
            "assignment"
        ]
    }))
}
