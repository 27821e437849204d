//! Error types for the intake pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single outbound provider call (chat, OCR, transcription)
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Non-success HTTP status
    #[error("provider returned {status}: {body}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },

    /// Request exceeded its deadline
    #[error("provider request timed out")]
    Timeout,

    /// Connection-level failure
    #[error("provider transport error: {0}")]
    Transport(String),

    /// Response arrived but could not be decoded
    #[error("provider response could not be decoded: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Status codes worth another attempt
    pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

    /// Whether the retry layer should try again
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => Self::RETRYABLE_STATUSES.contains(status),
            ProviderError::Timeout | ProviderError::Transport(_) => true,
            ProviderError::Decode(_) => false,
        }
    }

    /// Server-requested wait, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Intake pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, endpoint, tool)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider failure after retries were exhausted
    #[error("LLM provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Model output could not be interpreted
    #[error("Unparseable model output: {0}")]
    ModelOutput(String),

    /// Bad media file or failed media tool invocation
    #[error("Media error: {0}")]
    Media(String),

    /// Remote download or text fetch failed
    #[error("Fetch failed for '{link}': {message}")]
    Fetch { link: String, message: String },

    /// Spreadsheet sink failure
    #[error("Sink error: {0}")]
    Sink(String),

    /// Missing or malformed request field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown job or resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// No item in the run produced output rows
    #[error("No rows produced ({skipped} item(s) skipped): {}", reasons.join("; "))]
    NoOutput { skipped: usize, reasons: Vec<String> },

    /// Cooperative cancellation was observed
    #[error("Job cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error outside the provider layer
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Zip archive error
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a fetch error
    pub fn fetch(link: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            link: link.into(),
            message: message.into(),
        }
    }

    /// Create a media error
    pub fn media(message: impl Into<String>) -> Self {
        Self::Media(message.into())
    }

    /// Create a model output error
    pub fn model_output(message: impl Into<String>) -> Self {
        Self::ModelOutput(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::BAD_REQUEST, "config_error"),
            Error::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            Error::ModelOutput(_) => (StatusCode::BAD_GATEWAY, "model_output_error"),
            Error::Media(_) => (StatusCode::UNPROCESSABLE_ENTITY, "media_error"),
            Error::Fetch { .. } => (StatusCode::BAD_GATEWAY, "fetch_error"),
            Error::Sink(_) => (StatusCode::BAD_GATEWAY, "sink_error"),
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::NoOutput { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "no_output"),
            Error::Cancelled => (StatusCode::CONFLICT, "cancelled"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "json_error"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "http_error"),
            Error::Zip(_) => (StatusCode::BAD_REQUEST, "archive_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
