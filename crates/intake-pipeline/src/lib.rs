//! intake-pipeline: asynchronous question extraction for recruiting content
//!
//! Interview recordings, transcript documents, assessment files and assignment
//! pages are turned into deduplicated, classified question rows and appended to a
//! spreadsheet. Every run is a background job that can be polled and cancelled
//! over HTTP.

pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod media;
pub mod pipelines;
pub mod processing;
pub mod providers;
pub mod server;
pub mod types;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use pipelines::PipelineServices;
pub use processing::{JobHandle, JobManager, JobSnapshot, JobState, JobStore};
pub use server::IntakeServer;
pub use types::{ClassifiedItem, ExtractedItem, Workflow, WorkflowReport};
