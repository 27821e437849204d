//! Core types for the intake pipeline

pub mod document;
pub mod item;
pub mod report;
pub mod row;

pub use document::{DocumentKind, SourceDocument};
pub use item::{ClassifiedItem, ExtractedItem, Taxonomy};
pub use report::{SkipRecord, WorkflowReport};
pub use row::{Column, RowSchema, Workflow, NOT_AVAILABLE};
