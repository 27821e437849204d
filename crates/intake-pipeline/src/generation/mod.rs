//! LLM-backed extraction and classification

pub mod classify;
pub mod extract;
mod output;
pub mod prompt;

pub use classify::{classify_items, merge_classifications, normalize_enum, normalize_value, ClassifyContext};
pub use extract::extract_items;
pub use prompt::{ExtractionMode, PromptBuilder};
