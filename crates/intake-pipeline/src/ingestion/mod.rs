//! Source text preparation: windowing, deduplication and page-to-text conversion

mod chunker;
pub mod text;

pub use chunker::{dedup_items, TextChunker};
