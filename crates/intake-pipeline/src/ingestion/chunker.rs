//! Overlapping text windows for LLM extraction, and first-seen deduplication

use std::collections::HashSet;

use crate::config::ChunkingConfig;
use crate::types::ExtractedItem;

/// Splits long text into overlapping windows
///
/// Sizes are counted in characters, not bytes. A window's end snaps forward to just
/// past the next newline when one falls within `newline_snap` characters of the cut.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Window size in characters
    chunk_size: usize,
    /// Characters shared by consecutive windows
    overlap: usize,
    /// Newline search distance past a cut
    newline_snap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            newline_snap: 200,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            overlap: config.overlap,
            newline_snap: config.newline_snap,
        }
    }

    /// Cursor advance per window; always at least one character
    fn step(&self) -> usize {
        let size = self.chunk_size.max(1);
        if self.overlap >= size {
            tracing::warn!(
                "Chunk overlap {} >= chunk size {}, ignoring overlap",
                self.overlap,
                size
            );
            size
        } else {
            size - self.overlap
        }
    }

    /// Cut `text` into windows, in order
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        // byte offset of every char, plus the end
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let len = bounds.len() - 1;
        let size = self.chunk_size.max(1);

        if len <= size {
            return if text.is_empty() { Vec::new() } else { vec![text] };
        }

        let step = self.step();
        let mut windows = Vec::new();
        let mut start = 0usize;

        while start < len {
            let mut end = (start + size).min(len);
            if end < len {
                end = self.snap_to_newline(text, &bounds, end, len);
            }
            windows.push(&text[bounds[start]..bounds[end]]);
            if end >= len {
                break;
            }
            start += step;
        }

        windows
    }

    fn snap_to_newline(&self, text: &str, bounds: &[usize], end: usize, len: usize) -> usize {
        let limit = (end + self.newline_snap).min(len);
        text[bounds[end]..bounds[limit]]
            .chars()
            .position(|c| c == '\n')
            .map(|offset| end + offset + 1)
            .unwrap_or(end)
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

/// Drop repeated questions (exact text), keeping the first occurrence and order
pub fn dedup_items(items: Vec<ExtractedItem>) -> Vec<ExtractedItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.question_text.clone()))
        .collect()
}
