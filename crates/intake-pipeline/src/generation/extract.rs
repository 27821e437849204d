//! Chunked question extraction

use serde_json::Value;

use super::output::{entry_list, parse_payload, string_field};
use super::prompt::{ExtractionMode, PromptBuilder};
use crate::error::{Error, Result};
use crate::ingestion::{dedup_items, TextChunker};
use crate::processing::JobControl;
use crate::providers::{ChatRequest, ResilientClient};
use crate::types::ExtractedItem;

const QUESTION_KEYS: [&str; 3] = ["question", "question_text", "questionText"];
const ANSWER_KEYS: [&str; 3] = ["answer", "answer_text", "answerText"];

/// Items in one window's model output
pub fn parse_extracted(raw: &str) -> Result<Vec<ExtractedItem>> {
    let entries = entry_list(parse_payload(raw)?, &["questions", "items", "qa"])?;

    let items = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(q) if !q.trim().is_empty() => Some(ExtractedItem::new(q.trim())),
            Value::Object(map) => {
                let question = string_field(&map, &QUESTION_KEYS)?;
                Some(ExtractedItem {
                    question_text: question,
                    answer_text: string_field(&map, &ANSWER_KEYS),
                })
            }
            _ => None,
        })
        .collect();
    Ok(items)
}

/// Extract deduplicated items from `text`, one model call per window
///
/// Windows whose output cannot be parsed are skipped; the call fails only when
/// every window does. Provider failures and cancellation propagate.
pub async fn extract_items(
    client: &ResilientClient,
    chunker: &TextChunker,
    mode: ExtractionMode,
    product: &str,
    text: &str,
    control: &JobControl,
) -> Result<Vec<ExtractedItem>> {
    let windows = chunker.split(text.trim());
    if windows.is_empty() {
        return Err(Error::InvalidInput("Source text is empty".to_string()));
    }

    let system = PromptBuilder::extraction_system(mode);
    let mut items = Vec::new();
    let mut failed = 0usize;

    for (index, window) in windows.iter().enumerate() {
        let request = ChatRequest::json(
            system.clone(),
            PromptBuilder::extraction_prompt(product, window, index, windows.len()),
        );
        let raw = client.chat(&request, control).await?;

        match parse_extracted(&raw) {
            Ok(found) => {
                tracing::debug!("Window {}/{}: {} items", index + 1, windows.len(), found.len());
                items.extend(found);
            }
            Err(e) => {
                tracing::warn!(
                    "Skipping window {}/{}: {}",
                    index + 1,
                    windows.len(),
                    e
                );
                failed += 1;
            }
        }
    }

    if failed == windows.len() {
        return Err(Error::model_output(format!(
            "all {} extraction window(s) were unparseable",
            failed
        )));
    }

    let mut items = dedup_items(items);
    if mode == ExtractionMode::QuestionsOnly {
        for item in &mut items {
            item.answer_text = None;
        }
    }
    Ok(items)
}
