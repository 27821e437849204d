//! Batch classification and merge back onto extracted items

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::output::{entry_list, parse_payload, string_field};
use super::prompt::PromptBuilder;
use crate::error::Result;
use crate::processing::JobControl;
use crate::providers::{ChatRequest, ResilientClient};
use crate::types::{ClassifiedItem, ExtractedItem, Taxonomy};

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Z0-9]+").expect("valid regex"));

/// Values the model uses to mean "no value"
const SENTINELS: [&str; 4] = ["n/a", "nan", "none", "null"];

/// Canonical enum form: `"Java Script!"` becomes `JAVA_SCRIPT`; sentinels become `None`
pub fn normalize_enum(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || SENTINELS.iter().any(|s| trimmed.eq_ignore_ascii_case(s)) {
        return None;
    }
    let upper = trimmed.to_uppercase();
    let collapsed = NON_ALPHANUMERIC.replace_all(&upper, "_");
    let normalized = collapsed.trim_matches('_');
    (!normalized.is_empty()).then(|| normalized.to_string())
}

/// Normalize any JSON taxonomy value; arrays join their surviving elements with `", "`
pub fn normalize_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => normalize_enum(s),
        Value::Number(n) => normalize_enum(&n.to_string()),
        Value::Bool(b) => normalize_enum(&b.to_string()),
        Value::Array(values) => {
            let parts: Vec<String> = values.iter().filter_map(normalize_value).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}

/// One classified entry as returned by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEntry {
    pub question_text: String,
    pub taxonomy: Taxonomy,
}

fn taxonomy_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find_map(normalize_value)
}

fn taxonomy_from(map: &Map<String, Value>) -> Taxonomy {
    Taxonomy {
        question_type: taxonomy_field(map, &["question_type", "questionType", "type"]),
        concept: taxonomy_field(map, &["concept"]),
        difficulty: taxonomy_field(map, &["difficulty"]),
        topic: taxonomy_field(map, &["topic"]),
        sub_topic: taxonomy_field(map, &["sub_topic", "subTopic", "subtopic"]),
        relevancy: taxonomy_field(map, &["relevancy", "relevance"]),
        curriculum_coverage: taxonomy_field(
            map,
            &["curriculum_coverage", "curriculumCoverage", "coverage"],
        ),
    }
}

/// Entries in a classification response; entries without a question are dropped
pub fn parse_classifications(raw: &str) -> Result<Vec<ClassifiedEntry>> {
    let entries = entry_list(
        parse_payload(raw)?,
        &["classifications", "items", "questions"],
    )?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let Value::Object(map) = entry else {
                return None;
            };
            Some(ClassifiedEntry {
                question_text: string_field(&map, &["question", "question_text", "questionText"])?,
                taxonomy: taxonomy_from(&map),
            })
        })
        .collect())
}

/// Attach taxonomy by exact question text; the first returned match wins and
/// unmatched items stay unclassified
pub fn merge_classifications(
    items: Vec<ExtractedItem>,
    entries: Vec<ClassifiedEntry>,
) -> Vec<ClassifiedItem> {
    let mut by_question: HashMap<String, Taxonomy> = HashMap::with_capacity(entries.len());
    for entry in entries {
        by_question.entry(entry.question_text).or_insert(entry.taxonomy);
    }

    items
        .into_iter()
        .map(|item| {
            let taxonomy = by_question
                .get(&item.question_text)
                .cloned()
                .unwrap_or_default();
            ClassifiedItem::new(item, taxonomy)
        })
        .collect()
}

/// Inputs shared by every classification batch of one run
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    pub product: String,
    /// Reference syllabus for curriculum coverage
    pub syllabus: Option<String>,
    /// Ask for `curriculum_coverage` (assessment and assignment workflows)
    pub with_coverage: bool,
}

/// Classify items in batches of `batch_size`
///
/// A batch whose call fails or whose output cannot be parsed keeps its items
/// unclassified. Only cancellation aborts the run.
pub async fn classify_items(
    client: &ResilientClient,
    items: Vec<ExtractedItem>,
    batch_size: usize,
    context: &ClassifyContext,
    control: &JobControl,
) -> Result<Vec<ClassifiedItem>> {
    let batch_size = batch_size.max(1);
    let system = PromptBuilder::classification_system(context.with_coverage);
    let total_batches = items.len().div_ceil(batch_size);
    let mut classified = Vec::with_capacity(items.len());

    let mut remaining = items.into_iter().peekable();
    let mut batch_index = 0usize;
    while remaining.peek().is_some() {
        let batch: Vec<ExtractedItem> = remaining.by_ref().take(batch_size).collect();
        batch_index += 1;

        let request = ChatRequest::json(
            system.clone(),
            PromptBuilder::classification_prompt(
                &context.product,
                &batch,
                context.syllabus.as_deref(),
            ),
        );

        let entries = match client.chat(&request, control).await {
            Ok(raw) => parse_classifications(&raw),
            Err(e) => Err(e),
        };

        match entries {
            Ok(entries) => classified.extend(merge_classifications(batch, entries)),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "Classification batch {}/{} failed, leaving {} items unclassified: {}",
                    batch_index,
                    total_batches,
                    batch.len(),
                    e
                );
                classified.extend(batch.into_iter().map(ClassifiedItem::unclassified));
            }
        }
    }

    Ok(classified)
}
