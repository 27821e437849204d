//! Extracted and classified question items

use serde::{Deserialize, Serialize};

/// A question (and optional answer) pulled from source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_text: Option<String>,
}

impl ExtractedItem {
    pub fn new(question_text: impl Into<String>) -> Self {
        Self {
            question_text: question_text.into(),
            answer_text: None,
        }
    }

    pub fn with_answer(question_text: impl Into<String>, answer_text: impl Into<String>) -> Self {
        Self {
            question_text: question_text.into(),
            answer_text: Some(answer_text.into()),
        }
    }
}

/// Normalized taxonomy values; `None` renders as the sentinel at the row boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub question_type: Option<String>,
    pub concept: Option<String>,
    pub difficulty: Option<String>,
    pub topic: Option<String>,
    pub sub_topic: Option<String>,
    pub relevancy: Option<String>,
    pub curriculum_coverage: Option<String>,
}

/// An item after the classification merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedItem {
    pub question_text: String,
    pub answer_text: Option<String>,
    pub taxonomy: Taxonomy,
}

impl ClassifiedItem {
    /// Attach taxonomy to an extracted item
    pub fn new(item: ExtractedItem, taxonomy: Taxonomy) -> Self {
        Self {
            question_text: item.question_text,
            answer_text: item.answer_text,
            taxonomy,
        }
    }

    /// An item the classifier returned nothing for
    pub fn unclassified(item: ExtractedItem) -> Self {
        Self::new(item, Taxonomy::default())
    }
}
