//! Prompt templates for extraction and classification

use serde_json::json;

use crate::types::ExtractedItem;

/// Allowed question types
pub const QUESTION_TYPES: [&str; 7] = [
    "CONCEPTUAL",
    "CODING",
    "SCENARIO",
    "BEHAVIORAL",
    "SYSTEM_DESIGN",
    "DEBUGGING",
    "MCQ",
];
pub const DIFFICULTIES: [&str; 3] = ["EASY", "MEDIUM", "HARD"];
pub const RELEVANCY_LEVELS: [&str; 3] = ["HIGH", "MEDIUM", "LOW"];
pub const COVERAGE_LEVELS: [&str; 3] = ["COVERED", "PARTIALLY_COVERED", "NOT_COVERED"];

/// What an extraction pass pulls out of its source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Interviewer questions and the candidate's answers from a transcript
    Interview,
    /// Questions, with answers when present, from an assessment document
    Document,
    /// Questions only, from an assignment page
    QuestionsOnly,
}

/// Prompt builder for extraction and classification
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn extraction_system(mode: ExtractionMode) -> String {
        let task = match mode {
            ExtractionMode::Interview => {
                "You read interview transcripts and list every technical or behavioral question \
the interviewer asked, together with the candidate's answer as spoken. Merge questions that were \
split across several turns. Ignore small talk, logistics and introductions."
            }
            ExtractionMode::Document => {
                "You read assessment documents and list every question they contain. When the \
document includes an answer or solution for a question, include it verbatim."
            }
            ExtractionMode::QuestionsOnly => {
                "You read assignment pages and list every question or task the learner must \
complete. Do not invent answers."
            }
        };

        let shape = if mode == ExtractionMode::QuestionsOnly {
            r#"{"questions": [{"question": "..."}]}"#
        } else {
            r#"{"questions": [{"question": "...", "answer": "..."}]}"#
        };

        format!(
            "{task}\n\nRespond with a single JSON object of the form {shape}. \
Use the original wording. If there are no questions, return {{\"questions\": []}}."
        )
    }

    pub fn extraction_prompt(product: &str, text: &str, window: usize, windows: usize) -> String {
        let mut prompt = String::new();
        if !product.is_empty() {
            prompt.push_str(&format!("Product / track: {}\n", product));
        }
        if windows > 1 {
            prompt.push_str(&format!(
                "This is part {} of {} of the source; parts overlap slightly.\n",
                window + 1,
                windows
            ));
        }
        prompt.push_str("\nSOURCE TEXT:\n");
        prompt.push_str(text);
        prompt
    }

    pub fn classification_system(with_coverage: bool) -> String {
        let mut fields = vec![
            format!("- question_type: one of {}", QUESTION_TYPES.join(", ")),
            "- concept: the core concept being tested, a short phrase".to_string(),
            format!("- difficulty: one of {}", DIFFICULTIES.join(", ")),
            "- topic: broad subject area".to_string(),
            "- sub_topic: narrower area within the topic".to_string(),
            format!(
                "- relevancy: one of {} (relevance to the product track)",
                RELEVANCY_LEVELS.join(", ")
            ),
        ];
        if with_coverage {
            fields.push(format!(
                "- curriculum_coverage: one of {} (whether the syllabus teaches the concept; \
use N/A when no syllabus is given)",
                COVERAGE_LEVELS.join(", ")
            ));
        }

        format!(
            "You classify recruiting and assessment questions.\n\nFor each question return:\n{}\n\n\
Respond with a single JSON object {{\"classifications\": [...]}}. Each entry must repeat the \
\"question\" text exactly as given. Use N/A for any field you cannot judge.",
            fields.join("\n")
        )
    }

    pub fn classification_prompt(
        product: &str,
        items: &[ExtractedItem],
        syllabus: Option<&str>,
    ) -> String {
        let questions: Vec<_> = items
            .iter()
            .map(|item| match &item.answer_text {
                Some(answer) => json!({ "question": item.question_text, "answer": answer }),
                None => json!({ "question": item.question_text }),
            })
            .collect();

        let mut prompt = String::new();
        if !product.is_empty() {
            prompt.push_str(&format!("Product / track: {}\n\n", product));
        }
        if let Some(syllabus) = syllabus.filter(|s| !s.trim().is_empty()) {
            prompt.push_str("SYLLABUS:\n");
            prompt.push_str(syllabus.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str("QUESTIONS:\n");
        prompt.push_str(&serde_json::to_string_pretty(&questions).unwrap_or_default());
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_questions_only_omits_answer_shape() {
        let system = PromptBuilder::extraction_system(ExtractionMode::QuestionsOnly);
        assert!(!system.contains("\"answer\""));
        let system = PromptBuilder::extraction_system(ExtractionMode::Interview);
        assert!(system.contains("\"answer\""));
    }

    #[test]
    fn test_classification_prompt_carries_syllabus_and_questions() {
        let items = vec![ExtractedItem::new("What is borrowing?")];
        let prompt = PromptBuilder::classification_prompt("Rust", &items, Some("Week 1: ownership"));
        assert!(prompt.contains("SYLLABUS:\nWeek 1: ownership"));
        assert!(prompt.contains("What is borrowing?"));

        let system = PromptBuilder::classification_system(true);
        assert!(system.contains("curriculum_coverage"));
        assert!(!PromptBuilder::classification_system(false).contains("curriculum_coverage"));
    }
}
