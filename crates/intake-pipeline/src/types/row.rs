//! Fixed, ordered output row schemas (the wire contract toward the sink)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::item::{ClassifiedItem, Taxonomy};

/// Rendered in place of every absent value
pub const NOT_AVAILABLE: &str = "N/A";

/// Workflows, each owning one row schema
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    Interview,
    Upload,
    Drilldown,
    AssessmentZip,
    AssessmentIndividual,
    Assignment,
}

impl Workflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::Interview => "interview",
            Workflow::Upload => "upload",
            Workflow::Drilldown => "drilldown",
            Workflow::AssessmentZip => "assessment_zip",
            Workflow::AssessmentIndividual => "assessment_individual",
            Workflow::Assignment => "assignment",
        }
    }

    pub fn schema(&self) -> &'static RowSchema {
        match self {
            Workflow::Interview => &INTERVIEW_SCHEMA,
            Workflow::Upload => &UPLOAD_SCHEMA,
            Workflow::Drilldown => &DRILLDOWN_SCHEMA,
            Workflow::AssessmentZip | Workflow::AssessmentIndividual => &ASSESSMENT_SCHEMA,
            Workflow::Assignment => &ASSIGNMENT_SCHEMA,
        }
    }
}

impl std::fmt::Display for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every column any workflow writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    CandidateName,
    CandidateEmail,
    InterviewRound,
    RecordingLink,
    TranscriptLink,
    FileName,
    AssessmentName,
    AssignmentName,
    AssignmentLink,
    Product,
    Question,
    Answer,
    QuestionType,
    Concept,
    Difficulty,
    Topic,
    SubTopic,
    Relevancy,
    CurriculumCoverage,
    ProcessedAt,
}

impl Column {
    pub fn header(&self) -> &'static str {
        match self {
            Column::CandidateName => "Candidate Name",
            Column::CandidateEmail => "Candidate Email",
            Column::InterviewRound => "Interview Round",
            Column::RecordingLink => "Recording Link",
            Column::TranscriptLink => "Transcript Link",
            Column::FileName => "File Name",
            Column::AssessmentName => "Assessment Name",
            Column::AssignmentName => "Assignment Name",
            Column::AssignmentLink => "Assignment Link",
            Column::Product => "Product",
            Column::Question => "Question",
            Column::Answer => "Answer",
            Column::QuestionType => "Question Type",
            Column::Concept => "Concept",
            Column::Difficulty => "Difficulty",
            Column::Topic => "Topic",
            Column::SubTopic => "Sub Topic",
            Column::Relevancy => "Relevancy",
            Column::CurriculumCoverage => "Curriculum Coverage",
            Column::ProcessedAt => "Processed At",
        }
    }
}

/// Ordered column list for one workflow
#[derive(Debug)]
pub struct RowSchema {
    pub columns: &'static [Column],
}

pub static INTERVIEW_SCHEMA: RowSchema = RowSchema {
    columns: &[
        Column::CandidateName,
        Column::CandidateEmail,
        Column::InterviewRound,
        Column::RecordingLink,
        Column::Product,
        Column::Question,
        Column::Answer,
        Column::QuestionType,
        Column::Concept,
        Column::Difficulty,
        Column::Topic,
        Column::SubTopic,
        Column::Relevancy,
        Column::ProcessedAt,
    ],
};

pub static UPLOAD_SCHEMA: RowSchema = RowSchema {
    columns: &[
        Column::CandidateName,
        Column::InterviewRound,
        Column::FileName,
        Column::Product,
        Column::Question,
        Column::Answer,
        Column::QuestionType,
        Column::Concept,
        Column::Difficulty,
        Column::Topic,
        Column::SubTopic,
        Column::Relevancy,
        Column::ProcessedAt,
    ],
};

pub static DRILLDOWN_SCHEMA: RowSchema = RowSchema {
    columns: &[
        Column::CandidateName,
        Column::InterviewRound,
        Column::TranscriptLink,
        Column::Product,
        Column::Question,
        Column::Answer,
        Column::QuestionType,
        Column::Concept,
        Column::Difficulty,
        Column::Topic,
        Column::SubTopic,
        Column::Relevancy,
        Column::ProcessedAt,
    ],
};

pub static ASSESSMENT_SCHEMA: RowSchema = RowSchema {
    columns: &[
        Column::AssessmentName,
        Column::FileName,
        Column::Product,
        Column::Question,
        Column::Answer,
        Column::QuestionType,
        Column::Concept,
        Column::Difficulty,
        Column::Topic,
        Column::SubTopic,
        Column::Relevancy,
        Column::CurriculumCoverage,
        Column::ProcessedAt,
    ],
};

pub static ASSIGNMENT_SCHEMA: RowSchema = RowSchema {
    columns: &[
        Column::AssignmentName,
        Column::AssignmentLink,
        Column::Product,
        Column::Question,
        Column::QuestionType,
        Column::Concept,
        Column::Difficulty,
        Column::Topic,
        Column::SubTopic,
        Column::Relevancy,
        Column::CurriculumCoverage,
        Column::ProcessedAt,
    ],
};

impl RowSchema {
    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.header().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Start a row; columns outside this schema are ignored on build
    pub fn row(&self) -> RowBuilder<'_> {
        RowBuilder {
            schema: self,
            values: HashMap::new(),
        }
    }
}

/// Collects column values and renders them in schema order
#[derive(Debug, Clone)]
pub struct RowBuilder<'a> {
    schema: &'a RowSchema,
    values: HashMap<Column, String>,
}

impl RowBuilder<'_> {
    /// Set a column; `None` and blank strings stay absent
    pub fn set<V: Into<Option<String>>>(mut self, column: Column, value: V) -> Self {
        if let Some(v) = value.into() {
            if !v.trim().is_empty() {
                self.values.insert(column, v);
            }
        }
        self
    }

    pub fn set_str(self, column: Column, value: &str) -> Self {
        self.set(column, Some(value.to_string()))
    }

    /// Fill question, answer and every taxonomy column from an item
    pub fn item(self, item: &ClassifiedItem) -> Self {
        self.set_str(Column::Question, &item.question_text)
            .set(Column::Answer, item.answer_text.clone())
            .taxonomy(&item.taxonomy)
    }

    pub fn taxonomy(self, taxonomy: &Taxonomy) -> Self {
        self.set(Column::QuestionType, taxonomy.question_type.clone())
            .set(Column::Concept, taxonomy.concept.clone())
            .set(Column::Difficulty, taxonomy.difficulty.clone())
            .set(Column::Topic, taxonomy.topic.clone())
            .set(Column::SubTopic, taxonomy.sub_topic.clone())
            .set(Column::Relevancy, taxonomy.relevancy.clone())
            .set(Column::CurriculumCoverage, taxonomy.curriculum_coverage.clone())
    }

    /// Render exactly the schema's columns, absent ones as the sentinel
    pub fn build(mut self) -> Vec<String> {
        self.schema
            .columns
            .iter()
            .map(|c| {
                self.values
                    .remove(c)
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string())
            })
            .collect()
    }
}
