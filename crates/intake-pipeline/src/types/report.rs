//! Workflow result and partial result payloads

use serde::{Deserialize, Serialize};

use super::row::Workflow;
use crate::error::{Error, Result};
use crate::processing::Progress;

/// Skip reasons surfaced in a failed job's message
const SURFACED_REASONS: usize = 3;

/// One input item that produced no rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub item: String,
    pub reason: String,
}

impl std::fmt::Display for SkipRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.item, self.reason)
    }
}

/// Rows accumulated by a workflow run, pushed as partial result and returned as result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    pub workflow: Workflow,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub rows_written: usize,
    pub items_total: usize,
    pub items_succeeded: usize,
    pub skipped: Vec<SkipRecord>,
}

impl WorkflowReport {
    pub fn new(workflow: Workflow, items_total: usize) -> Self {
        Self {
            workflow,
            headers: workflow.schema().headers(),
            rows: Vec::new(),
            rows_written: 0,
            items_total,
            items_succeeded: 0,
            skipped: Vec::new(),
        }
    }

    /// Record an item whose rows reached the sink
    pub fn record_rows(&mut self, rows: Vec<Vec<String>>) {
        self.rows_written += rows.len();
        self.rows.extend(rows);
        self.items_succeeded += 1;
    }

    pub fn record_skip(&mut self, item: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkipRecord {
            item: item.into(),
            reason: reason.into(),
        });
    }

    pub fn completed(&self) -> usize {
        self.items_succeeded + self.skipped.len()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.completed(),
            total: self.items_total,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Finish the run: zero rows across the whole run is a job-level failure
    pub fn finish(self) -> Result<Self> {
        if self.rows.is_empty() {
            return Err(Error::NoOutput {
                skipped: self.skipped.len(),
                reasons: self
                    .skipped
                    .iter()
                    .take(SURFACED_REASONS)
                    .map(ToString::to_string)
                    .collect(),
            });
        }
        Ok(self)
    }
}
