//! Row sinks: Google Sheets values API and an in-memory store

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::openai::check_status;
use super::retry::RetryPolicy;
use crate::config::{SinkBackend, SinkConfig};
use crate::error::{Error, ProviderError, Result};
use crate::processing::JobControl;

/// Spreadsheet and tab that one job writes to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SheetTarget {
    pub spreadsheet_id: String,
    pub tab: String,
}

impl SheetTarget {
    pub fn new(spreadsheet_id: impl Into<String>, tab: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            tab: tab.into(),
        }
    }
}

impl std::fmt::Display for SheetTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.spreadsheet_id, self.tab)
    }
}

/// Durable store for output rows
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Write `headers` as the first row if the tab has none
    async fn ensure_header(
        &self,
        target: &SheetTarget,
        headers: &[String],
        control: &JobControl,
    ) -> Result<()>;

    /// Append rows after the existing data, returning how many were written
    async fn append_rows(
        &self,
        target: &SheetTarget,
        rows: &[Vec<String>],
        control: &JobControl,
    ) -> Result<usize>;

    fn name(&self) -> &str;
}

/// Build the configured sink
pub fn build_sink(config: &SinkConfig, policy: RetryPolicy) -> Result<Arc<dyn RowSink>> {
    match config.backend {
        SinkBackend::Sheets => Ok(Arc::new(SheetsSink::new(config, policy)?)),
        SinkBackend::Memory => Ok(Arc::new(MemorySink::new())),
    }
}

/// Google Sheets v4 values API client
pub struct SheetsSink {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
    policy: RetryPolicy,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_rows: Option<usize>,
}

impl SheetsSink {
    pub fn new(config: &SinkConfig, policy: RetryPolicy) -> Result<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid sink base_url: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            access_token: config.access_token.clone(),
            policy,
        })
    }

    /// `{base}/spreadsheets/{id}/values/{range}{suffix}` with each segment escaped
    fn values_url(&self, target: &SheetTarget, range: &str, suffix: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config("Sink base_url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(&[
                "spreadsheets",
                target.spreadsheet_id.as_str(),
                "values",
                &format!("{}{}", range, suffix),
            ]);
        Ok(url)
    }

    /// Send a request built fresh for each attempt; 429, 5xx and timeouts are retried
    async fn send<F>(&self, what: &str, control: &JobControl, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| Error::Config("No Sheets access token configured".to_string()))?;
        let build = &build;

        self.policy
            .run(what, control, move || async move {
                let response = build()
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(ProviderError::from)?;
                Ok(check_status(response).await?)
            })
            .await
            .map_err(|e| match e {
                Error::Provider(ProviderError::Status { status, body, .. }) => {
                    Error::Sink(format!("{} failed ({}): {}", what, status, body))
                }
                Error::Provider(provider) => Error::Sink(format!("{} failed: {}", what, provider)),
                other => other,
            })
    }
}

#[async_trait]
impl RowSink for SheetsSink {
    async fn ensure_header(
        &self,
        target: &SheetTarget,
        headers: &[String],
        control: &JobControl,
    ) -> Result<()> {
        let range = format!("{}!1:1", target.tab);
        let url = self.values_url(target, &range, "")?;
        let existing: ValueRange = self
            .send("Header read", control, || self.client.get(url.clone()))
            .await?
            .json()
            .await
            .map_err(|e| Error::Sink(format!("Invalid header response: {}", e)))?;

        let first_row: Vec<String> = existing
            .values
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();

        if first_row.iter().any(|cell| !cell.trim().is_empty()) {
            if first_row != headers {
                tracing::warn!(
                    "Header row of {} differs from the expected schema, leaving it as is",
                    target
                );
            }
            return Ok(());
        }

        let url = self.values_url(target, &format!("{}!A1", target.tab), "")?;
        let body = json!({ "values": [headers] });
        self.send("Header write", control, || {
            self.client
                .put(url.clone())
                .query(&[("valueInputOption", "RAW")])
                .json(&body)
        })
        .await?;
        tracing::info!("Wrote header row to {}", target);
        Ok(())
    }

    async fn append_rows(
        &self,
        target: &SheetTarget,
        rows: &[Vec<String>],
        control: &JobControl,
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let url = self.values_url(target, &format!("{}!A1", target.tab), ":append")?;
        let body = json!({ "values": rows });
        let response: AppendResponse = self
            .send("Row append", control, || {
                self.client
                    .post(url.clone())
                    .query(&[
                        ("valueInputOption", "RAW"),
                        ("insertDataOption", "INSERT_ROWS"),
                    ])
                    .json(&body)
            })
            .await?
            .json()
            .await
            .map_err(|e| Error::Sink(format!("Invalid append response: {}", e)))?;

        let written = response
            .updates
            .and_then(|u| u.updated_rows)
            .unwrap_or(rows.len());
        tracing::info!("Appended {} rows to {}", written, target);
        Ok(written)
    }

    fn name(&self) -> &str {
        "sheets"
    }
}

/// Rows kept in process memory, per target
#[derive(Default)]
pub struct MemorySink {
    headers: Mutex<HashMap<SheetTarget, Vec<String>>>,
    rows: Mutex<HashMap<SheetTarget, Vec<Vec<String>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self, target: &SheetTarget) -> Option<Vec<String>> {
        self.headers.lock().get(target).cloned()
    }

    pub fn rows(&self, target: &SheetTarget) -> Vec<Vec<String>> {
        self.rows.lock().get(target).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn ensure_header(
        &self,
        target: &SheetTarget,
        headers: &[String],
        _control: &JobControl,
    ) -> Result<()> {
        self.headers
            .lock()
            .entry(target.clone())
            .or_insert_with(|| headers.to_vec());
        Ok(())
    }

    async fn append_rows(
        &self,
        target: &SheetTarget,
        rows: &[Vec<String>],
        _control: &JobControl,
    ) -> Result<usize> {
        self.rows
            .lock()
            .entry(target.clone())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
