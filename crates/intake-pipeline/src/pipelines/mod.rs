//! Workflow executors
//!
//! Every workflow runs the same stage machine: acquire input, get raw text,
//! chunked extraction, deduplication, batch classification, row assembly, sink
//! write, cleanup. The per-item driver in this module owns skip handling,
//! progress and partial results; the workflow modules own what an item is.

pub mod assessment;
pub mod assignment;
pub mod drilldown;
pub mod interview;
pub mod stages;
pub mod upload;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{AppConfig, SinkBackend};
use crate::error::{Error, Result};
use crate::ingestion::TextChunker;
use crate::media::MediaToolkit;
use crate::processing::{JobControl, JobHandle};
use crate::providers::{
    BackendFactory, KeyRing, ProviderRuntimeConfig, RemoteFetcher, ResilientClient, RetryPolicy,
    RowSink, SheetTarget, ThrottleRegistry,
};
use crate::types::{Workflow, WorkflowReport};

/// Long-lived collaborators shared by every job
pub struct PipelineServices {
    pub config: Arc<AppConfig>,
    pub sink: Arc<dyn RowSink>,
    pub fetcher: Arc<dyn RemoteFetcher>,
    pub media: MediaToolkit,
    pub backends: Arc<dyn BackendFactory>,
    pub throttles: Arc<ThrottleRegistry>,
}

/// Sheet destination override from a request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetOverride {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub tab: Option<String>,
}

/// Fields every workflow request carries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOptions {
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub provider: Option<String>,
    /// Credentials that replace the configured ones for this job
    #[serde(default, skip_serializing)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub sheet: SheetOverride,
}

/// Per-job staging directory under `media.work_dir`
#[derive(Debug, Clone)]
pub struct StagingDir {
    root: PathBuf,
}

impl StagingDir {
    pub async fn create(work_dir: &Path, job_id: Uuid) -> Result<Self> {
        let root = work_dir.join(format!("job-{}", job_id));
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Working directory for one input item
    pub async fn item_dir(&self, index: usize) -> Result<PathBuf> {
        let dir = self.root.join(format!("item-{:03}", index + 1));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn remove_dir(dir: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {}", dir.display(), e);
            }
        }
    }
}

/// Everything one job needs, resolved before any item is touched
pub struct PipelineContext {
    pub workflow: Workflow,
    pub product: String,
    pub client: ResilientClient,
    pub chunker: TextChunker,
    pub batch_size: usize,
    pub sink: Arc<dyn RowSink>,
    pub target: SheetTarget,
    pub fetcher: Arc<dyn RemoteFetcher>,
    pub media: MediaToolkit,
    pub staging: StagingDir,
}

impl PipelineContext {
    /// Resolve provider, credentials and sink target; any failure here is fatal
    pub async fn prepare(
        services: &PipelineServices,
        workflow: Workflow,
        options: &WorkflowOptions,
        job_id: Uuid,
    ) -> Result<Self> {
        let config = &services.config;
        let runtime = ProviderRuntimeConfig::resolve(
            &config.providers,
            options.provider.as_deref(),
            &options.api_keys,
        )?;
        tracing::debug!("Job {} provider: {:?}", job_id, runtime);

        let backend = services.backends.build(&runtime)?;
        let throttle = services.throttles.get(
            &runtime.provider,
            Duration::from_millis(config.retry.min_interval_ms),
        );
        let client = ResilientClient::new(
            backend,
            KeyRing::new(runtime.api_keys.clone())?,
            throttle,
            RetryPolicy::from_config(&config.retry),
        );

        let spreadsheet_id = options
            .sheet
            .spreadsheet_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| config.sink.spreadsheet_id.clone())
            .or_else(|| (config.sink.backend == SinkBackend::Memory).then(|| "memory".to_string()))
            .ok_or_else(|| Error::Config("No spreadsheet id configured".to_string()))?;
        let tab = options
            .sheet
            .tab
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| config.sink.tab_for(workflow.as_str()));

        Ok(Self {
            workflow,
            product: options.product.trim().to_string(),
            client,
            chunker: TextChunker::from_config(&config.chunking),
            batch_size: config.classification.batch_size,
            sink: services.sink.clone(),
            target: SheetTarget::new(spreadsheet_id, tab),
            fetcher: services.fetcher.clone(),
            media: services.media.clone(),
            staging: StagingDir::create(&config.media.work_dir, job_id).await?,
        })
    }

    /// Write the schema header; failure aborts the job
    pub async fn ensure_header(&self, control: &JobControl) -> Result<()> {
        let headers = self.workflow.schema().headers();
        control
            .guard(self.sink.ensure_header(&self.target, &headers, control))
            .await
    }

    /// Append one item's rows
    pub async fn persist(&self, rows: &[Vec<String>], control: &JobControl) -> Result<usize> {
        control
            .guard(self.sink.append_rows(&self.target, rows, control))
            .await
    }

    /// Turn the run into the job result; staging survives any failure or skip
    pub async fn finish(&self, report: WorkflowReport) -> Result<serde_json::Value> {
        let clean = report.skipped.is_empty();
        let report = report.finish()?;
        if clean {
            StagingDir::remove_dir(self.staging.path()).await;
        }
        tracing::info!(
            "{} finished: {} rows from {}/{} items",
            self.workflow,
            report.rows_written,
            report.items_succeeded,
            report.items_total
        );
        Ok(report.to_value())
    }
}

/// Where a unit of work runs
#[derive(Debug, Clone)]
pub struct ItemSlot {
    /// Logical worker (used for key pinning)
    pub worker: usize,
    /// Position in the input
    pub index: usize,
    /// Item working directory under the job's staging dir
    pub work_dir: PathBuf,
}

/// Run every item through `process` with `workers` logical workers
///
/// `process` receives the claimed slot and looks the item up by `slot.index`.
/// Workers claim items from a shared cursor. An item's rows are written to the sink
/// as soon as it finishes; any failure other than cancellation becomes a skip.
/// After each item the report is pushed as partial result.
pub async fn run_items<I, L, F, Fut>(
    ctx: &PipelineContext,
    handle: &JobHandle,
    items: &[I],
    workers: usize,
    label: L,
    process: F,
) -> Result<WorkflowReport>
where
    L: Fn(usize, &I) -> String,
    F: Fn(ItemSlot) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<String>>>>,
{
    let control = handle.control();
    let report = Mutex::new(WorkflowReport::new(ctx.workflow, items.len()));
    let cursor = AtomicUsize::new(0);
    let workers = workers.clamp(1, items.len().max(1));

    let (initial, progress) = {
        let report = report.lock();
        (report.to_value(), report.progress())
    };
    handle.update(
        format!("Processing {} item(s)", items.len()),
        Some(initial),
        Some(progress),
    );

    let worker = |worker: usize| {
        let report = &report;
        let cursor = &cursor;
        let label = &label;
        let process = &process;
        async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(item) = items.get(index) else {
                    return Ok::<(), Error>(());
                };
                control.throw_if_cancelled()?;

                let name = label(index, item);
                tracing::info!("[worker {}] Starting {}", worker, name);
                handle.message(format!("Processing {} ({}/{})", name, index + 1, items.len()));

                let work_dir = ctx.staging.item_dir(index).await?;
                let outcome = async {
                    let rows = process(ItemSlot {
                        worker,
                        index,
                        work_dir: work_dir.clone(),
                    })
                    .await?;
                    if rows.is_empty() {
                        return Err(Error::model_output("no questions found"));
                    }
                    ctx.persist(&rows, control).await?;
                    Ok::<_, Error>(rows)
                }
                .await;

                let (succeeded, message, partial, progress) = {
                    let mut report = report.lock();
                    let (succeeded, message) = match outcome {
                        Ok(rows) => {
                            let message = format!("Wrote {} row(s) for {}", rows.len(), name);
                            report.record_rows(rows);
                            (true, message)
                        }
                        Err(e) if e.is_cancelled() || control.is_cancelled() => {
                            return Err(Error::Cancelled)
                        }
                        Err(e) => {
                            tracing::warn!("Skipping {}: {}", name, e);
                            let message = format!("Skipped {}: {}", name, e);
                            report.record_skip(name, e.to_string());
                            (false, message)
                        }
                    };
                    (succeeded, message, report.to_value(), report.progress())
                };
                // failed items keep their artifacts for inspection
                if succeeded {
                    StagingDir::remove_dir(&work_dir).await;
                }
                handle.update(message, Some(partial), Some(progress));
            }
        }
    };

    let results = join_all((0..workers).map(worker)).await;
    if control.is_cancelled() || results.iter().any(|r| matches!(r, Err(Error::Cancelled))) {
        return Err(Error::Cancelled);
    }
    results.into_iter().collect::<Result<Vec<()>>>()?;

    Ok(report.into_inner())
}

/// Current time for the Processed At column
pub fn processed_at() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
