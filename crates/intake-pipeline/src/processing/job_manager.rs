//! Job registry and lifecycle for asynchronous pipeline runs
//!
//! Jobs live in an injected [`JobStore`] keyed by id. Each job is mutated only through
//! its own [`JobHandle`]; terminal states are absorbing and expired terminal jobs are
//! dropped lazily on every manager call.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Job state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Success,
    Error,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Error | JobState::Cancelled)
    }
}

/// Completed-item counter
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(completed: usize, total: usize) -> Self {
        Self { completed, total }
    }
}

/// Wire view of a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: Uuid,
    pub kind: String,
    pub state: JobState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct JobEntry {
    snapshot: JobSnapshot,
    control: JobControl,
}

/// Cooperative cancellation shared by every stage of one job
#[derive(Debug, Clone, Default)]
pub struct JobControl {
    token: CancellationToken,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Err(Cancelled) once cancellation was requested
    pub fn throw_if_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Sleep that aborts with Err(Cancelled) as soon as the job is cancelled
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Run an external call with cancellation checks immediately before and after it
    pub async fn guard<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.throw_if_cancelled()?;
        let result = call.await;
        self.throw_if_cancelled()?;
        result
    }
}

/// Process-scoped job registry
#[derive(Default)]
pub struct JobStore {
    jobs: DashMap<Uuid, JobEntry>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn insert(&self, id: Uuid, kind: String, control: JobControl) -> JobSnapshot {
        let now = Utc::now();
        let snapshot = JobSnapshot {
            id,
            kind,
            state: JobState::Queued,
            message: "Queued".to_string(),
            result: None,
            partial_result: None,
            progress: None,
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        };
        self.jobs.insert(
            id,
            JobEntry {
                snapshot: snapshot.clone(),
                control,
            },
        );
        snapshot
    }

    pub fn get(&self, id: Uuid) -> Option<JobSnapshot> {
        self.jobs.get(&id).map(|e| e.snapshot.clone())
    }

    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self.jobs.iter().map(|e| e.snapshot.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// queued -> running; false when the job is gone or no longer queued
    fn mark_running(&self, id: Uuid) -> bool {
        let Some(mut entry) = self.jobs.get_mut(&id) else {
            return false;
        };
        if entry.snapshot.state != JobState::Queued {
            return false;
        }
        entry.snapshot.state = JobState::Running;
        entry.snapshot.message = "Running".to_string();
        entry.snapshot.updated_at = Utc::now();
        true
    }

    /// Apply a progress update; dropped once the job is terminal
    fn apply_update(
        &self,
        id: Uuid,
        message: String,
        partial_result: Option<serde_json::Value>,
        progress: Option<Progress>,
    ) -> bool {
        let Some(mut entry) = self.jobs.get_mut(&id) else {
            return false;
        };
        let snapshot = &mut entry.snapshot;
        if snapshot.state.is_terminal() {
            return false;
        }

        snapshot.message = message;
        if let Some(partial) = partial_result {
            snapshot.partial_result = Some(partial);
        }
        if let Some(mut next) = progress {
            if let Some(prev) = snapshot.progress {
                next.completed = next.completed.max(prev.completed);
            }
            snapshot.progress = Some(next);
        }
        snapshot.updated_at = Utc::now();
        true
    }

    /// Record the runner's outcome unless the job already reached a terminal state
    fn finish(&self, id: Uuid, outcome: Result<serde_json::Value>) {
        let Some(mut entry) = self.jobs.get_mut(&id) else {
            return;
        };
        if entry.snapshot.state.is_terminal() {
            return;
        }
        let cancelled = entry.control.is_cancelled();
        let snapshot = &mut entry.snapshot;

        match outcome {
            Err(e) if cancelled || e.is_cancelled() => {
                snapshot.state = JobState::Cancelled;
                tracing::info!("Job {} stopped after cancellation", id);
            }
            Ok(value) if !cancelled => {
                snapshot.state = JobState::Success;
                snapshot.result = Some(value);
                tracing::info!("Job {} completed", id);
            }
            Ok(_) => {
                snapshot.state = JobState::Cancelled;
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!("Job {} failed: {}", id, message);
                snapshot.state = JobState::Error;
                snapshot.message = message.clone();
                snapshot.error = Some(message);
            }
        }
        snapshot.updated_at = Utc::now();
    }

    /// Request cancellation; a terminal job is returned untouched
    fn cancel(&self, id: Uuid) -> Option<JobSnapshot> {
        let mut entry = self.jobs.get_mut(&id)?;
        if !entry.snapshot.state.is_terminal() {
            entry.control.cancel();
            entry.snapshot.cancel_requested = true;
            entry.snapshot.state = JobState::Cancelled;
            entry.snapshot.updated_at = Utc::now();
            tracing::info!("Job {} cancelled", id);
        }
        Some(entry.snapshot.clone())
    }

    /// Drop terminal jobs whose last update is older than `ttl` at `now`
    pub fn purge_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| {
            !(entry.snapshot.state.is_terminal() && now - entry.snapshot.updated_at > ttl)
        });
        let purged = before - self.jobs.len();
        if purged > 0 {
            tracing::debug!("Purged {} expired jobs", purged);
        }
        purged
    }
}

/// Handle given to a running pipeline: its only way to mutate its job
#[derive(Clone)]
pub struct JobHandle {
    id: Uuid,
    store: Arc<JobStore>,
    control: JobControl,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn control(&self) -> &JobControl {
        &self.control
    }

    /// Push a progress message, optional partial result and counter
    pub fn update(
        &self,
        message: impl Into<String>,
        partial_result: Option<serde_json::Value>,
        progress: Option<Progress>,
    ) {
        let message = message.into();
        if !self.store.apply_update(self.id, message.clone(), partial_result, progress) {
            tracing::debug!("Dropped update for job {}: {}", self.id, message);
        }
    }

    /// Message-only update
    pub fn message(&self, message: impl Into<String>) {
        self.update(message, None, None);
    }
}

/// Creates, tracks and cancels jobs
#[derive(Clone)]
pub struct JobManager {
    store: Arc<JobStore>,
    ttl: chrono::Duration,
}

impl JobManager {
    pub fn new(store: Arc<JobStore>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self { store, ttl }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    fn purge(&self) {
        self.store.purge_expired(self.ttl, Utc::now());
    }

    /// Register a queued job and start its runner on the runtime
    pub fn create_job<F, Fut>(&self, kind: impl Into<String>, runner: F) -> JobSnapshot
    where
        F: FnOnce(JobHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        self.create_job_with_cleanup(kind, runner, || async {})
    }

    /// [`Self::create_job`], running `cleanup` instead of the runner when the job is
    /// cancelled while still queued
    pub fn create_job_with_cleanup<F, Fut, C, CFut>(
        &self,
        kind: impl Into<String>,
        runner: F,
        cleanup: C,
    ) -> JobSnapshot
    where
        F: FnOnce(JobHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
        C: FnOnce() -> CFut + Send + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        self.purge();

        let id = Uuid::new_v4();
        let control = JobControl::new();
        let snapshot = self.store.insert(id, kind.into(), control.clone());
        tracing::info!("Job {} ({}) queued", id, snapshot.kind);

        let handle = JobHandle {
            id,
            store: Arc::clone(&self.store),
            control,
        };
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            if !store.mark_running(id) {
                tracing::info!("Job {} cancelled before start", id);
                cleanup().await;
                return;
            }
            let outcome = match tokio::spawn(runner(handle)).await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::internal(format!("pipeline task aborted: {}", e))),
            };
            store.finish(id, outcome);
        });

        snapshot
    }

    pub fn get_job(&self, id: Uuid) -> Option<JobSnapshot> {
        self.purge();
        self.store.get(id)
    }

    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.purge();
        self.store.list()
    }

    /// Idempotent: cancelling a terminal job returns its existing snapshot
    pub fn cancel_job(&self, id: Uuid) -> Option<JobSnapshot> {
        self.purge();
        self.store.cancel(id)
    }
}
