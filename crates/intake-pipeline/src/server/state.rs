//! Application state for the intake server

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::Result;
use crate::media::MediaToolkit;
use crate::pipelines::PipelineServices;
use crate::processing::{JobManager, JobStore};
use crate::providers::{build_sink, HttpFetcher, OpenAiFactory, RetryPolicy, ThrottleRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Arc<AppConfig>,
    jobs: JobManager,
    services: Arc<PipelineServices>,
}

impl AppState {
    /// Build the production collaborators from configuration
    pub fn new(config: AppConfig) -> Result<Self> {
        let config = Arc::new(config);
        tracing::info!(
            "Initializing intake state (sink: {:?}, default provider: {})",
            config.sink.backend,
            config.providers.default_provider
        );

        let policy = RetryPolicy::from_config(&config.retry);
        let services = PipelineServices {
            config: Arc::clone(&config),
            sink: build_sink(&config.sink, policy.clone())?,
            fetcher: Arc::new(HttpFetcher::new(&config.drive, policy)?),
            media: MediaToolkit::new(config.media.clone()),
            backends: Arc::new(OpenAiFactory),
            throttles: Arc::new(ThrottleRegistry::new()),
        };
        Ok(Self::with_services(Arc::new(services)))
    }

    /// State over pre-built collaborators
    pub fn with_services(services: Arc<PipelineServices>) -> Self {
        let config = Arc::clone(&services.config);
        let jobs = JobManager::new(
            Arc::new(JobStore::new()),
            Duration::from_secs(config.jobs.ttl_secs),
        );
        Self {
            inner: Arc::new(AppStateInner {
                config,
                jobs,
                services,
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn jobs(&self) -> &JobManager {
        &self.inner.jobs
    }

    pub fn services(&self) -> Arc<PipelineServices> {
        Arc::clone(&self.inner.services)
    }
}
