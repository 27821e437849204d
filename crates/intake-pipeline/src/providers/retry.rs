//! Retry with backoff, per-provider throttling and credential rotation

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::error::{Error, ProviderError, Result};
use crate::processing::JobControl;

use super::llm::{AudioClip, ChatRequest, LlmBackend, OcrRequest};

/// Backoff policy for retryable provider failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts_per_key: u32,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts_per_key: config.max_attempts_per_key.max(1),
            max_wait: Duration::from_secs(config.max_wait_secs),
        }
    }

    /// Wait before the next attempt; `attempt` is zero-based
    ///
    /// A server-provided `Retry-After` wins over exponential backoff. Both are capped at
    /// `max_wait`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max_wait);
        }
        let jitter: f64 = rand::thread_rng().gen_range(0.0..0.7);
        let secs = 2f64.powi(attempt.min(16) as i32) + jitter + 0.2;
        Duration::from_secs_f64(secs.min(self.max_wait.as_secs_f64()))
    }
}

impl RetryPolicy {
    /// Run `call` again while it fails with a retryable provider error
    ///
    /// Used for single-endpoint HTTP calls (sheets, downloads) that have no key to
    /// rotate. Each attempt starts from scratch.
    pub async fn run<T, F, Fut>(&self, what: &str, control: &JobControl, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            control.throw_if_cancelled()?;
            let result = call().await;
            control.throw_if_cancelled()?;

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let retry_after = match &err {
                Error::Provider(provider) if provider.is_retryable() => provider.retry_after(),
                _ => return Err(err),
            };

            attempt += 1;
            if attempt >= self.max_attempts_per_key {
                return Err(err);
            }
            let wait = self.delay(attempt - 1, retry_after);
            tracing::warn!(
                "{} attempt {} failed: {}, retrying in {:.1}s",
                what,
                attempt,
                err,
                wait.as_secs_f64()
            );
            control.sleep(wait).await?;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Enforces a minimum interval between consecutive calls to one provider
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserve the next free call slot and wait for it
    ///
    /// The lock only covers the reservation, so a cancelled caller stops waiting at
    /// once instead of queueing behind earlier callers.
    pub async fn acquire(&self, control: &JobControl) -> Result<()> {
        if self.min_interval.is_zero() {
            return control.throw_if_cancelled();
        }
        let wait = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot - now
        };
        control.sleep(wait).await
    }
}

/// Process-wide throttles, one per provider id
#[derive(Debug, Default)]
pub struct ThrottleRegistry {
    throttles: DashMap<String, Arc<Throttle>>,
}

impl ThrottleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, provider: &str, min_interval: Duration) -> Arc<Throttle> {
        self.throttles
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Throttle::new(min_interval)))
            .clone()
    }
}

/// Credentials for one job, rotated round-robin
#[derive(Debug, Clone)]
pub struct KeyRing {
    keys: Arc<Vec<String>>,
    cursor: Arc<AtomicUsize>,
    pinned: Option<usize>,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::Config("No API keys available".to_string()));
        }
        Ok(Self {
            keys: Arc::new(keys),
            cursor: Arc::new(AtomicUsize::new(0)),
            pinned: None,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// A ring that always starts at key `unit % len`
    pub fn pinned(&self, unit: usize) -> Self {
        Self {
            keys: self.keys.clone(),
            cursor: self.cursor.clone(),
            pinned: Some(unit % self.keys.len()),
        }
    }

    /// Keys in the order one call should try them
    pub fn rotation(&self) -> Vec<String> {
        let n = self.keys.len();
        let start = match self.pinned {
            Some(index) => index,
            None => self.cursor.fetch_add(1, Ordering::Relaxed) % n,
        };
        (0..n).map(|i| self.keys[(start + i) % n].clone()).collect()
    }
}

/// Provider calls wrapped in throttling, retries and key rotation
#[derive(Clone)]
pub struct ResilientClient {
    backend: Arc<dyn LlmBackend>,
    keys: KeyRing,
    throttle: Arc<Throttle>,
    policy: RetryPolicy,
}

impl ResilientClient {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        keys: KeyRing,
        throttle: Arc<Throttle>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            keys,
            throttle,
            policy,
        }
    }

    /// Same client, starting every call at the key assigned to `unit`
    pub fn pinned(&self, unit: usize) -> Self {
        Self {
            keys: self.keys.pinned(unit),
            ..self.clone()
        }
    }

    pub fn provider(&self) -> &str {
        self.backend.name()
    }

    pub async fn chat(&self, request: &ChatRequest, control: &JobControl) -> Result<String> {
        let backend = &self.backend;
        self.execute("chat", control, move |key| async move {
            backend.chat(&key, request).await
        })
        .await
    }

    pub async fn ocr(&self, request: &OcrRequest, control: &JobControl) -> Result<String> {
        let backend = &self.backend;
        self.execute("ocr", control, move |key| async move {
            backend.ocr(&key, request).await
        })
        .await
    }

    pub async fn transcribe(&self, clip: &AudioClip, control: &JobControl) -> Result<String> {
        let backend = &self.backend;
        self.execute("transcription", control, move |key| async move {
            backend.transcribe(&key, clip).await
        })
        .await
    }

    /// Run `call` until it succeeds, a non-retryable error occurs, or every key
    /// has used up its attempts
    pub async fn execute<T, F, Fut>(&self, operation: &str, control: &JobControl, call: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let keys = self.keys.rotation();
        let mut last_error = None;

        for (key_index, key) in keys.iter().enumerate() {
            for attempt in 0..self.policy.max_attempts_per_key {
                control.throw_if_cancelled()?;
                self.throttle.acquire(control).await?;

                let result = call(key.clone()).await;
                control.throw_if_cancelled()?;

                let err = match result {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                };

                if !err.is_retryable() {
                    return Err(Error::Provider(err));
                }

                if attempt + 1 >= self.policy.max_attempts_per_key {
                    tracing::warn!(
                        "{} {} failed {} times on key #{}: {}",
                        self.backend.name(),
                        operation,
                        attempt + 1,
                        key_index + 1,
                        err
                    );
                    last_error = Some(err);
                    break;
                }

                let wait = self.policy.delay(attempt, err.retry_after());
                tracing::warn!(
                    "{} {} attempt {} failed: {}, retrying in {:.1}s",
                    self.backend.name(),
                    operation,
                    attempt + 1,
                    err,
                    wait.as_secs_f64()
                );
                last_error = Some(err);
                control.sleep(wait).await?;
            }
        }

        Err(Error::Provider(last_error.unwrap_or_else(|| {
            ProviderError::Transport("no credentials were tried".to_string())
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{client, status, ScriptedBackend as Scripted};
    use parking_lot::Mutex as SyncMutex;

    fn request() -> ChatRequest {
        ChatRequest::json("s", "p")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_with_backoff() {
        let backend = Scripted::new(vec![status(429), status(429), Ok("ok".to_string())]);
        let client = client(backend.clone(), &["k1"]);

        let start = Instant::now();
        let text = client.chat(&request(), &JobControl::new()).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(text, "ok");
        assert_eq!(backend.keys_used().len(), 3);
        // (1 + j0 + 0.2) + (2 + j1 + 0.2), jitter in [0, 0.7)
        assert!(elapsed >= Duration::from_millis(3400), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(4800), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotates_key_after_exhausting_attempts() {
        let backend = Scripted::new(vec![
            status(503),
            status(503),
            status(503),
            status(503),
            Ok("second key".to_string()),
        ]);
        let client = client(backend.clone(), &["a", "b"]);

        let text = client.chat(&request(), &JobControl::new()).await.unwrap();
        assert_eq!(text, "second key");
        assert_eq!(backend.keys_used(), vec!["a", "a", "a", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_keys_exhausted_returns_last_error() {
        let backend = Scripted::new((0..8).map(|_| status(500)).collect());
        let client = client(backend.clone(), &["a", "b"]);

        let err = client.chat(&request(), &JobControl::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ProviderError::Status { status: 500, .. })
        ));
        assert_eq!(backend.keys_used().len(), 8);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let backend = Scripted::new(vec![status(400)]);
        let client = client(backend.clone(), &["a", "b"]);

        let err = client.chat(&request(), &JobControl::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ProviderError::Status { status: 400, .. })
        ));
        assert_eq!(backend.keys_used().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_aborts() {
        let backend = Scripted::new((0..4).map(|_| status(429)).collect());
        let client = client(backend.clone(), &["k1"]);
        let control = JobControl::new();

        let canceller = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let err = client.chat(&request(), &control).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(backend.keys_used().len(), 1);
    }

    #[test]
    fn test_delay_respects_retry_after_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.delay(0, Some(Duration::from_secs(120))),
            Duration::from_secs(30)
        );
        assert_eq!(policy.delay(10, None), Duration::from_secs(30));

        let first = policy.delay(0, None);
        assert!(first >= Duration::from_millis(1200) && first < Duration::from_millis(1900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_failures_only() {
        let counter = SyncMutex::new(0u32);
        let calls = &counter;
        let policy = RetryPolicy::default();
        let control = JobControl::new();

        let value = policy
            .run("upload", &control, move || async move {
                let mut n = calls.lock();
                *n += 1;
                if *n < 3 {
                    Err(Error::Provider(ProviderError::Timeout))
                } else {
                    Ok(*n)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);

        *calls.lock() = 0;
        let err = policy
            .run("upload", &control, move || async move {
                *calls.lock() += 1;
                Err::<(), _>(Error::Sink("bad request".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Sink(_)));
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_key_ring_round_robin_and_pinning() {
        let ring = KeyRing::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(ring.rotation(), vec!["a", "b", "c"]);
        assert_eq!(ring.rotation(), vec!["b", "c", "a"]);

        let pinned = ring.pinned(4);
        assert_eq!(pinned.rotation(), vec!["b", "c", "a"]);
        assert_eq!(pinned.rotation(), vec!["b", "c", "a"]);

        assert!(KeyRing::new(Vec::new()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_calls() {
        let throttle = Throttle::new(Duration::from_millis(250));
        let control = JobControl::new();
        let start = Instant::now();
        for _ in 0..3 {
            throttle.acquire(&control).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_leaves_throttle_queue() {
        let throttle = Arc::new(Throttle::new(Duration::from_secs(10)));
        let busy = JobControl::new();
        // three callers ahead hold slots up to 30s out
        for _ in 0..3 {
            let throttle = throttle.clone();
            let busy = busy.clone();
            tokio::spawn(async move { throttle.acquire(&busy).await });
        }
        tokio::task::yield_now().await;

        let control = JobControl::new();
        let canceller = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = throttle.acquire(&control).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());
    }

    #[test]
    fn test_registry_shares_throttle_per_provider() {
        let registry = ThrottleRegistry::new();
        let a = registry.get("openai", Duration::from_millis(1));
        let b = registry.get("openai", Duration::from_millis(1));
        let c = registry.get("groq", Duration::from_millis(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
