//! Scripted LLM backend for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::llm::{AudioClip, ChatRequest, LlmBackend, OcrRequest};
use super::retry::{KeyRing, ResilientClient, RetryPolicy, Throttle};
use crate::error::ProviderError;

pub type Outcome = std::result::Result<String, ProviderError>;

/// Replays chat outcomes in order and records the key and prompt of every call
pub struct ScriptedBackend {
    outcomes: Mutex<VecDeque<Outcome>>,
    keys_used: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            keys_used: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn keys_used(&self) -> Vec<String> {
        self.keys_used.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

pub fn status(code: u16) -> Outcome {
    Err(ProviderError::Status {
        status: code,
        retry_after: None,
        body: String::new(),
    })
}

/// Client over `backend` with no throttling and the default retry policy
pub fn client(backend: Arc<ScriptedBackend>, keys: &[&str]) -> ResilientClient {
    ResilientClient::new(
        backend,
        KeyRing::new(keys.iter().map(|k| k.to_string()).collect()).unwrap(),
        Arc::new(Throttle::new(Duration::ZERO)),
        RetryPolicy::default(),
    )
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn chat(&self, api_key: &str, request: &ChatRequest) -> Outcome {
        self.keys_used.lock().push(api_key.to_string());
        self.prompts.lock().push(request.prompt.clone());
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("default".to_string()))
    }

    async fn ocr(&self, _: &str, _: &OcrRequest) -> Outcome {
        unreachable!()
    }

    async fn transcribe(&self, _: &str, _: &AudioClip) -> Outcome {
        unreachable!()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
