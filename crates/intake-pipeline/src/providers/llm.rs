//! LLM backend trait: one attempt per call, with an explicit credential
//!
//! Implementations:
//! - `OpenAiCompatible`: any `/chat/completions` + `/audio/transcriptions` API
//!   (OpenAI, Groq, Gemini's OpenAI endpoint, local servers)
//!
//! Retries, throttling and key rotation live in [`super::retry::ResilientClient`].

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::{ProviderError, Result};
use super::runtime::ProviderRuntimeConfig;

/// A single-turn chat completion
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Ask the provider for a JSON object response
    pub json_mode: bool,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn json(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            prompt: prompt.into(),
            json_mode: true,
            temperature: 0.1,
        }
    }
}

/// A document page or image for OCR
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub filename: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// An audio file for transcription
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub filename: String,
    pub data: Bytes,
}

/// Trait for a raw LLM provider
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Chat completion text
    async fn chat(&self, api_key: &str, request: &ChatRequest) -> std::result::Result<String, ProviderError>;

    /// Text content of a document
    async fn ocr(&self, api_key: &str, request: &OcrRequest) -> std::result::Result<String, ProviderError>;

    /// Transcript of an audio clip
    async fn transcribe(&self, api_key: &str, clip: &AudioClip) -> std::result::Result<String, ProviderError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Builds a backend for one job's resolved provider config
pub trait BackendFactory: Send + Sync {
    fn build(&self, runtime: &ProviderRuntimeConfig) -> Result<Arc<dyn LlmBackend>>;
}
