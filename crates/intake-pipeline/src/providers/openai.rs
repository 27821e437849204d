//! OpenAI-compatible backend for chat, vision OCR and speech-to-text
//!
//! Works against any server exposing `/chat/completions` and
//! `/audio/transcriptions`.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProviderError, Result};

use super::llm::{AudioClip, BackendFactory, ChatRequest, LlmBackend, OcrRequest};
use super::runtime::ProviderRuntimeConfig;

/// Instruction sent with every OCR request
const OCR_PROMPT: &str = "Transcribe all text in this document exactly as written. \
Preserve question numbering and line breaks. Output only the transcribed text.";

/// Longest error body kept in a `ProviderError::Status`
const MAX_ERROR_BODY: usize = 500;

/// OpenAI-compatible HTTP backend
pub struct OpenAiCompatible {
    client: reqwest::Client,
    runtime: ProviderRuntimeConfig,
}

impl OpenAiCompatible {
    pub fn new(runtime: ProviderRuntimeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, runtime })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.runtime.base_url, path)
    }

    async fn complete(
        &self,
        api_key: &str,
        body: &ChatCompletionRequest<'_>,
        timeout: Duration,
    ) -> std::result::Result<String, ProviderError> {
        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(api_key)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Decode("No content in chat completion".to_string()))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl LlmBackend for OpenAiCompatible {
    async fn chat(
        &self,
        api_key: &str,
        request: &ChatRequest,
    ) -> std::result::Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let body = ChatCompletionRequest {
            model: &self.runtime.chat_model,
            messages,
            temperature: request.temperature,
            response_format: request
                .json_mode
                .then(|| json!({ "type": "json_object" })),
        };
        self.complete(api_key, &body, self.runtime.chat_timeout).await
    }

    async fn ocr(
        &self,
        api_key: &str,
        request: &OcrRequest,
    ) -> std::result::Result<String, ProviderError> {
        let data_url = format!(
            "data:{};base64,{}",
            request.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&request.data)
        );
        let document_part = if request.mime_type == "application/pdf" {
            json!({
                "type": "file",
                "file": { "filename": request.filename, "file_data": data_url }
            })
        } else {
            json!({ "type": "image_url", "image_url": { "url": data_url } })
        };

        let body = ChatCompletionRequest {
            model: &self.runtime.ocr_model,
            messages: vec![json!({
                "role": "user",
                "content": [{ "type": "text", "text": OCR_PROMPT }, document_part],
            })],
            temperature: 0.0,
            response_format: None,
        };
        self.complete(api_key, &body, self.runtime.ocr_timeout).await
    }

    async fn transcribe(
        &self,
        api_key: &str,
        clip: &AudioClip,
    ) -> std::result::Result<String, ProviderError> {
        let part = reqwest::multipart::Part::bytes(clip.data.to_vec())
            .file_name(clip.filename.clone())
            .mime_str("audio/mpeg")
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.runtime.transcription_model.clone())
            .text("response_format", "json")
            .part("file", part);

        let response = self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(api_key)
            .timeout(self.runtime.transcription_timeout)
            .multipart(form)
            .send()
            .await?;
        let response = check_status(response).await?;

        let transcript: TranscriptionResponse = response.json().await?;
        Ok(transcript.text)
    }

    fn name(&self) -> &str {
        &self.runtime.provider
    }
}

/// Map a non-success response to `ProviderError::Status`
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        body.truncate(cut);
    }

    Err(ProviderError::Status {
        status: status.as_u16(),
        retry_after,
        body,
    })
}

/// `Retry-After` in delta-seconds form
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        // saturate; the retry policy caps the wait anyway
        .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Builds [`OpenAiCompatible`] backends
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiFactory;

impl BackendFactory for OpenAiFactory {
    fn build(&self, runtime: &ProviderRuntimeConfig) -> Result<Arc<dyn LlmBackend>> {
        Ok(Arc::new(OpenAiCompatible::new(runtime.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn runtime(base_url: &str) -> ProviderRuntimeConfig {
        ProviderRuntimeConfig {
            provider: "test".to_string(),
            base_url: base_url.to_string(),
            chat_model: "chat-model".to_string(),
            ocr_model: "vision-model".to_string(),
            transcription_model: "whisper".to_string(),
            api_keys: vec!["k1".to_string()],
            chat_timeout: Duration::from_secs(5),
            ocr_timeout: Duration::from_secs(5),
            transcription_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_chat_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer k1"))
            .and(body_partial_json(json!({
                "model": "chat-model",
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"questions\":[]}" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiCompatible::new(runtime(&server.uri())).unwrap();
        let text = backend
            .chat("k1", &ChatRequest::json("system", "prompt"))
            .await
            .unwrap();
        assert_eq!(text, "{\"questions\":[]}");
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let backend = OpenAiCompatible::new(runtime(&server.uri())).unwrap();
        let err = backend
            .chat("k1", &ChatRequest::json("s", "p"))
            .await
            .unwrap_err();
        match err {
            ProviderError::Status {
                status,
                retry_after,
                body,
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ocr_sends_image_as_data_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "model": "vision-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "Q1. What is a lifetime?" } }]
            })))
            .mount(&server)
            .await;

        let backend = OpenAiCompatible::new(runtime(&server.uri())).unwrap();
        let request = OcrRequest {
            filename: "page.png".to_string(),
            mime_type: "image/png".to_string(),
            data: bytes::Bytes::from_static(b"\x89PNG"),
        };
        let text = backend.ocr("k1", &request).await.unwrap();
        assert_eq!(text, "Q1. What is a lifetime?");

        let received = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        let url = body["messages"][0]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_transcribe_reads_text_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "text": "hello there" })),
            )
            .mount(&server)
            .await;

        let backend = OpenAiCompatible::new(runtime(&server.uri())).unwrap();
        let clip = AudioClip {
            filename: "part_000.mp3".to_string(),
            data: bytes::Bytes::from_static(b"ID3"),
        };
        assert_eq!(backend.transcribe("k1", &clip).await.unwrap(), "hello there");
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, "2.5".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(2500)));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_huge_retry_after_is_capped_by_policy() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "1e30".parse().unwrap());
        let retry_after = parse_retry_after(&headers);
        assert_eq!(retry_after, Some(Duration::MAX));

        let policy = crate::providers::RetryPolicy::default();
        assert_eq!(policy.delay(0, retry_after), Duration::from_secs(30));
    }
}
