//! External collaborators behind traits: LLM backends, row sinks and remote files
//!
//! Every LLM call goes through [`ResilientClient`], which adds throttling, retries
//! and key rotation on top of a single-attempt [`LlmBackend`].

pub mod fetch;
pub mod llm;
pub mod openai;
pub mod retry;
pub mod runtime;
pub mod sink;
#[cfg(test)]
pub(crate) mod testing;

pub use fetch::{HttpFetcher, RemoteFetcher};
pub use llm::{AudioClip, BackendFactory, ChatRequest, LlmBackend, OcrRequest};
pub use openai::{OpenAiCompatible, OpenAiFactory};
pub use retry::{KeyRing, ResilientClient, RetryPolicy, Throttle, ThrottleRegistry};
pub use runtime::ProviderRuntimeConfig;
pub use sink::{build_sink, MemorySink, RowSink, SheetTarget, SheetsSink};
