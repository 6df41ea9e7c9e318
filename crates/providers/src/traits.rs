use std::time::Duration;

use pl_domain::error::Result;
use pl_domain::message::Message;
use pl_domain::provider::ProviderTag;
use pl_domain::stream::DeltaStream;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// The conversation to send.
    pub messages: Vec<Message>,
    /// Model identifier on the target backend.
    pub model: String,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f32,
    /// Streaming emission mode: `true` yields the accumulated utterance
    /// after every fragment, `false` yields the new fragment alone.
    pub yield_full_response: bool,
    /// Per-request timeout override; clients fall back to the per-call caps.
    pub timeout: Option<Duration>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature,
            yield_full_response: false,
            timeout: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every backend adapter implements.
///
/// Implementations translate between the internal types and the wire format
/// of each backend's HTTP API. Instances are cheap to construct and intended
/// for single-threaded use; callers needing parallelism construct more.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    /// Backend family this client talks to.
    fn tag(&self) -> ProviderTag;

    /// Ordered model identifiers, served from the TTL cache when fresh.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Force a re-fetch, replacing the cache.
    async fn refresh_models(&self) -> Result<Vec<String>>;

    /// Drop the cached model listing.
    fn clear_cache(&self);

    /// Send a completion request and wait for the full response text.
    async fn chat(&self, req: &ChatRequest) -> Result<String>;

    /// Send a completion request and return the delta stream.
    ///
    /// The stream is finite and `Done`-terminated. Dropping it aborts the
    /// underlying HTTP read at the next chunk boundary.
    async fn chat_stream(&self, req: &ChatRequest) -> Result<DeltaStream>;
}
