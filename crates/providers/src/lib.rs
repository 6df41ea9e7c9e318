//! Provider-abstracted chat clients.
//!
//! One [`ChatClient`] trait over four backends: Ollama (local), Ollama Cloud,
//! OpenAI, and DeepSeek. Completions come in non-streaming and streaming
//! form; streaming responses are normalised to a finite delta sequence
//! regardless of the backend's wire framing. Model listings are cached with a
//! TTL. Every outbound request passes the process-wide [`RateLimiter`] and
//! the [`retry`] driver.

mod catalog;
mod factory;
mod limiter;
mod ndjson;
mod normalize;
mod ollama;
mod openai_compat;
pub mod retry;
mod sse;
mod traits;
mod util;

pub use factory::{ClientFactory, ClientOptions};
pub use limiter::RateLimiter;
pub use ollama::OllamaClient;
pub use openai_compat::OpenAiCompatClient;
pub use retry::RetryPolicy;
pub use traits::{ChatClient, ChatRequest};
pub use util::mask_secrets;

/// Per-call request cap for non-streaming completions.
pub const NON_STREAM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
/// Per-call request cap for streaming completions.
pub const STREAM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);
/// Model listings are fetched with a short timeout of their own.
pub const LIST_MODELS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
