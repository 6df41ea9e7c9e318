//! Client construction.
//!
//! A tagged option record per backend feeds [`ClientFactory::create`], which
//! returns the trait object. The factory carries the process-wide rate
//! limiter and retry policy so every client it builds shares them;
//! construction itself is cheap and there is no global registry.

use std::sync::Arc;

use pl_domain::error::{Error, Result};
use pl_domain::provider::ProviderTag;

use crate::limiter::RateLimiter;
use crate::ollama::OllamaClient;
use crate::openai_compat::OpenAiCompatClient;
use crate::retry::RetryPolicy;
use crate::traits::ChatClient;

/// Construction options, one variant per backend family.
#[derive(Debug, Clone)]
pub enum ClientOptions {
    Ollama {
        base_url: String,
    },
    OllamaCloud {
        api_key: Option<String>,
        base_url: Option<String>,
    },
    OpenAi {
        api_key: Option<String>,
        base_url: Option<String>,
    },
    DeepSeek {
        api_key: Option<String>,
        base_url: Option<String>,
    },
}

impl ClientOptions {
    pub fn tag(&self) -> ProviderTag {
        match self {
            ClientOptions::Ollama { .. } => ProviderTag::Ollama,
            ClientOptions::OllamaCloud { .. } => ProviderTag::OllamaCloud,
            ClientOptions::OpenAi { .. } => ProviderTag::OpenAi,
            ClientOptions::DeepSeek { .. } => ProviderTag::DeepSeek,
        }
    }

    /// Build options from a provider tag string plus loose fields, the shape
    /// config files and CLIs supply. Unknown tags are rejected.
    pub fn from_tag(
        tag: &str,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        match tag.parse::<ProviderTag>()? {
            ProviderTag::Ollama => {
                let base_url = base_url
                    .ok_or_else(|| Error::Config("ollama requires a base_url".into()))?;
                Ok(ClientOptions::Ollama { base_url })
            }
            ProviderTag::OllamaCloud => Ok(ClientOptions::OllamaCloud { api_key, base_url }),
            ProviderTag::OpenAi => Ok(ClientOptions::OpenAi { api_key, base_url }),
            ProviderTag::DeepSeek => Ok(ClientOptions::DeepSeek { api_key, base_url }),
        }
    }
}

/// Builds chat clients sharing one limiter and retry policy.
pub struct ClientFactory {
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl ClientFactory {
    pub fn new() -> Self {
        Self {
            limiter: Arc::new(RateLimiter::default()),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with(limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self { limiter, retry }
    }

    /// The shared limiter, for hosts that also gate their own calls.
    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Construct a client for the given options.
    pub fn create(&self, opts: ClientOptions) -> Result<Arc<dyn ChatClient>> {
        let limiter = self.limiter.clone();
        let retry = self.retry;
        let client: Arc<dyn ChatClient> = match opts {
            ClientOptions::Ollama { base_url } => {
                Arc::new(OllamaClient::local(base_url, limiter, retry)?)
            }
            ClientOptions::OllamaCloud { api_key, base_url } => {
                Arc::new(OllamaClient::cloud(api_key, base_url, limiter, retry)?)
            }
            ClientOptions::OpenAi { api_key, base_url } => {
                Arc::new(OpenAiCompatClient::openai(api_key, base_url, limiter, retry)?)
            }
            ClientOptions::DeepSeek { api_key, base_url } => {
                Arc::new(OpenAiCompatClient::deepseek(api_key, base_url, limiter, retry)?)
            }
        };
        tracing::debug!(provider = %client.tag(), "created chat client");
        Ok(client)
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new()
    }
}
