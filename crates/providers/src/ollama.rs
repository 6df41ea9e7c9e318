//! Ollama adapter, local and cloud.
//!
//! Both variants share the wire format: GET `/api/tags` for the model list
//! and POST `/api/chat` for completions, streamed as newline-delimited JSON.
//! The cloud variant authenticates with a bearer key and defaults to
//! `https://ollama.com`.

use std::sync::Arc;

use serde_json::Value;

use pl_domain::error::{Error, Result};
use pl_domain::provider::ProviderTag;
use pl_domain::stream::DeltaStream;

use crate::catalog::CatalogCache;
use crate::limiter::RateLimiter;
use crate::ndjson::ndjson_response_stream;
use crate::normalize::apply_emission_mode;
use crate::retry::{retry, RetryPolicy};
use crate::traits::{ChatClient, ChatRequest};
use crate::util::{classify_status, from_reqwest, truncate};
use crate::{LIST_MODELS_TIMEOUT, NON_STREAM_TIMEOUT, STREAM_TIMEOUT};

/// Default base URL for the cloud variant.
pub const OLLAMA_CLOUD_BASE_URL: &str = "https://ollama.com";

/// Chat client for an Ollama server (self-hosted or cloud).
pub struct OllamaClient {
    tag: ProviderTag,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    catalog: CatalogCache,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl OllamaClient {
    /// Client for a self-hosted server; no authentication.
    pub fn local(
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Self::build(ProviderTag::Ollama, base_url.into(), None, limiter, retry)
    }

    /// Client for Ollama Cloud; bearer-authenticated.
    ///
    /// A missing key is accepted at construction and surfaces as
    /// `auth-missing` on first use, before any network call.
    pub fn cloud(
        api_key: Option<String>,
        base_url: Option<String>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Self::build(
            ProviderTag::OllamaCloud,
            base_url.unwrap_or_else(|| OLLAMA_CLOUD_BASE_URL.to_owned()),
            api_key,
            limiter,
            retry,
        )
    }

    fn build(
        tag: ProviderTag,
        base_url: String,
        api_key: Option<String>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| from_reqwest(tag.as_str(), e))?;
        Ok(Self {
            tag,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
            catalog: CatalogCache::default(),
            limiter,
            retry,
        })
    }

    /// Resolve the bearer key, if this variant needs one.
    fn auth_key(&self) -> Result<Option<String>> {
        match (self.tag, &self.api_key) {
            (ProviderTag::Ollama, _) => Ok(None),
            (_, Some(key)) => Ok(Some(key.clone())),
            (_, None) => Err(Error::AuthMissing {
                provider: self.tag.as_str().to_owned(),
            }),
        }
    }

    fn chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        serde_json::json!({
            "model": req.model,
            "messages": req.messages,
            "stream": stream,
            "options": { "temperature": req.temperature },
        })
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        let key = self.auth_key()?;
        let provider = self.tag.as_str();
        let url = format!("{}/api/tags", self.base_url);
        let http = self.client.clone();

        let body = retry(&self.retry, || {
            let http = http.clone();
            let url = url.clone();
            let key = key.clone();
            async move {
                let mut builder = http.get(&url).timeout(LIST_MODELS_TIMEOUT);
                if let Some(key) = key {
                    builder = builder.bearer_auth(key);
                }
                let resp = builder.send().await.map_err(|e| from_reqwest(provider, e))?;
                let status = resp.status();
                let text = resp.text().await.map_err(|e| from_reqwest(provider, e))?;
                if !status.is_success() {
                    return Err(classify_status(provider, status.as_u16(), &text, None));
                }
                Ok(text)
            }
        })
        .await?;

        let v: Value = serde_json::from_str(&body).map_err(|_| Error::Format {
            provider: provider.to_owned(),
            detail: truncate(&body, 200).into_owned(),
        })?;
        let models = v
            .get("models")
            .and_then(|m| m.as_array())
            .ok_or_else(|| Error::Format {
                provider: provider.to_owned(),
                detail: "missing 'models' array".into(),
            })?;
        Ok(models
            .iter()
            .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
            .map(str::to_owned)
            .collect())
    }
}

#[async_trait::async_trait]
impl ChatClient for OllamaClient {
    fn tag(&self) -> ProviderTag {
        self.tag
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        if let Some(models) = self.catalog.get() {
            return Ok(models);
        }
        self.refresh_models().await
    }

    async fn refresh_models(&self) -> Result<Vec<String>> {
        self.limiter.acquire(self.tag).await;
        let models = self.fetch_models().await?;
        tracing::info!(provider = %self.tag, count = models.len(), "fetched model list");
        self.catalog.store(&models);
        Ok(models)
    }

    fn clear_cache(&self) {
        self.catalog.clear();
    }

    async fn chat(&self, req: &ChatRequest) -> Result<String> {
        let key = self.auth_key()?;
        self.limiter.acquire(self.tag).await;

        let provider = self.tag.as_str();
        let url = format!("{}/api/chat", self.base_url);
        let body = self.chat_body(req, false);
        let timeout = req.timeout.unwrap_or(NON_STREAM_TIMEOUT);
        let model = req.model.clone();
        let http = self.client.clone();

        tracing::debug!(provider = %self.tag, model = %model, "chat request");

        let text = retry(&self.retry, || {
            let http = http.clone();
            let url = url.clone();
            let body = body.clone();
            let key = key.clone();
            let model = model.clone();
            async move {
                let mut builder = http.post(&url).json(&body).timeout(timeout);
                if let Some(key) = key {
                    builder = builder.bearer_auth(key);
                }
                let resp = builder.send().await.map_err(|e| from_reqwest(provider, e))?;
                let status = resp.status();
                let text = resp.text().await.map_err(|e| from_reqwest(provider, e))?;
                if !status.is_success() {
                    return Err(classify_status(
                        provider,
                        status.as_u16(),
                        &text,
                        Some(&model),
                    ));
                }
                Ok(text)
            }
        })
        .await?;

        let v: Value = serde_json::from_str(&text).map_err(|_| Error::Format {
            provider: provider.to_owned(),
            detail: truncate(&text, 200).into_owned(),
        })?;
        match v
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        {
            Some(content) if !content.is_empty() => Ok(content.to_owned()),
            _ => Err(Error::Format {
                provider: provider.to_owned(),
                detail: truncate(&text, 200).into_owned(),
            }),
        }
    }

    async fn chat_stream(&self, req: &ChatRequest) -> Result<DeltaStream> {
        let key = self.auth_key()?;
        self.limiter.acquire(self.tag).await;

        let provider = self.tag.as_str();
        let url = format!("{}/api/chat", self.base_url);
        let body = self.chat_body(req, true);
        let timeout = req.timeout.unwrap_or(STREAM_TIMEOUT);
        let model = req.model.clone();
        let http = self.client.clone();

        tracing::debug!(provider = %self.tag, model = %model, "chat stream request");

        // Retries cover request establishment only; once the body starts
        // streaming, a failure surfaces on the stream and the attempt is
        // not resumed.
        let resp = retry(&self.retry, || {
            let http = http.clone();
            let url = url.clone();
            let body = body.clone();
            let key = key.clone();
            let model = model.clone();
            async move {
                let mut builder = http.post(&url).json(&body).timeout(timeout);
                if let Some(key) = key {
                    builder = builder.bearer_auth(key);
                }
                let resp = builder.send().await.map_err(|e| from_reqwest(provider, e))?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.map_err(|e| from_reqwest(provider, e))?;
                    return Err(classify_status(
                        provider,
                        status.as_u16(),
                        &text,
                        Some(&model),
                    ));
                }
                Ok(resp)
            }
        })
        .await?;

        let raw = ndjson_response_stream(resp, provider);
        Ok(apply_emission_mode(raw, req.yield_full_response))
    }
}
