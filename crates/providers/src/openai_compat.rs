//! OpenAI-compatible adapter.
//!
//! Covers OpenAI itself and DeepSeek, which follows the same chat
//! completions contract: GET `/v1/models` for listings, POST
//! `/v1/chat/completions` for completions, streamed as SSE with a
//! `data: [DONE]` terminator.

use std::sync::Arc;

use serde_json::Value;

use pl_domain::error::{Error, Result};
use pl_domain::provider::ProviderTag;
use pl_domain::stream::DeltaStream;

use crate::catalog::CatalogCache;
use crate::limiter::RateLimiter;
use crate::normalize::apply_emission_mode;
use crate::retry::{retry, RetryPolicy};
use crate::sse::{parse_openai_data, sse_response_stream};
use crate::traits::{ChatClient, ChatRequest};
use crate::util::{classify_status, from_reqwest, truncate};
use crate::{LIST_MODELS_TIMEOUT, NON_STREAM_TIMEOUT, STREAM_TIMEOUT};

/// Default OpenAI endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Default DeepSeek endpoint.
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
/// Response token cap sent with every completion.
const MAX_TOKENS: u32 = 4096;

/// Chat client for an OpenAI-compatible backend.
pub struct OpenAiCompatClient {
    tag: ProviderTag,
    base_url: String,
    api_key: Option<String>,
    /// Keep only model ids with this prefix when listing (OpenAI's chat
    /// family); `None` lists everything.
    model_prefix: Option<&'static str>,
    client: reqwest::Client,
    catalog: CatalogCache,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl OpenAiCompatClient {
    /// Client for the OpenAI API. Listings are filtered to the `gpt-`
    /// family; image and embedding models are not chat models.
    pub fn openai(
        api_key: Option<String>,
        base_url: Option<String>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Self::build(
            ProviderTag::OpenAi,
            base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_owned()),
            api_key,
            Some("gpt-"),
            limiter,
            retry,
        )
    }

    /// Client for the DeepSeek API.
    pub fn deepseek(
        api_key: Option<String>,
        base_url: Option<String>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Self::build(
            ProviderTag::DeepSeek,
            base_url.unwrap_or_else(|| DEEPSEEK_BASE_URL.to_owned()),
            api_key,
            None,
            limiter,
            retry,
        )
    }

    fn build(
        tag: ProviderTag,
        base_url: String,
        api_key: Option<String>,
        model_prefix: Option<&'static str>,
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
            model_prefix,
            client,
            catalog: CatalogCache::default(),
            limiter,
            retry,
        })
    }

    /// Bearer key; raised before any network call when absent.
    fn auth_key(&self) -> Result<String> {
        self.api_key.clone().ok_or_else(|| Error::AuthMissing {
            provider: self.tag.as_str().to_owned(),
        })
    }

    fn chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        serde_json::json!({
            "model": req.model,
            "messages": req.messages,
            "temperature": req.temperature,
            "max_tokens": MAX_TOKENS,
            "stream": stream,
        })
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        let key = self.auth_key()?;
        let provider = self.tag.as_str();
        let url = format!("{}/models", self.base_url);
        let http = self.client.clone();

        let body = retry(&self.retry, || {
            let http = http.clone();
            let url = url.clone();
            let key = key.clone();
            async move {
                let resp = http
                    .get(&url)
                    .bearer_auth(key)
                    .timeout(LIST_MODELS_TIMEOUT)
                    .send()
                    .await
                    .map_err(|e| from_reqwest(provider, e))?;
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
        let data = v
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::Format {
                provider: provider.to_owned(),
                detail: "missing 'data' array".into(),
            })?;
        Ok(data
            .iter()
            .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
            .filter(|id| self.model_prefix.map_or(true, |p| id.starts_with(p)))
            .map(str::to_owned)
            .collect())
    }
}

#[async_trait::async_trait]
impl ChatClient for OpenAiCompatClient {
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
        // Raise auth-missing before taking a limiter slot or touching the
        // network.
        self.auth_key()?;
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
        let url = format!("{}/chat/completions", self.base_url);
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
                let resp = http
                    .post(&url)
                    .bearer_auth(key)
                    .json(&body)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|e| from_reqwest(provider, e))?;
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
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|choice| choice.get("message"))
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
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.chat_body(req, true);
        let timeout = req.timeout.unwrap_or(STREAM_TIMEOUT);
        let model = req.model.clone();
        let http = self.client.clone();

        tracing::debug!(provider = %self.tag, model = %model, "chat stream request");

        // Retries cover request establishment only; a failure after the
        // body starts surfaces on the stream and the attempt restarts from
        // scratch only if the caller asks again.
        let resp = retry(&self.retry, || {
            let http = http.clone();
            let url = url.clone();
            let body = body.clone();
            let key = key.clone();
            let model = model.clone();
            async move {
                let resp = http
                    .post(&url)
                    .bearer_auth(key)
                    .json(&body)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|e| from_reqwest(provider, e))?;
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

        let raw = sse_response_stream(resp, provider, parse_openai_data);
        Ok(apply_emission_mode(raw, req.yield_full_response))
    }
}
