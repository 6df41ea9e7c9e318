//! Shared error type used across all Parley crates.
//!
//! One flat enum; the retry driver inspects [`Error::is_retryable`] and the
//! dialogue engine reports [`Error::kind`] on its event channel. No type
//! hierarchy, no downcasting.

/// Shared error type used across all Parley crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Connection-level failure: refused, reset, DNS.
    #[error("network: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Non-2xx HTTP status that does not map to a more specific variant.
    #[error("provider {provider}: HTTP {status} - {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },

    /// No API key configured; raised before any network call.
    #[error("provider {provider}: no API key configured")]
    AuthMissing { provider: String },

    /// 401/403 from the backend.
    #[error("provider {provider}: authentication failed, check credentials")]
    AuthFailed { provider: String },

    /// 429 from the backend.
    #[error("provider {provider}: rate limited")]
    RateLimited { provider: String },

    /// 400/422 from the backend.
    #[error("provider {provider}: invalid request - {message}")]
    BadRequest { provider: String, message: String },

    /// Empty or shape-mismatched response body.
    #[error("provider {provider}: unexpected response format - {detail}")]
    Format { provider: String, detail: String },

    /// 404 on completion, or a provider-specific "model not found".
    #[error("provider {provider}: model '{model}' not available")]
    ModelUnavailable { provider: String, model: String },

    /// Decryption under the wrong password; callers treat this as
    /// "no key configured".
    #[error("credential decryption failed (wrong password or corrupt record)")]
    CredentialMismatch,

    #[error("config: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    Deadline,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the retry driver may re-attempt the operation.
    ///
    /// Retryable: timeouts, connection-level failures, 429, 5xx.
    /// Everything else surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Network(_) | Error::RateLimited { .. } => true,
            Error::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Stable category name, reported on the dialogue event channel.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) | Error::Yaml(_) => "format-error",
            Error::Network(_) | Error::Timeout(_) => "transient-network",
            Error::Http { status, .. } if *status >= 500 => "transient-network",
            Error::Http { .. } => "bad-request",
            Error::AuthMissing { .. } => "auth-missing",
            Error::AuthFailed { .. } => "auth-failed",
            Error::RateLimited { .. } => "rate-limited",
            Error::BadRequest { .. } => "bad-request",
            Error::Format { .. } => "format-error",
            Error::ModelUnavailable { .. } => "model-unavailable",
            Error::CredentialMismatch => "credential-mismatch",
            Error::Config(_) => "config",
            Error::Cancelled => "cancelled",
            Error::Deadline => "deadline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Timeout("t".into()).is_retryable());
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::RateLimited {
            provider: "openai".into()
        }
        .is_retryable());
        assert!(Error::Http {
            provider: "openai".into(),
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!Error::Http {
            provider: "openai".into(),
            status: 418,
            message: "teapot".into()
        }
        .is_retryable());
        assert!(!Error::AuthFailed {
            provider: "openai".into()
        }
        .is_retryable());
        assert!(!Error::BadRequest {
            provider: "openai".into(),
            message: "bad".into()
        }
        .is_retryable());
        assert!(!Error::Format {
            provider: "ollama".into(),
            detail: "empty body".into()
        }
        .is_retryable());
        assert!(!Error::CredentialMismatch.is_retryable());
    }

    #[test]
    fn kind_names() {
        assert_eq!(
            Error::AuthMissing {
                provider: "openai".into()
            }
            .kind(),
            "auth-missing"
        );
        assert_eq!(
            Error::RateLimited {
                provider: "deepseek".into()
            }
            .kind(),
            "rate-limited"
        );
        assert_eq!(
            Error::Http {
                provider: "ollama".into(),
                status: 502,
                message: "bad gateway".into()
            }
            .kind(),
            "transient-network"
        );
        assert_eq!(Error::CredentialMismatch.kind(), "credential-mismatch");
        assert_eq!(Error::Deadline.kind(), "deadline");
    }
}
