//! Shared utility functions for provider adapters.

use pl_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeouts map to [`Error::Timeout`]; connection-level failures (refused,
/// reset, DNS) map to [`Error::Network`]. Both are retryable.
pub(crate) fn from_reqwest(provider: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{provider}: {e}"))
    } else {
        Error::Network(format!("{provider}: {e}"))
    }
}

/// Map a non-2xx status plus response body to the error taxonomy.
///
/// `model` is the completion model when the call was a completion; a 404
/// then names the missing model instead of reporting a bare HTTP error.
pub(crate) fn classify_status(
    provider: &str,
    status: u16,
    body: &str,
    model: Option<&str>,
) -> Error {
    let body_lower = body.to_lowercase();
    match status {
        401 | 403 => Error::AuthFailed {
            provider: provider.to_owned(),
        },
        429 => Error::RateLimited {
            provider: provider.to_owned(),
        },
        400 | 422 => Error::BadRequest {
            provider: provider.to_owned(),
            message: truncate(body, 200).into_owned(),
        },
        404 => match model {
            Some(m) => Error::ModelUnavailable {
                provider: provider.to_owned(),
                model: m.to_owned(),
            },
            None => Error::Http {
                provider: provider.to_owned(),
                status,
                message: truncate(body, 200).into_owned(),
            },
        },
        _ if model.is_some()
            && (body_lower.contains("model_not_found")
                || body_lower.contains("model is not available")) =>
        {
            Error::ModelUnavailable {
                provider: provider.to_owned(),
                model: model.unwrap_or_default().to_owned(),
            }
        }
        _ => Error::Http {
            provider: provider.to_owned(),
            status,
            message: truncate(body, 200).into_owned(),
        },
    }
}

/// Truncate a string to at most `max` characters, appending an ellipsis
/// marker when content was dropped.
pub(crate) fn truncate(s: &str, max: usize) -> std::borrow::Cow<'_, str> {
    if s.chars().count() <= max {
        return std::borrow::Cow::Borrowed(s);
    }
    let cut: String = s.chars().take(max).collect();
    std::borrow::Cow::Owned(format!("{cut}..."))
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message, so raw secrets never reach logs or event channels.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}
