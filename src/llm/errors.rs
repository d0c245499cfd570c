use reqwest::StatusCode;
use serde_json::Value;

use crate::config::ConfigError;

const ERROR_BODY_LIMIT: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("upstream model returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("model reply was malformed: {0}")]
    MalformedReply(String),
    #[error("image input is unusable: {0}")]
    InvalidImage(String),
    #[error("request to the model failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model reply is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl AiError {
    /// HTTP 429 from the provider.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            AiError::Upstream { status, .. } => *status == StatusCode::TOO_MANY_REQUESTS,
            AiError::Http(err) => err.status() == Some(StatusCode::TOO_MANY_REQUESTS),
            _ => false,
        }
    }

    pub fn upstream(status: StatusCode, raw_body: &str) -> Self {
        let (message, body) = summarize_error_body(raw_body);
        AiError::Upstream {
            status,
            body: message.unwrap_or(body),
        }
    }
}

pub(crate) fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

/// Provider error message when the body carries one, plus the (truncated) body itself.
pub(crate) fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), ERROR_BODY_LIMIT));
    }

    (None, truncate_for_log(trimmed, ERROR_BODY_LIMIT))
}
