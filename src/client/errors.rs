//! Client-side API error type.
//!
//! Wraps a failed backend response (non-2xx status or unparseable body) and
//! classifies it so callers can decide whether a retry is worthwhile without
//! parsing messages themselves.

use serde::Deserialize;
use std::fmt;

/// How a failed request should be treated by retrying callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Likely to succeed later (timeouts, rate limits, 5xx, unknown outcome).
    Retryable,
    /// The server rejected the request; repeating it will not help.
    Permanent,
}

/// Loose shape of a backend error body.
///
/// Endpoints are not consistent about which field carries the text, so both
/// `error` and `message` are accepted:
/// ```json
/// { "success": false, "error": "Session not found" }
/// { "success": false, "message": "Database timeout, try again" }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ServerErrorBody {
    /// The most specific human-readable text in the body, if any.
    pub fn text(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Error returned when a backend API call fails at the HTTP level.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status, when the server answered at all.
    pub status: Option<u16>,
    /// Server-provided message, or a description of what went wrong.
    pub message: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Build an error from a raw response body, preferring the server's own
    /// message over the body text.
    pub fn from_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ServerErrorBody>(body)
            .ok()
            .and_then(|b| b.text().map(str::to_string))
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("request failed with HTTP status {status}")
                } else {
                    format!("request failed: {}", truncate(body, 256))
                }
            });

        Self::new(Some(status), message)
    }

    pub fn retry_class(&self) -> RetryClass {
        match self.status {
            None => RetryClass::Retryable,
            Some(408 | 429) => RetryClass::Retryable,
            Some(s) if (500..=599).contains(&s) => RetryClass::Retryable,
            Some(_) => RetryClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_class() == RetryClass::Retryable
    }

    /// True when the server says the target no longer exists.
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

fn truncate(body: &str, max_chars: usize) -> String {
    let mut preview: String = body.chars().take(max_chars).collect();
    if body.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}
