use std::time::Duration;

use serde::{Deserialize, Serialize};

use thiserror::Error;

/// Broad error category driving retry behavior and user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient network or transport failure (timeouts, disconnects).
    /// Retryable.
    TransientNetwork,
    /// The request itself was invalid (oversize body, malformed payload).
    /// Not retryable.
    Validation,
    /// The server denied the operation (channel write denied). Not
    /// retryable.
    Permission,
    /// Internal replay/ordering anomaly (duplicate confirmed id, cursor
    /// regression). Logged and absorbed, never surfaced as a user-facing
    /// failure.
    Consistency,
}

/// Stable error payload crossing the core's boundaries.
///
/// `code` is machine-readable and stable across releases; `message` is
/// human-readable and free to change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct CoreError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl CoreError {
    /// Construct a new core error.
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Whether the failed operation may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::TransientNetwork
    }

    /// Standard send-timeout error.
    pub fn timeout() -> Self {
        Self::new(
            ErrorCategory::TransientNetwork,
            "timeout",
            "request timed out before the server responded",
        )
    }

    /// Standard oversize-body validation error.
    pub fn message_too_long(len: usize, max: usize) -> Self {
        Self::new(
            ErrorCategory::Validation,
            "message_too_long",
            format!("message body is {len} bytes, limit is {max}"),
        )
    }

    /// Standard write-denied permission error.
    pub fn write_denied(detail: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permission, "write_denied", detail.into())
    }
}

/// Map HTTP status codes from the transport edge into error categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Permission,
        408 | 429 => ErrorCategory::TransientNetwork,
        400..=499 => ErrorCategory::Validation,
        500..=599 => ErrorCategory::TransientNetwork,
        _ => ErrorCategory::Consistency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(403), ErrorCategory::Permission);
        assert_eq!(classify_http_status(408), ErrorCategory::TransientNetwork);
        assert_eq!(classify_http_status(413), ErrorCategory::Validation);
        assert_eq!(classify_http_status(503), ErrorCategory::TransientNetwork);
        assert_eq!(classify_http_status(700), ErrorCategory::Consistency);
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(CoreError::timeout().is_retryable());
        assert!(!CoreError::message_too_long(10, 5).is_retryable());
        assert!(!CoreError::write_denied("muted").is_retryable());
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = CoreError::timeout().with_retry_after(Duration::from_secs(2));
        assert_eq!(err.retry_after_ms, Some(2000));
    }

    #[test]
    fn keeps_stable_codes() {
        assert_eq!(CoreError::timeout().code, "timeout");
        assert_eq!(CoreError::message_too_long(2, 1).code, "message_too_long");
        assert_eq!(CoreError::write_denied("x").code, "write_denied");
    }
}
