//! Error taxonomy for the store seams
//!
//! Comprehensive error taxonomy using thiserror. The engine's own modules
//! define operation-specific errors; these are the shared failures that any
//! key-value or document-store backend can surface.

use thiserror::Error;

/// Key-value cache errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KvError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("capability not supported: {0}")]
    UnsupportedCapability(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unexpected reply shape: {0}")]
    ReplyShape(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Document store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("item not found: {0}")]
    NotFound(u32),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Upstream marketplace API errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketApiError {
    #[error("HTTP status {status}")]
    Status { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("upstream error {code}: {message}")]
    Upstream { code: i64, message: String },
}

impl MarketApiError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Upstream application errors (bad key, bad item id) are stable and
    /// retrying them only burns rate-limit budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MarketApiError::Upstream { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_errors_are_fatal() {
        let err = MarketApiError::Upstream {
            code: 2,
            message: "Incorrect key".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_and_status_errors_are_retryable() {
        assert!(MarketApiError::Transport("connection reset".to_string()).is_retryable());
        assert!(MarketApiError::Status { status: 502 }.is_retryable());
        assert!(MarketApiError::Malformed("truncated body".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = KvError::ReplyShape("expected [cursor, keys]".to_string());
        assert_eq!(
            err.to_string(),
            "unexpected reply shape: expected [cursor, keys]"
        );
    }
}
