//! Error types for object-store operations.

use thiserror::Error;

/// Errors returned by [`crate::store::ObjectStore`] operations.
///
/// `is_transient` drives the retry policy (§4.4): transient ⇔ error code in
/// `{429, 500, 503, SlowDown, ServiceUnavailable}` or a generic
/// connection/timeout error. All other errors fail immediately.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A transient, retryable failure (throttling, 5xx, connection reset).
    #[error("transient object-store error: {message}")]
    Transient { message: String },

    /// A permanent failure — wrong credentials, 4xx other than 429, missing
    /// object, local I/O failure. Not retried.
    #[error("object-store error: {message}")]
    Permanent { message: String },

    /// The requested object does not exist.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Local filesystem I/O failed while streaming a file body.
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}
