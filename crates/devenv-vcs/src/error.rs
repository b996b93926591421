//! Error types for jj operations.
//!
//! [`JjError`] is the single error type returned by all [`JjDriver`](crate::JjDriver)
//! methods. It uses rich enum variants so callers can match on specific failure
//! modes (timeout, non-zero exit, unparsable output) without scraping
//! stderr text, except where the spec itself calls for stderr sniffing
//! (stale-workspace detection).

use thiserror::Error;

/// Errors returned by [`JjDriver`](crate::JjDriver) operations.
#[derive(Debug, Error)]
pub enum JjError {
    /// The subprocess did not complete within its allotted timeout.
    #[error("jj {operation} timed out after {timeout_secs}s")]
    Timeout {
        /// The logical operation being attempted (e.g. `"clone"`).
        operation: String,
        /// The timeout that was exceeded.
        timeout_secs: u64,
    },

    /// The subprocess exited with a non-zero status.
    #[error("jj {operation} failed: {stderr}")]
    NonZeroExit {
        /// The logical operation being attempted.
        operation: String,
        /// Captured stderr (and, where jj interleaves it, stdout).
        stderr: String,
    },

    /// The subprocess succeeded but its output could not be parsed into the
    /// expected record shape.
    #[error("failed to parse jj {operation} output: {reason}")]
    ParseError {
        /// The logical operation being attempted.
        operation: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The working copy reported "stale" and the single recovery attempt
    /// (`update-stale`, then retry) still did not resolve it.
    #[error("workspace at {path} remained stale after recovery attempt")]
    Stale {
        /// The workspace path that stayed stale.
        path: String,
    },

    /// Failed to spawn the `jj` subprocess at all (e.g. binary not found).
    #[error("failed to spawn jj: {0}")]
    Spawn(#[from] std::io::Error),
}
