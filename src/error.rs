//! Error types for the manifest and orchestration layers.

use thiserror::Error;

/// Errors raised while validating a [`crate::manifest::Manifest`].
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document is missing a required field, has the wrong shape, or
    /// otherwise fails to parse.
    #[error("schema error: {reason}")]
    SchemaError { reason: String },

    /// A stored path would resolve outside `root_dir`.
    #[error("path escapes root_dir: {path}")]
    PathEscape { path: String },

    /// A remote URL uses a scheme outside the allowed set.
    #[error("remote url scheme not allowed: {url}")]
    UrlSchemeRejected { url: String },
}

/// A single failure accumulated during a backup or restore invocation.
///
/// Not an `Error` impl on purpose: these are collected into a per-invocation
/// list and reported as a batch, never propagated with `?`.
#[derive(Debug, Clone)]
pub struct ReportedError {
    pub context: String,
    pub message: String,
}

impl ReportedError {
    pub fn new(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ReportedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}
