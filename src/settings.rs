//! Per-invocation configuration value object. No process-global mutable
//! config: every component receives what it needs explicitly (§9).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::error::ManifestError;
use crate::safety;

/// `s3://bucket/prefix` parsed into its parts. The object-store layer itself
/// (`devenv-store`) only ever sees `(bucket, key)` pairs; this type exists
/// purely to parse the CLI-facing `--base` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Url {
    pub bucket: String,
    pub prefix: String,
}

impl S3Url {
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let rest = raw.strip_prefix("s3://").ok_or_else(|| ManifestError::SchemaError {
            reason: format!("expected s3://bucket/prefix, got {raw:?}"),
        })?;
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(ManifestError::SchemaError {
                reason: format!("missing bucket name in {raw:?}"),
            });
        }
        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    /// Join a relative key onto this URL's prefix.
    #[must_use]
    pub fn key(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}/{}", self.prefix, suffix)
        }
    }
}

pub const MAX_CONCURRENT_S3_OPS: usize = devenv_store::s3::MAX_CONCURRENT_S3_OPS;
pub const MAX_CONCURRENT_CLONES: usize = 4;
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared, per-invocation context passed to the Backup and Restore
/// orchestrators. Holds both semaphores named in §5's resource model so no
/// component needs to reach for process-global state.
pub struct Settings {
    pub root_dir: PathBuf,
    pub machine: String,
    pub overall_timeout: Duration,
    pub op_timeout: Duration,
    pub clone_timeout: Duration,
    pub store_semaphore: Arc<Semaphore>,
    pub clone_semaphore: Arc<Semaphore>,
    /// Restore-only: only agent-directory objects at or after this instant
    /// are restored. `None` means no filter.
    pub sessions_after: Option<DateTime<Utc>>,
    pub force: bool,
    pub dry_run: bool,
}

impl Settings {
    #[must_use]
    pub fn new(root_dir: PathBuf, machine_hint: Option<&str>) -> Self {
        let machine = machine_hint
            .map(safety::sanitize_hostname)
            .unwrap_or_else(|| safety::sanitize_hostname(&hostname_or_empty()));
        Self {
            root_dir,
            machine,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
            op_timeout: DEFAULT_OP_TIMEOUT,
            clone_timeout: DEFAULT_CLONE_TIMEOUT,
            store_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_S3_OPS)),
            clone_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_CLONES)),
            sessions_after: None,
            force: false,
            dry_run: false,
        }
    }
}

fn hostname_or_empty() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_prefix() {
        let url = S3Url::parse("s3://b/users/u/").unwrap();
        assert_eq!(url.bucket, "b");
        assert_eq!(url.prefix, "users/u");
        assert_eq!(url.key("manifest.json"), "users/u/manifest.json");
    }

    #[test]
    fn parses_bucket_with_no_prefix() {
        let url = S3Url::parse("s3://bucket-only").unwrap();
        assert_eq!(url.prefix, "");
        assert_eq!(url.key("x"), "x");
    }

    #[test]
    fn rejects_non_s3_scheme() {
        assert!(S3Url::parse("https://b/p").is_err());
    }
}
