//! The [`ObjectStore`] trait — the single abstraction boundary between
//! devenv and its cloud object store.
//!
//! This is the one place in devenv where dynamic dispatch earns its keep
//! (per the spec's design notes): a capability interface with two concrete
//! implementations, a real [`crate::s3::S3Store`] and an in-memory
//! [`crate::memory::MemoryStore`] fake that can simulate transient errors
//! for retry tests.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;
use crate::types::ListPage;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `local_path`'s contents to `bucket`/`key`. Never buffers the
    /// whole file in memory.
    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<(), StoreError>;

    /// Upload an in-memory payload (used for the manifest JSON).
    async fn upload_bytes(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<(), StoreError>;

    /// Stream `bucket`/`key`'s body in 8 MiB chunks into `local_path`,
    /// creating parent directories as needed.
    ///
    /// Returns `Ok(DownloadOutcome::Skipped)` without touching the network
    /// if `local_path` already exists and `overwrite` is false.
    async fn download_file(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        overwrite: bool,
    ) -> Result<DownloadOutcome, StoreError>;

    /// Paginated enumeration of objects under `prefix`, using `/` as the
    /// delimiter so common prefixes (immediate "subdirectories") are
    /// returned alongside direct-child objects.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<ListPage, StoreError>;
}

/// Whether a `download_file` call actually touched the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    Skipped,
}
