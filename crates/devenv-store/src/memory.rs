//! An in-memory [`ObjectStore`] test double.
//!
//! Backs every bucket with a single shared `HashMap<key, bytes>` (object
//! keys already carry the bucket-equivalent `{base}` prefix in every caller
//! of this crate, so one map is sufficient). Can be configured to fail the
//! next N attempts of a given key with a transient error, to exercise the
//! retry policy without a real network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use crate::error::StoreError;
use crate::store::{DownloadOutcome, ObjectStore};
use crate::types::{ListPage, ObjectMeta};

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Bytes, chrono::DateTime<Utc>)>>,
    /// key -> remaining number of transient failures to inject before
    /// succeeding.
    fail_next: Mutex<HashMap<String, u32>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    /// Cause the next `count` attempts against `bucket`/`key` to fail with a
    /// transient error before succeeding.
    pub fn inject_transient_failures(&self, bucket: &str, key: &str, count: u32) {
        self.fail_next
            .lock()
            .unwrap()
            .insert(Self::full_key(bucket, key), count);
    }

    fn maybe_fail(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let full = Self::full_key(bucket, key);
        let mut fail_next = self.fail_next.lock().unwrap();
        if let Some(remaining) = fail_next.get_mut(&full) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Transient {
                    message: format!("injected transient failure for {full}"),
                });
            }
        }
        Ok(())
    }

    /// Number of objects currently stored (for assertions in tests).
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<(), StoreError> {
        let bytes = tokio::fs::read(local_path).await?;
        self.upload_bytes(bucket, key, Bytes::from(bytes)).await
    }

    async fn upload_bytes(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        self.maybe_fail(bucket, key)?;
        self.objects
            .lock()
            .unwrap()
            .insert(Self::full_key(bucket, key), (bytes, Utc::now()));
        Ok(())
    }

    async fn download_file(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        overwrite: bool,
    ) -> Result<DownloadOutcome, StoreError> {
        if local_path.exists() && !overwrite {
            return Ok(DownloadOutcome::Skipped);
        }
        self.maybe_fail(bucket, key)?;

        let full = Self::full_key(bucket, key);
        let data = {
            let objects = self.objects.lock().unwrap();
            objects
                .get(&full)
                .map(|(bytes, _)| bytes.clone())
                .ok_or_else(|| StoreError::NotFound { key: full.clone() })?
        };

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &data).await?;
        Ok(DownloadOutcome::Downloaded)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<ListPage, StoreError> {
        let full_prefix = Self::full_key(bucket, prefix);
        let objects = self.objects.lock().unwrap();

        let mut page = ListPage::default();
        let mut seen_prefixes = std::collections::BTreeSet::new();

        for (full_key, (bytes, last_modified)) in objects.iter() {
            let Some(rest) = full_key.strip_prefix(&full_prefix) else {
                continue;
            };
            match rest.find('/') {
                Some(idx) => {
                    seen_prefixes.insert(format!("{}{}/", full_prefix, &rest[..idx]));
                }
                None => {
                    page.objects.push(ObjectMeta {
                        key: full_key.strip_prefix(&format!("{bucket}/")).unwrap_or(full_key).to_string(),
                        last_modified: *last_modified,
                        size: bytes.len() as u64,
                    });
                }
            }
        }
        page.common_prefixes = seen_prefixes
            .into_iter()
            .map(|p| p.strip_prefix(&format!("{bucket}/")).unwrap_or(&p).to_string())
            .collect();

        Ok(page)
    }
}
