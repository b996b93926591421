//! The real [`ObjectStore`] implementation, backed by `aws-sdk-s3`.
//!
//! Credentials come from the SDK's standard credential-discovery chain
//! (environment, profile, IMDS, …) — devenv never reads object-store
//! credentials from bespoke environment variables (§6).

use std::path::Path;
use std::sync::Arc;

use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Semaphore;

use crate::error::StoreError;
use crate::retry::with_retry;
use crate::store::{DownloadOutcome, ObjectStore};
use crate::types::{ListPage, ObjectMeta};

/// At most this many object-store operations run concurrently per
/// invocation (§4.4).
pub const MAX_CONCURRENT_S3_OPS: usize = 20;

pub struct S3Store {
    client: Client,
    concurrency: Arc<Semaphore>,
}

impl S3Store {
    /// Build a client from the ambient AWS configuration (standard
    /// credential-discovery chain).
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: Client::new(&config),
            concurrency: Arc::new(Semaphore::new(MAX_CONCURRENT_S3_OPS)),
        }
    }

    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            concurrency: Arc::new(Semaphore::new(MAX_CONCURRENT_S3_OPS)),
        }
    }
}

/// Classify an AWS SDK error per §4.4: transient ⇔ `429`/`500`/`503`/
/// `SlowDown`/`ServiceUnavailable` or a generic connection/timeout error.
fn classify<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: std::error::Error + aws_sdk_s3::error::ProvideErrorMetadata,
{
    let message = err.to_string();
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        SdkError::ServiceError(service_err) => {
            let code = service_err.err().code().unwrap_or_default();
            let status = service_err.raw().status().as_u16();
            status == 429
                || status == 500
                || status == 503
                || code.eq_ignore_ascii_case("SlowDown")
                || code.eq_ignore_ascii_case("ServiceUnavailable")
        }
        _ => false,
    };
    if transient {
        StoreError::Transient { message }
    } else {
        StoreError::Permanent { message }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<(), StoreError> {
        let _permit = self.concurrency.acquire().await.expect("semaphore closed");
        let local_path = local_path.to_path_buf();
        with_retry(|| {
            let local_path = local_path.clone();
            async move {
                let body = ByteStream::from_path(&local_path)
                    .await
                    .map_err(|e| StoreError::Permanent {
                        message: format!("failed to stream {}: {e}", local_path.display()),
                    })?;
                self.client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(body)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(classify)
            }
        })
        .await
    }

    async fn upload_bytes(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        let _permit = self.concurrency.acquire().await.expect("semaphore closed");
        with_retry(|| {
            let bytes = bytes.clone();
            async move {
                self.client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(bytes))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(classify)
            }
        })
        .await
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

        let _permit = self.concurrency.acquire().await.expect("semaphore closed");
        with_retry(|| async move {
            let resp = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(classify)?;

            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let mut file = tokio::fs::File::create(local_path).await?;
            let mut body = resp.body;
            // The SDK's ByteStream yields chunks up to its internal buffer
            // size (8 MiB by default for S3 GetObject); we write each as it
            // arrives rather than re-buffering the whole body.
            loop {
                match body.try_next().await {
                    Ok(Some(chunk)) => {
                        file.write_all(&chunk).await?;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        return Err(StoreError::Transient {
                            message: format!("stream error reading {key}: {e}"),
                        });
                    }
                }
            }
            file.flush().await?;
            Ok(DownloadOutcome::Downloaded)
        })
        .await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<ListPage, StoreError> {
        let _permit = self.concurrency.acquire().await.expect("semaphore closed");
        let mut page = ListPage::default();
        let mut continuation: Option<String> = None;

        loop {
            let resp = with_retry(|| {
                let continuation = continuation.clone();
                async move {
                    let mut req = self
                        .client
                        .list_objects_v2()
                        .bucket(bucket)
                        .prefix(prefix)
                        .delimiter("/");
                    if let Some(token) = continuation {
                        req = req.continuation_token(token);
                    }
                    req.send().await.map_err(classify)
                }
            })
            .await?;

            for obj in resp.contents() {
                let key = obj.key().unwrap_or_default().to_string();
                let last_modified = obj
                    .last_modified()
                    .and_then(|dt| Utc.timestamp_opt(dt.secs(), 0).single())
                    .unwrap_or_else(Utc::now);
                let size = u64::try_from(obj.size().unwrap_or(0)).unwrap_or(0);
                page.objects.push(ObjectMeta {
                    key,
                    last_modified,
                    size,
                });
            }
            for common in resp.common_prefixes() {
                if let Some(p) = common.prefix() {
                    page.common_prefixes.push(p.to_string());
                }
            }

            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(page)
    }
}
