use bytes::Bytes;
use devenv_store::{DownloadOutcome, MemoryStore, ObjectStore};
use tempfile::tempdir;

#[tokio::test]
async fn upload_then_download_round_trips() {
    let store = MemoryStore::new();
    store
        .upload_bytes("bucket", "dev01/2026-01-20/manifest.json", Bytes::from_static(b"{}"))
        .await
        .unwrap();

    let dir = tempdir().unwrap();
    let dest = dir.path().join("manifest.json");
    let outcome = store
        .download_file("bucket", "dev01/2026-01-20/manifest.json", &dest, false)
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Downloaded);
    assert_eq!(std::fs::read(&dest).unwrap(), b"{}");
}

#[tokio::test]
async fn download_skips_existing_file_without_force() {
    let store = MemoryStore::new();
    store
        .upload_bytes("bucket", "dev01/2026-01-20/files/note.md", Bytes::from_static(b"new"))
        .await
        .unwrap();

    let dir = tempdir().unwrap();
    let dest = dir.path().join("note.md");
    std::fs::write(&dest, b"old").unwrap();

    let outcome = store
        .download_file("bucket", "dev01/2026-01-20/files/note.md", &dest, false)
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Skipped);
    assert_eq!(std::fs::read(&dest).unwrap(), b"old");

    let outcome = store
        .download_file("bucket", "dev01/2026-01-20/files/note.md", &dest, true)
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Downloaded);
    assert_eq!(std::fs::read(&dest).unwrap(), b"new");
}

#[tokio::test]
async fn list_backups_returns_common_prefixes() {
    let store = MemoryStore::new();
    for name in ["2026-01-20", "2026-02-01"] {
        store
            .upload_bytes("bucket", &format!("users/u/dev01/{name}/manifest.json"), Bytes::new())
            .await
            .unwrap();
    }

    let page = store.list("bucket", "users/u/dev01/").await.unwrap();
    assert!(page.objects.is_empty());
    let mut prefixes = page.common_prefixes.clone();
    prefixes.sort();
    assert_eq!(
        prefixes,
        vec![
            "users/u/dev01/2026-01-20/".to_string(),
            "users/u/dev01/2026-02-01/".to_string(),
        ]
    );
}

#[tokio::test]
async fn retry_succeeds_after_injected_transient_failures() {
    let store = MemoryStore::new();
    store.inject_transient_failures("bucket", "k", 2);
    // upload_bytes doesn't itself retry (retry lives in S3Store); this test
    // documents that the fake's injected failures are consumed one at a time.
    assert!(store.upload_bytes("bucket", "k", Bytes::new()).await.is_err());
    assert!(store.upload_bytes("bucket", "k", Bytes::new()).await.is_err());
    assert!(store.upload_bytes("bucket", "k", Bytes::new()).await.is_ok());
}

#[tokio::test]
async fn download_missing_object_is_not_found() {
    let store = MemoryStore::new();
    let dir = tempdir().unwrap();
    let err = store
        .download_file("bucket", "missing", &dir.path().join("x"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, devenv_store::StoreError::NotFound { .. }));
}
