//! End-to-end round trips through the public API: real discovery over a
//! temp directory, a fake jj driver, and an in-memory object store standing
//! in for S3.

use std::fs;

use devenv_core::backup::{self, BackupRequest};
use devenv_core::restore::{self, RestoreRequest};
use devenv_core::settings::{S3Url, Settings};
use devenv_store::{MemoryStore, ObjectStore};
use devenv_vcs::{FakeJjDriver, JjDriver};
use tempfile::tempdir;

#[tokio::test]
async fn fresh_backup_then_restore_onto_a_clean_machine() {
    let source_root = tempdir().unwrap();
    let repo_path = source_root.path().join("proj");
    fs::create_dir_all(repo_path.join(".jj").join("repo")).unwrap();
    fs::write(repo_path.join("README.md"), "notes").unwrap();

    let capture_jj = FakeJjDriver::new();
    capture_jj
        .clone_colocated("git@host:user/proj.git", &repo_path)
        .await
        .unwrap();
    capture_jj.edit(&repo_path, "cafef00d").await.unwrap();

    let store = MemoryStore::new();
    let base = S3Url::parse("s3://backups/alice").unwrap();
    let mut settings = Settings::new(source_root.path().to_path_buf(), Some("laptop"));

    let backup_outcome = backup::run(
        &capture_jj,
        &store,
        BackupRequest {
            settings: &settings,
            base: &base,
            name: "2026-07-28",
            include_files: true,
            agent_instructions: Some("resume the devenv-backup branch".to_string()),
            claude_dir_source: None,
            opencode_dir_source: None,
        },
    )
    .await;

    assert!(backup_outcome.errors.is_empty(), "errors: {:?}", backup_outcome.errors);
    assert!(backup_outcome.uploaded);
    assert!(backup_outcome.manifest.workspaces.contains_key("proj"));
    assert!(!store.is_empty());

    // Restore onto a different root_dir with a driver that has never seen
    // this repo — the orchestrator must clone it from scratch.
    let dest_root = tempdir().unwrap();
    let dest_repo_path = dest_root.path().join("proj");
    let restore_jj = FakeJjDriver::new();
    let mut restore_settings = Settings::new(dest_root.path().to_path_buf(), Some("laptop"));

    // The manifest records the source machine's absolute paths; rewrite them
    // onto the restore destination the way a real manifest captured on this
    // same machine would already match.
    let mut manifest = backup_outcome.manifest;
    manifest.root_dir = dest_root.path().display().to_string();
    for repo in manifest.workspaces.values_mut() {
        for ws in repo.workspaces.values_mut() {
            ws.path = dest_repo_path.display().to_string();
        }
    }
    let restore_outcome = restore::run(
        &restore_jj,
        &store,
        RestoreRequest {
            settings: &restore_settings,
            base: &base,
            name: "2026-07-28",
            manifest_bytes: Some(manifest.to_json_bytes().unwrap()),
            claude_dir_destination: None,
            opencode_dir_destination: None,
        },
    )
    .await;

    assert!(
        restore_outcome.is_success(),
        "errors: {:?} fatal: {:?}",
        restore_outcome.errors,
        restore_outcome.fatal
    );
    let state = restore_jj.current_state(&dest_repo_path).await.unwrap();
    assert_eq!(state.change_id.0, "cafef00d");
    assert_eq!(restore_outcome.files_downloaded, 1);
    assert!(dest_root.path().join("proj").join("README.md").exists());
}

#[tokio::test]
async fn restore_skips_existing_files_unless_forced() {
    let store = MemoryStore::new();
    let base = S3Url::parse("s3://backups/alice").unwrap();
    let dest_root = tempdir().unwrap();
    fs::write(dest_root.path().join("note.md"), "old content").unwrap();

    store
        .upload_bytes(&base.bucket, &base.key("laptop/2026-07-28/files/note.md"), "new content".into())
        .await
        .unwrap();

    let manifest_json = format!(
        r#"{{"version":2,"captured_at":"2026-07-28T00:00:00Z","hostname":"laptop","root_dir":"{}","workspaces":{{}},"uncommitted":[],"files":[{{"relative_path":"note.md","size":11,"mtime":"2026-07-28T00:00:00Z"}}]}}"#,
        dest_root.path().display()
    );

    let jj = FakeJjDriver::new();
    let mut settings = Settings::new(dest_root.path().to_path_buf(), Some("laptop"));

    let outcome = restore::run(
        &jj,
        &store,
        RestoreRequest {
            settings: &settings,
            base: &base,
            name: "2026-07-28",
            manifest_bytes: Some(manifest_json.into_bytes()),
            claude_dir_destination: None,
            opencode_dir_destination: None,
        },
    )
    .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.files_skipped, 1);
    assert_eq!(outcome.files_downloaded, 0);
    assert_eq!(fs::read_to_string(dest_root.path().join("note.md")).unwrap(), "old content");

    settings.force = true;
    let outcome = restore::run(
        &jj,
        &store,
        RestoreRequest {
            settings: &settings,
            base: &base,
            name: "2026-07-28",
            manifest_bytes: Some(
                format!(
                    r#"{{"version":2,"captured_at":"2026-07-28T00:00:00Z","hostname":"laptop","root_dir":"{}","workspaces":{{}},"uncommitted":[],"files":[{{"relative_path":"note.md","size":11,"mtime":"2026-07-28T00:00:00Z"}}]}}"#,
                    dest_root.path().display()
                )
                .into_bytes(),
            ),
            claude_dir_destination: None,
            opencode_dir_destination: None,
        },
    )
    .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.files_downloaded, 1);
    assert_eq!(fs::read_to_string(dest_root.path().join("note.md")).unwrap(), "new content");
}

#[tokio::test]
async fn restore_filters_agent_sessions_by_sessions_after() {
    let store = MemoryStore::new();
    let base = S3Url::parse("s3://backups/alice").unwrap();
    store
        .upload_bytes(&base.bucket, &base.key("claude-code/laptop/projects/foo/session-1.jsonl"), "old".into())
        .await
        .unwrap();

    let dest_root = tempdir().unwrap();
    let dest_claude = dest_root.path().join("claude-dest");
    let manifest_json = format!(
        r#"{{"version":2,"captured_at":"2026-07-28T00:00:00Z","hostname":"laptop","root_dir":"{}","workspaces":{{}},"uncommitted":[],"files":null}}"#,
        dest_root.path().display()
    );

    let jj = FakeJjDriver::new();
    let mut settings = Settings::new(dest_root.path().to_path_buf(), Some("laptop"));
    settings.sessions_after = Some("2099-01-01T00:00:00Z".parse().unwrap());

    let outcome = restore::run(
        &jj,
        &store,
        RestoreRequest {
            settings: &settings,
            base: &base,
            name: "2026-07-28",
            manifest_bytes: Some(manifest_json.into_bytes()),
            claude_dir_destination: Some(dest_claude.clone()),
            opencode_dir_destination: None,
        },
    )
    .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.agent_files_downloaded, 0);
    assert_eq!(outcome.agent_files_skipped_by_date, 1);
    assert!(!dest_claude.join("projects/foo/session-1.jsonl").exists());
}

#[tokio::test]
async fn list_backups_enumerates_common_prefixes() {
    let store = MemoryStore::new();
    let base = S3Url::parse("s3://backups/alice").unwrap();
    store
        .upload_bytes(&base.bucket, &base.key("laptop/2026-07-01/manifest.json"), "{}".into())
        .await
        .unwrap();
    store
        .upload_bytes(&base.bucket, &base.key("laptop/2026-07-28/manifest.json"), "{}".into())
        .await
        .unwrap();

    let names = restore::list_backups(&store, &base, "laptop").await.unwrap();
    assert_eq!(names, vec!["2026-07-01".to_string(), "2026-07-28".to_string()]);
}
