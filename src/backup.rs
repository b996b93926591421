//! Backup Orchestrator: composes Discovery + Manifest + Object-Store to
//! upload files, agent directories, and finally the manifest as the atomic
//! commit point (§4.5).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use devenv_store::ObjectStore;
use devenv_vcs::JjDriver;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::agent_sync;
use crate::discovery::{self, DiscoveryResult};
use crate::error::ReportedError;
use crate::manifest::{Manifest, RepoData, UncommittedChange, WorkspaceData};
use crate::settings::{S3Url, Settings};

pub struct BackupRequest<'a> {
    pub settings: &'a Settings,
    pub base: &'a S3Url,
    pub name: &'a str,
    pub include_files: bool,
    pub agent_instructions: Option<String>,
    pub claude_dir_source: Option<PathBuf>,
    pub opencode_dir_source: Option<PathBuf>,
}

pub struct BackupOutcome {
    pub manifest: Manifest,
    pub errors: Vec<ReportedError>,
    /// Present only for `manifest`-subcommand-style invocations that never
    /// touch the object store; `None` once the manifest has been uploaded.
    pub uploaded: bool,
}

/// Run a backup per §4.5. `dry_run` short-circuits before any upload: the
/// manifest is still built in memory (so callers can inspect/print it) but
/// nothing is sent to the object store.
#[instrument(skip(jj, store, request), fields(name = request.name))]
pub async fn run(
    jj: &(dyn JjDriver),
    store: &(dyn ObjectStore),
    request: BackupRequest<'_>,
) -> BackupOutcome {
    let errors: Arc<Mutex<Vec<ReportedError>>> = Arc::new(Mutex::new(Vec::new()));
    let discovered = discovery::discover(&request.settings.root_dir);
    for w in &discovered.warnings {
        warn!(%w, "discovery warning");
    }

    let manifest = build_manifest(jj, &discovered, &request).await;
    {
        let mut guard = errors.lock().await;
        guard.extend(discovered.warnings.clone());
    }

    if request.settings.dry_run {
        let collected = Arc::try_unwrap(errors).map(Mutex::into_inner).unwrap_or_default();
        return BackupOutcome {
            manifest,
            errors: collected,
            uploaded: false,
        };
    }

    if request.include_files {
        upload_files(store, &request, &discovered.files, &errors).await;
    }

    if let Some(src) = &request.claude_dir_source {
        sync_agent_dir(store, &request.base, &format!("claude-code/{}", request.settings.machine), src, agent_sync::claude_code_included, &errors).await;
    }
    if let Some(src) = &request.opencode_dir_source {
        sync_agent_dir(store, &request.base, &format!("opencode/{}", request.settings.machine), src, agent_sync::opencode_included, &errors).await;
    }

    let manifest_key = request.base.key(&format!("{}/{}/manifest.json", request.settings.machine, request.name));
    let uploaded = match manifest.to_json_bytes() {
        Ok(bytes) => match store.upload_bytes(&request.base.bucket, &manifest_key, Bytes::from(bytes)).await {
            Ok(()) => {
                info!(key = %manifest_key, "manifest uploaded: backup is now observable");
                true
            }
            Err(e) => {
                errors.lock().await.push(ReportedError::new("manifest upload", e.to_string()));
                false
            }
        },
        Err(e) => {
            errors.lock().await.push(ReportedError::new("manifest serialization", e.to_string()));
            false
        }
    };

    let collected = Arc::try_unwrap(errors).map(Mutex::into_inner).unwrap_or_default();
    BackupOutcome {
        manifest,
        errors: collected,
        uploaded,
    }
}

async fn build_manifest(jj: &(dyn JjDriver), discovered: &DiscoveryResult, request: &BackupRequest<'_>) -> Manifest {
    let mut taken_names: HashSet<String> = HashSet::new();
    let mut workspaces: BTreeMap<String, RepoData> = BTreeMap::new();
    let mut uncommitted: Vec<UncommittedChange> = Vec::new();

    for repo in &discovered.repos {
        let remotes = match jj.list_remotes(&repo.primary_path).await {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %repo.primary_path.display(), error = %e, "failed to list remotes; skipping repo");
                continue;
            }
        };

        let Some(base_name) = discovery::derive_repo_name(&remotes) else {
            warn!(path = %repo.primary_path.display(), "repo has no valid remote; skipping");
            continue;
        };
        let has_allowed_scheme = remotes
            .iter()
            .any(|r| crate::manifest::ALLOWED_URL_SCHEMES.iter().any(|s| r.url.starts_with(s)));
        if !has_allowed_scheme {
            warn!(path = %repo.primary_path.display(), "repo has no remote with an allowed URL scheme; skipping");
            continue;
        }

        let name = discovery::disambiguate_name(&base_name, &taken_names);
        taken_names.insert(name.clone());

        let mut ws_map = BTreeMap::new();
        for ws in &repo.workspaces {
            let state = match jj.current_state(&ws.path).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %ws.path.display(), error = %e, "failed to read workspace state; skipping workspace");
                    continue;
                }
            };
            ws_map.insert(
                ws.name.clone(),
                WorkspaceData {
                    path: ws.path.display().to_string(),
                    current_change_id: state.change_id.0.clone(),
                    current_commit_id: state.commit_id.0.clone(),
                    bookmark: state.bookmark.clone(),
                },
            );

            if let Ok(records) = jj.list_uncommitted(&ws.path).await {
                for record in records {
                    uncommitted.push(UncommittedChange {
                        change_id: record.change_id.0,
                        commit_id: record.commit_id.0,
                        description: record.description,
                        bookmark: record.bookmark,
                        repo: name.clone(),
                    });
                }
            }
        }

        workspaces.insert(
            name,
            RepoData {
                remotes: remotes.into_iter().map(|r| (r.name, r.url)).collect(),
                workspaces: ws_map,
            },
        );
    }

    let files = if request.include_files {
        Some(stat_files(&request.settings.root_dir, &discovered.files))
    } else {
        None
    };
    let symlinks = if discovered.symlinks.is_empty() {
        None
    } else {
        Some(
            discovered
                .symlinks
                .iter()
                .filter_map(|s| {
                    let relative_path = s.link_path.strip_prefix(&request.settings.root_dir).ok()?;
                    Some(crate::manifest::SymlinkEntry {
                        relative_path: relative_path.to_string_lossy().replace('\\', "/"),
                        target: s.target_relative.clone(),
                    })
                })
                .collect(),
        )
    };

    Manifest {
        version: if request.include_files { 2 } else { 1 },
        captured_at: Utc::now(),
        hostname: request.settings.machine.clone(),
        root_dir: request.settings.root_dir.display().to_string(),
        workspaces,
        uncommitted,
        agent_instructions: request.agent_instructions.clone(),
        files,
        symlinks,
    }
}

fn stat_files(root: &Path, files: &[PathBuf]) -> Vec<crate::manifest::FileEntry> {
    files
        .iter()
        .filter_map(|path| {
            let metadata = std::fs::metadata(path).ok()?;
            let relative = path.strip_prefix(root).ok()?;
            let mtime = metadata.modified().ok().map(chrono::DateTime::<Utc>::from)?;
            Some(crate::manifest::FileEntry {
                relative_path: relative.to_string_lossy().replace('\\', "/"),
                size: metadata.len(),
                mtime,
            })
        })
        .collect()
}

async fn upload_files(
    store: &(dyn ObjectStore),
    request: &BackupRequest<'_>,
    files: &[PathBuf],
    errors: &Arc<Mutex<Vec<ReportedError>>>,
) {
    let tasks = files.iter().map(|path| {
        let store = store;
        let semaphore = Arc::clone(&request.settings.store_semaphore);
        let root = request.settings.root_dir.clone();
        let bucket = request.base.bucket.clone();
        let base = request.base.clone();
        let machine = request.settings.machine.clone();
        let name = request.name.to_string();
        let path = path.clone();
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let Ok(relative) = path.strip_prefix(&root) else {
                return Err(ReportedError::new(path.display().to_string(), "file escaped root_dir"));
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            let key = base.key(&format!("{machine}/{name}/files/{relative}"));
            store
                .upload_file(&path, &bucket, &key)
                .await
                .map_err(|e| ReportedError::new(format!("upload {relative}"), e.to_string()))
        }
    });

    let results = futures::future::join_all(tasks).await;
    let mut guard = errors.lock().await;
    for result in results {
        if let Err(e) = result {
            guard.push(e);
        }
    }
}

async fn sync_agent_dir(
    store: &(dyn ObjectStore),
    base: &S3Url,
    key_prefix: &str,
    source: &Path,
    included: fn(&str) -> bool,
    errors: &Arc<Mutex<Vec<ReportedError>>>,
) {
    let mut files = Vec::new();
    collect_all_files(source, source, &mut files);

    for relative in files {
        if !included(&relative) {
            continue;
        }
        let local_path = source.join(&relative);
        let key = base.key(&format!("{key_prefix}/{relative}"));
        if let Err(e) = store.upload_file(&local_path, &base.bucket, &key).await {
            errors
                .lock()
                .await
                .push(ReportedError::new(format!("agent sync {relative}"), e.to_string()));
        }
    }
}

fn collect_all_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_all_files(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devenv_store::MemoryStore;
    use devenv_vcs::FakeJjDriver;
    use tempfile::tempdir;

    #[tokio::test]
    async fn dry_run_builds_manifest_without_touching_the_store() {
        let root = tempdir().unwrap();
        let jj = FakeJjDriver::new();
        let store = MemoryStore::new();
        let mut settings = Settings::new(root.path().to_path_buf(), Some("dev01"));
        settings.dry_run = true;
        let base = S3Url::parse("s3://b/u").unwrap();

        let outcome = run(
            &jj,
            &store,
            BackupRequest {
                settings: &settings,
                base: &base,
                name: "2026-07-28",
                include_files: true,
                agent_instructions: None,
                claude_dir_source: None,
                opencode_dir_source: None,
            },
        )
        .await;

        assert!(!outcome.uploaded);
        assert!(store.is_empty());
        assert_eq!(outcome.manifest.hostname, "dev01");
    }

    #[tokio::test]
    async fn repo_with_no_allowed_remote_scheme_is_skipped() {
        let root = tempdir().unwrap();
        let repo_path = root.path().join("proj");
        std::fs::create_dir_all(repo_path.join(".jj").join("repo")).unwrap();

        let jj = FakeJjDriver::new();
        jj.seed(
            &repo_path,
            devenv_vcs::FakeRepo {
                remotes: vec![devenv_vcs::RemoteRecord {
                    name: "origin".to_string(),
                    url: "ftp://host/proj".to_string(),
                }],
                workspace_state: Default::default(),
                stale_once: Default::default(),
            },
        );
        let store = MemoryStore::new();
        let settings = Settings::new(root.path().to_path_buf(), Some("dev01"));
        let base = S3Url::parse("s3://b/u").unwrap();

        let outcome = run(
            &jj,
            &store,
            BackupRequest {
                settings: &settings,
                base: &base,
                name: "2026-07-28",
                include_files: false,
                agent_instructions: None,
                claude_dir_source: None,
                opencode_dir_source: None,
            },
        )
        .await;

        assert!(outcome.manifest.workspaces.is_empty());
    }

    #[test]
    fn stat_files_reports_size_and_relative_path() {
        let root = tempdir().unwrap();
        let file = root.path().join("note.md");
        std::fs::write(&file, "hello").unwrap();

        let entries = stat_files(root.path(), &[file]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative_path, "note.md");
        assert_eq!(entries[0].size, 5);
    }
}
