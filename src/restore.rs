//! Restore Orchestrator: the most complex component (§4.6). Fetches the
//! manifest, validates every path up-front, clones missing repositories in
//! parallel, adds secondary workspaces serially per repo, pins each
//! workspace to its recorded revision, restores files, then realizes
//! symlinks last.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use devenv_store::{DownloadOutcome, ObjectStore};
use devenv_vcs::JjDriver;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::agent_sync;
use crate::error::ReportedError;
use crate::manifest::{Manifest, RepoData, WorkspaceData};
use crate::safety;
use crate::settings::{S3Url, Settings};

pub struct RestoreRequest<'a> {
    pub settings: &'a Settings,
    pub base: &'a S3Url,
    pub name: &'a str,
    /// When set (`--manifest-file`), used instead of downloading
    /// `manifest.json` from the object store.
    pub manifest_bytes: Option<Vec<u8>>,
    pub claude_dir_destination: Option<PathBuf>,
    pub opencode_dir_destination: Option<PathBuf>,
}

#[derive(Default)]
pub struct RestoreOutcome {
    pub manifest: Option<Manifest>,
    pub errors: Vec<ReportedError>,
    /// Set iff the restore aborted before any file was written — manifest
    /// fetch failure or a path-safety violation. Both are fatal per §7.
    pub fatal: Option<String>,
    pub files_downloaded: usize,
    pub files_skipped: usize,
    pub symlinks_created: usize,
    pub symlinks_skipped: usize,
    pub agent_files_downloaded: usize,
    pub agent_files_skipped_by_date: usize,
}

impl RestoreOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.fatal.is_none() && self.errors.is_empty()
    }
}

/// Run a restore per §4.6.
#[instrument(skip(jj, store, request), fields(name = request.name))]
pub async fn run(
    jj: &(dyn JjDriver),
    store: &(dyn ObjectStore),
    request: RestoreRequest<'_>,
) -> RestoreOutcome {
    let manifest = match fetch_manifest(store, &request).await {
        Ok(m) => m,
        Err(reason) => {
            return RestoreOutcome {
                fatal: Some(reason),
                ..Default::default()
            };
        }
    };

    if let Err(reason) = validate_restore_paths(&manifest, &request.settings.root_dir) {
        return RestoreOutcome {
            manifest: Some(manifest),
            fatal: Some(reason),
            ..Default::default()
        };
    }

    if request.settings.dry_run {
        return RestoreOutcome {
            manifest: Some(manifest),
            ..Default::default()
        };
    }

    let errors: Arc<Mutex<Vec<ReportedError>>> = Arc::new(Mutex::new(Vec::new()));

    restore_repos(jj, &manifest, request.settings, &errors).await;

    let (files_downloaded, files_skipped) =
        download_files(store, &manifest, request.settings, &request.base, request.name, &errors).await;

    let (symlinks_created, symlinks_skipped) =
        realize_symlinks(&manifest, request.settings, &errors).await;

    let mut agent_files_downloaded = 0;
    let mut agent_files_skipped_by_date = 0;
    if let Some(dest) = &request.claude_dir_destination {
        let (d, s) = restore_agent_dir(
            store,
            &request.base,
            &format!("claude-code/{}", request.settings.machine),
            dest,
            agent_sync::claude_code_included,
            request.settings,
            &errors,
        )
        .await;
        agent_files_downloaded += d;
        agent_files_skipped_by_date += s;
    }
    if let Some(dest) = &request.opencode_dir_destination {
        let (d, s) = restore_agent_dir(
            store,
            &request.base,
            &format!("opencode/{}", request.settings.machine),
            dest,
            agent_sync::opencode_included,
            request.settings,
            &errors,
        )
        .await;
        agent_files_downloaded += d;
        agent_files_skipped_by_date += s;
    }

    let collected = Arc::try_unwrap(errors).map(Mutex::into_inner).unwrap_or_default();
    RestoreOutcome {
        manifest: Some(manifest),
        errors: collected,
        fatal: None,
        files_downloaded,
        files_skipped,
        symlinks_created,
        symlinks_skipped,
        agent_files_downloaded,
        agent_files_skipped_by_date,
    }
}

async fn fetch_manifest(store: &(dyn ObjectStore), request: &RestoreRequest<'_>) -> Result<Manifest, String> {
    let bytes = if let Some(bytes) = &request.manifest_bytes {
        bytes.clone()
    } else {
        let key = request.base.key(&format!("{}/{}/manifest.json", request.settings.machine, request.name));
        let dest = std::env::temp_dir().join(format!("devenv-restore-manifest-{}.json", std::process::id()));
        match store.download_file(&request.base.bucket, &key, &dest, true).await {
            Ok(_) => {
                let bytes = std::fs::read(&dest).map_err(|e| format!("failed to read downloaded manifest: {e}"))?;
                let _ = std::fs::remove_file(&dest);
                bytes
            }
            Err(e) => return Err(format!("manifest not found at {key}: {e}")),
        }
    };
    Manifest::from_json_validated(&bytes).map_err(|e| format!("manifest failed validation: {e}"))
}

/// Up-front path-safety pass (§4.6 step 2): every `FileEntry`, every
/// `SymlinkEntry`, and every workspace path must resolve inside `root_dir`.
/// Any violation aborts before a single byte is written. `Manifest::validate`
/// already re-checks files/symlinks; this adds the workspace-path check,
/// which needs `root_dir` as a filesystem path rather than a manifest field.
fn validate_restore_paths(manifest: &Manifest, root_dir: &Path) -> Result<(), String> {
    manifest.validate().map_err(|e| e.to_string())?;

    for (repo_name, repo) in &manifest.workspaces {
        for (ws_name, ws) in &repo.workspaces {
            let path = Path::new(&ws.path);
            if !path.is_absolute() || !safety::is_inside_root_lexical(path, root_dir) {
                return Err(format!(
                    "workspace path escapes root_dir: {repo_name}/{ws_name} -> {}",
                    ws.path
                ));
            }
        }
    }
    Ok(())
}

async fn restore_repos(
    jj: &(dyn JjDriver),
    manifest: &Manifest,
    settings: &Settings,
    errors: &Arc<Mutex<Vec<ReportedError>>>,
) {
    // Step 3: clone missing repos in parallel, gated by MAX_CONCURRENT_CLONES.
    let clone_tasks = manifest.workspaces.iter().filter_map(|(repo_name, repo)| {
        let default = repo.workspaces.get("default")?;
        let primary_path = PathBuf::from(&default.path);
        if primary_path.join(".jj").exists() {
            return None;
        }
        let semaphore = Arc::clone(&settings.clone_semaphore);
        let repo_name = repo_name.clone();
        let remotes = repo.remotes.clone();
        let errors = Arc::clone(errors);
        Some(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let Some(url) = clone_url(&remotes) else {
                errors.lock().await.push(ReportedError::new(&repo_name, "no remote to clone from"));
                return;
            };
            if let Some(parent) = primary_path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    errors
                        .lock()
                        .await
                        .push(ReportedError::new(&repo_name, format!("failed to create parent dir: {e}")));
                    return;
                }
            }
            if let Err(e) = jj.clone_colocated(url, &primary_path).await {
                errors.lock().await.push(ReportedError::new(&repo_name, format!("clone failed: {e}")));
                return;
            }
            for (name, url) in &remotes {
                if name == "origin" {
                    continue;
                }
                if let Err(e) = jj.add_remote(&primary_path, name, url).await {
                    errors
                        .lock()
                        .await
                        .push(ReportedError::new(&repo_name, format!("failed to add remote {name}: {e}")));
                }
            }
        })
    });
    futures::future::join_all(clone_tasks).await;

    // Step 4: pin every default workspace, all in parallel.
    let pin_tasks = manifest.workspaces.iter().filter_map(|(repo_name, repo)| {
        let default = repo.workspaces.get("default")?;
        let path = PathBuf::from(&default.path);
        let change_id = default.current_change_id.clone();
        let repo_name = repo_name.clone();
        let errors = Arc::clone(errors);
        Some(async move {
            if let Err(e) = pin_workspace(jj, &path, &change_id).await {
                errors
                    .lock()
                    .await
                    .push(ReportedError::new(format!("{repo_name}/default"), e));
            }
        })
    });
    futures::future::join_all(pin_tasks).await;

    // Step 5: non-default workspaces, serialized within a repo, parallel
    // across repos.
    let per_repo_tasks = manifest.workspaces.iter().map(|(repo_name, repo)| {
        let repo_name = repo_name.clone();
        let repo = repo.clone();
        let errors = Arc::clone(errors);
        async move {
            create_non_default_workspaces(jj, &repo_name, &repo, &errors).await;
        }
    });
    futures::future::join_all(per_repo_tasks).await;
}

async fn create_non_default_workspaces(
    jj: &(dyn JjDriver),
    repo_name: &str,
    repo: &RepoData,
    errors: &Arc<Mutex<Vec<ReportedError>>>,
) {
    let Some(default) = repo.workspaces.get("default") else {
        return;
    };
    let primary_path = PathBuf::from(&default.path);

    for (ws_name, ws) in &repo.workspaces {
        if ws_name == "default" {
            continue;
        }
        let dest = PathBuf::from(&ws.path);
        if let Some(parent) = dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                errors
                    .lock()
                    .await
                    .push(ReportedError::new(format!("{repo_name}/{ws_name}"), format!("failed to create parent dir: {e}")));
                continue;
            }
        }
        if let Err(e) = jj.add_workspace_colocated(&primary_path, ws_name, &dest).await {
            errors
                .lock()
                .await
                .push(ReportedError::new(format!("{repo_name}/{ws_name}"), format!("workspace add failed: {e}")));
            continue;
        }
        if let Err(e) = pin_workspace(jj, &dest, &ws.current_change_id).await {
            errors
                .lock()
                .await
                .push(ReportedError::new(format!("{repo_name}/{ws_name}"), e));
        }
    }
}

fn clone_url(remotes: &BTreeMap<String, String>) -> Option<&str> {
    remotes.get("origin").or_else(|| remotes.values().next()).map(String::as_str)
}

/// The pin procedure (§4.6): move a workspace's working copy to `change_id`,
/// tolerating (and warning on) divergence, but failing if the post-edit
/// state doesn't actually land on `change_id`.
async fn pin_workspace(jj: &(dyn JjDriver), path: &Path, change_id: &str) -> Result<(), String> {
    let before = jj.current_state(path).await.map_err(|e| format!("read state: {e}"))?;
    if before.change_id.0 == change_id {
        return Ok(());
    }
    if before.divergent {
        warn!(path = %path.display(), "workspace reports divergent state before pin; proceeding");
    }

    jj.edit(path, change_id).await.map_err(|e| format!("edit {change_id}: {e}"))?;

    let after = jj.current_state(path).await.map_err(|e| format!("verify pin: {e}"))?;
    if after.change_id.0 != change_id {
        return Err(format!(
            "pin to {change_id} did not take effect (workspace is on {})",
            after.change_id.0
        ));
    }
    if after.divergent {
        warn!(path = %path.display(), "workspace reports divergent state after pin");
    }
    Ok(())
}

async fn download_files(
    store: &(dyn ObjectStore),
    manifest: &Manifest,
    settings: &Settings,
    base: &S3Url,
    name: &str,
    errors: &Arc<Mutex<Vec<ReportedError>>>,
) -> (usize, usize) {
    let Some(files) = &manifest.files else {
        return (0, 0);
    };

    let tasks = files.iter().map(|entry| {
        let semaphore = Arc::clone(&settings.store_semaphore);
        let key = base.key(&format!("{}/{name}/files/{}", settings.machine, entry.relative_path));
        let dest = settings.root_dir.join(&entry.relative_path);
        let bucket = base.bucket.clone();
        let force = settings.force;
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            store
                .download_file(&bucket, &key, &dest, force)
                .await
                .map_err(|e| ReportedError::new(format!("download {}", entry.relative_path), e.to_string()))
        }
    });

    let results = futures::future::join_all(tasks).await;
    let mut downloaded = 0;
    let mut skipped = 0;
    let mut guard = errors.lock().await;
    for result in results {
        match result {
            Ok(DownloadOutcome::Downloaded) => downloaded += 1,
            Ok(DownloadOutcome::Skipped) => skipped += 1,
            Err(e) => guard.push(e),
        }
    }
    (downloaded, skipped)
}

/// Symlinks are realized last, after every file download, so all targets
/// already exist (§4.6 step 7). Each link is created relative to its parent
/// directory for portability.
async fn realize_symlinks(
    manifest: &Manifest,
    settings: &Settings,
    errors: &Arc<Mutex<Vec<ReportedError>>>,
) -> (usize, usize) {
    let Some(symlinks) = &manifest.symlinks else {
        return (0, 0);
    };

    let mut created = 0;
    let mut skipped = 0;
    for entry in symlinks {
        let link_path = settings.root_dir.join(&entry.relative_path);
        let target_abs = settings.root_dir.join(&entry.target);

        if link_path.exists() || link_path.symlink_metadata().is_ok() {
            if !settings.force {
                skipped += 1;
                continue;
            }
            if let Err(e) = std::fs::remove_file(&link_path) {
                errors
                    .lock()
                    .await
                    .push(ReportedError::new(&entry.relative_path, format!("failed to unlink existing entry: {e}")));
                continue;
            }
        }

        let Some(parent) = link_path.parent() else {
            continue;
        };
        if let Err(e) = std::fs::create_dir_all(parent) {
            errors
                .lock()
                .await
                .push(ReportedError::new(&entry.relative_path, format!("failed to create parent dir: {e}")));
            continue;
        }
        let Ok(relative_target) = pathdiff(&target_abs, parent) else {
            errors
                .lock()
                .await
                .push(ReportedError::new(&entry.relative_path, "failed to compute relative symlink target"));
            continue;
        };

        #[cfg(unix)]
        let result = std::os::unix::fs::symlink(&relative_target, &link_path);
        #[cfg(not(unix))]
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "symlink realization is unix-only",
        ));

        match result {
            Ok(()) => created += 1,
            Err(e) => errors
                .lock()
                .await
                .push(ReportedError::new(&entry.relative_path, format!("symlink creation failed: {e}"))),
        }
    }
    (created, skipped)
}

/// Compute `target` relative to `from` without requiring either to exist —
/// both are already-joined absolute paths under `root_dir`.
fn pathdiff(target: &Path, from: &Path) -> Result<PathBuf, ()> {
    let target_components: Vec<_> = target.components().collect();
    let from_components: Vec<_> = from.components().collect();

    let common = target_components
        .iter()
        .zip(from_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..from_components.len() {
        result.push("..");
    }
    for component in &target_components[common..] {
        result.push(component.as_os_str());
    }
    if result.as_os_str().is_empty() {
        Err(())
    } else {
        Ok(result)
    }
}

async fn restore_agent_dir(
    store: &(dyn ObjectStore),
    base: &S3Url,
    key_prefix: &str,
    destination: &Path,
    included: fn(&str) -> bool,
    settings: &Settings,
    errors: &Arc<Mutex<Vec<ReportedError>>>,
) -> (usize, usize) {
    let prefix = base.key(&format!("{key_prefix}/"));
    let objects = match list_all_objects(store, &base.bucket, &prefix).await {
        Ok(objects) => objects,
        Err(e) => {
            errors.lock().await.push(ReportedError::new(key_prefix, e.to_string()));
            return (0, 0);
        }
    };

    let mut downloaded = 0;
    let mut skipped_by_date = 0;
    for obj in objects {
        let Some(relative) = obj.key.strip_prefix(&prefix) else {
            continue;
        };
        if !included(relative) {
            continue;
        }
        if let Some(cutoff) = settings.sessions_after {
            if obj.last_modified < cutoff {
                skipped_by_date += 1;
                continue;
            }
        }
        let dest = destination.join(relative);
        match store.download_file(&base.bucket, &obj.key, &dest, settings.force).await {
            Ok(_) => downloaded += 1,
            Err(e) => errors
                .lock()
                .await
                .push(ReportedError::new(format!("agent restore {relative}"), e.to_string())),
        }
    }
    (downloaded, skipped_by_date)
}

/// Recursively walk a delimiter-paginated prefix listing into a flat list of
/// every object beneath it, descending into each returned common prefix.
async fn list_all_objects(
    store: &(dyn ObjectStore),
    bucket: &str,
    prefix: &str,
) -> Result<Vec<devenv_store::ObjectMeta>, devenv_store::StoreError> {
    let mut out = Vec::new();
    let mut stack = vec![prefix.to_string()];
    while let Some(p) = stack.pop() {
        let page = store.list(bucket, &p).await?;
        out.extend(page.objects);
        stack.extend(page.common_prefixes);
    }
    Ok(out)
}

/// Lists the immediate child "directory" segments under
/// `{base}/{machine}/` — the `list-backups` verb.
pub async fn list_backups(store: &(dyn ObjectStore), base: &S3Url, machine: &str) -> Result<Vec<String>, String> {
    let prefix = base.key(&format!("{machine}/"));
    let page = store.list(&base.bucket, &prefix).await.map_err(|e| e.to_string())?;
    let mut names: Vec<String> = page
        .common_prefixes
        .iter()
        .filter_map(|p| p.strip_prefix(&prefix))
        .map(|s| s.trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    names.sort();
    info!(count = names.len(), "listed backups");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use devenv_store::MemoryStore;
    use devenv_vcs::FakeJjDriver;
    use tempfile::tempdir;

    fn settings(root: PathBuf) -> Settings {
        Settings::new(root, Some("dev01"))
    }

    #[tokio::test]
    async fn aborts_before_writing_on_hostile_manifest() {
        let root = tempdir().unwrap();
        let manifest_json = format!(
            r#"{{"version":2,"captured_at":"2026-01-20T00:00:00Z","hostname":"dev01","root_dir":"{}","workspaces":{{}},"uncommitted":[],"files":[{{"relative_path":"../etc/passwd","size":10,"mtime":"2026-01-20T00:00:00Z"}}]}}"#,
            root.path().display()
        );
        let jj = FakeJjDriver::new();
        let store = MemoryStore::new();
        let s = settings(root.path().to_path_buf());
        let base = S3Url::parse("s3://b/users/u").unwrap();

        let outcome = run(
            &jj,
            &store,
            RestoreRequest {
                settings: &s,
                base: &base,
                name: "2026-01-20",
                manifest_bytes: Some(manifest_json.into_bytes()),
                claude_dir_destination: None,
                opencode_dir_destination: None,
            },
        )
        .await;

        assert!(outcome.fatal.is_some());
        assert!(!root.path().join("etc").exists());
    }

    #[tokio::test]
    async fn manifest_not_found_is_fatal() {
        let root = tempdir().unwrap();
        let jj = FakeJjDriver::new();
        let store = MemoryStore::new();
        let s = settings(root.path().to_path_buf());
        let base = S3Url::parse("s3://b/users/u").unwrap();

        let outcome = run(
            &jj,
            &store,
            RestoreRequest {
                settings: &s,
                base: &base,
                name: "missing",
                manifest_bytes: None,
                claude_dir_destination: None,
                opencode_dir_destination: None,
            },
        )
        .await;

        assert!(outcome.fatal.is_some());
    }

    #[tokio::test]
    async fn clones_repo_and_pins_default_workspace() {
        let root = tempdir().unwrap();
        let repo_path = root.path().join("proj");

        let mut workspaces = BTreeMap::new();
        workspaces.insert(
            "default".to_string(),
            WorkspaceData {
                path: repo_path.display().to_string(),
                current_change_id: "abcd1234".to_string(),
                current_commit_id: "deadbeef".to_string(),
                bookmark: None,
            },
        );
        let mut remotes = BTreeMap::new();
        remotes.insert("origin".to_string(), "git@h:u/proj".to_string());
        let mut repos = BTreeMap::new();
        repos.insert("proj".to_string(), RepoData { remotes, workspaces });

        let manifest = Manifest {
            version: 1,
            captured_at: Utc::now(),
            hostname: "dev01".to_string(),
            root_dir: root.path().display().to_string(),
            workspaces: repos,
            uncommitted: Vec::new(),
            agent_instructions: None,
            files: None,
            symlinks: None,
        };

        let jj = FakeJjDriver::new();
        let store = MemoryStore::new();
        let s = settings(root.path().to_path_buf());
        let base = S3Url::parse("s3://b/users/u").unwrap();

        let outcome = run(
            &jj,
            &store,
            RestoreRequest {
                settings: &s,
                base: &base,
                name: "2026-01-20",
                manifest_bytes: Some(manifest.to_json_bytes().unwrap()),
                claude_dir_destination: None,
                opencode_dir_destination: None,
            },
        )
        .await;

        assert!(outcome.is_success(), "errors: {:?} fatal: {:?}", outcome.errors, outcome.fatal);
        let state = jj.current_state(&repo_path).await.unwrap();
        assert_eq!(state.change_id.0, "abcd1234");
    }

    #[test]
    fn clone_url_prefers_origin() {
        let mut remotes = BTreeMap::new();
        remotes.insert("upstream".to_string(), "https://h/u/other".to_string());
        remotes.insert("origin".to_string(), "git@h:u/proj".to_string());
        assert_eq!(clone_url(&remotes), Some("git@h:u/proj"));
    }

    #[test]
    fn pathdiff_computes_relative_sibling() {
        let target = Path::new("/home/dev/note.md");
        let from = Path::new("/home/dev");
        assert_eq!(pathdiff(target, from).unwrap(), PathBuf::from("note.md"));
    }

    #[test]
    fn pathdiff_ascends_for_nested_link() {
        let target = Path::new("/home/dev/note.md");
        let from = Path::new("/home/dev/sub");
        assert_eq!(pathdiff(target, from).unwrap(), PathBuf::from("../note.md"));
    }
}
