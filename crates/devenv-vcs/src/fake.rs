//! An in-memory [`JjDriver`] test double.
//!
//! Lets orchestrator tests exercise clone/pin/workspace-add flows without a
//! real `jj` binary or filesystem checkout. State is keyed by the `cwd`
//! passed to each call, mirroring how the real driver is keyed by "which
//! checkout directory am I running in".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::driver::JjDriver;
use crate::error::JjError;
use crate::types::{
    BookmarkRecord, ChangeId, CommitId, RemoteRecord, UncommittedRecord, WorkingCopyState,
};

/// A scripted repository: its remotes, its workspaces by name (each with its
/// own current state), and whether it should report "stale" on the next
/// `current_state` read for a given workspace.
#[derive(Clone, Debug, Default)]
pub struct FakeRepo {
    pub remotes: Vec<RemoteRecord>,
    pub workspace_state: HashMap<String, WorkingCopyState>,
    pub stale_once: std::collections::HashSet<String>,
}

/// Test double for [`JjDriver`]. Keyed by checkout path (`cwd`).
#[derive(Default)]
pub struct FakeJjDriver {
    repos: Mutex<HashMap<PathBuf, FakeRepo>>,
    /// Paths that should fail to clone.
    pub fail_clone: Mutex<std::collections::HashSet<String>>,
}

impl FakeJjDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, cwd: &Path, repo: FakeRepo) {
        self.repos.lock().unwrap().insert(cwd.to_path_buf(), repo);
    }
}

#[async_trait]
impl JjDriver for FakeJjDriver {
    async fn list_remotes(&self, cwd: &Path) -> Result<Vec<RemoteRecord>, JjError> {
        let repos = self.repos.lock().unwrap();
        Ok(repos.get(cwd).map(|r| r.remotes.clone()).unwrap_or_default())
    }

    async fn current_state(&self, cwd: &Path) -> Result<WorkingCopyState, JjError> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.get_mut(cwd).ok_or_else(|| JjError::NonZeroExit {
            operation: "log @".to_string(),
            stderr: format!("no such checkout: {}", cwd.display()),
        })?;
        let key = cwd.to_string_lossy().into_owned();
        if repo.stale_once.remove(&key) {
            return Err(JjError::NonZeroExit {
                operation: "log @".to_string(),
                stderr: "The working copy is stale".to_string(),
            });
        }
        repo.workspace_state
            .get("default")
            .cloned()
            .ok_or_else(|| JjError::ParseError {
                operation: "log @".to_string(),
                reason: "no seeded state".to_string(),
            })
    }

    async fn list_workspaces(&self, cwd: &Path) -> Result<Vec<String>, JjError> {
        let repos = self.repos.lock().unwrap();
        Ok(repos
            .get(cwd)
            .map(|r| r.workspace_state.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_uncommitted(&self, _cwd: &Path) -> Result<Vec<UncommittedRecord>, JjError> {
        Ok(Vec::new())
    }

    async fn list_bookmarks(&self, _cwd: &Path) -> Result<Vec<BookmarkRecord>, JjError> {
        Ok(Vec::new())
    }

    async fn clone_colocated(&self, url: &str, dest: &Path) -> Result<(), JjError> {
        if self.fail_clone.lock().unwrap().contains(url) {
            return Err(JjError::NonZeroExit {
                operation: "git clone".to_string(),
                stderr: format!("simulated clone failure for {url}"),
            });
        }
        let mut repos = self.repos.lock().unwrap();
        repos.entry(dest.to_path_buf()).or_insert_with(|| FakeRepo {
            remotes: vec![RemoteRecord {
                name: "origin".to_string(),
                url: url.to_string(),
            }],
            workspace_state: {
                let mut m = HashMap::new();
                m.insert(
                    "default".to_string(),
                    WorkingCopyState {
                        change_id: ChangeId("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".to_string()),
                        commit_id: CommitId("0".repeat(40)),
                        bookmark: None,
                        divergent: false,
                    },
                );
                m
            },
            stale_once: std::collections::HashSet::new(),
        });
        Ok(())
    }

    async fn add_workspace_colocated(
        &self,
        primary_cwd: &Path,
        name: &str,
        dest: &Path,
    ) -> Result<(), JjError> {
        let mut repos = self.repos.lock().unwrap();
        let state = repos
            .get(primary_cwd)
            .and_then(|r| r.workspace_state.get("default").cloned())
            .ok_or_else(|| JjError::NonZeroExit {
                operation: "workspace add".to_string(),
                stderr: "unknown primary checkout".to_string(),
            })?;
        let repo = repos.entry(dest.to_path_buf()).or_default();
        repo.workspace_state.insert(name.to_string(), state.clone());
        repo.workspace_state.insert("default".to_string(), state);
        Ok(())
    }

    async fn edit(&self, cwd: &Path, change_id: &str) -> Result<(), JjError> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.get_mut(cwd).ok_or_else(|| JjError::NonZeroExit {
            operation: "edit".to_string(),
            stderr: "unknown checkout".to_string(),
        })?;
        if let Some(state) = repo.workspace_state.get_mut("default") {
            state.change_id = ChangeId(change_id.to_string());
        }
        Ok(())
    }

    async fn update_stale(&self, _cwd: &Path) -> Result<(), JjError> {
        Ok(())
    }

    async fn add_remote(&self, cwd: &Path, name: &str, url: &str) -> Result<(), JjError> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.get_mut(cwd).ok_or_else(|| JjError::NonZeroExit {
            operation: "git remote add".to_string(),
            stderr: "unknown checkout".to_string(),
        })?;
        repo.remotes.push(RemoteRecord {
            name: name.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }
}
