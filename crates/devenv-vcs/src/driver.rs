//! The [`JjDriver`] trait — the single abstraction boundary between devenv
//! and the `jj` CLI.
//!
//! All devenv crates interact with jj exclusively through this trait. No
//! orchestrator should spawn `jj` itself; instead it depends on
//! `devenv-vcs` and programs against the trait. Implementations:
//!
//! - [`crate::jj_cli::JjCli`] — the real, subprocess-backed driver.
//! - [`crate::fake::FakeJjDriver`] — an in-memory test double used by
//!   orchestrator unit tests.
//!
//! Every method is timeout-bounded by the implementation (30s default, 300s
//! for clone) and never panics on a non-zero exit — callers decide what a
//! failure means.

use std::path::Path;

use async_trait::async_trait;

use crate::error::JjError;
use crate::types::{BookmarkRecord, RemoteRecord, UncommittedRecord, WorkingCopyState};

#[async_trait]
pub trait JjDriver: Send + Sync {
    /// List configured remotes as `(name, url)` pairs.
    async fn list_remotes(&self, cwd: &Path) -> Result<Vec<RemoteRecord>, JjError>;

    /// Current working-copy position: change id, commit id, bookmark.
    ///
    /// Implements the stale-workspace retry policy: if the underlying read
    /// fails with stderr containing "stale" (case-insensitive), the driver
    /// invokes [`JjDriver::update_stale`] once and retries exactly once.
    async fn current_state(&self, cwd: &Path) -> Result<WorkingCopyState, JjError>;

    /// Names of all workspaces sharing this repository's backend.
    async fn list_workspaces(&self, cwd: &Path) -> Result<Vec<String>, JjError>;

    /// Revisions reachable from the working copy but not from any remote
    /// bookmark. Diagnostic only — never consulted on restore.
    async fn list_uncommitted(&self, cwd: &Path) -> Result<Vec<UncommittedRecord>, JjError>;

    /// Parsed bookmark list: `(name, change_id, synced_with_remote)`.
    async fn list_bookmarks(&self, cwd: &Path) -> Result<Vec<BookmarkRecord>, JjError>;

    /// Clone `url` into `dest` with a colocated Git backend.
    ///
    /// On failure, any partial `dest` directory is removed before the error
    /// is returned.
    async fn clone_colocated(&self, url: &str, dest: &Path) -> Result<(), JjError>;

    /// Add a new named secondary workspace at `dest`, backed by the
    /// repository found via `primary_cwd`.
    async fn add_workspace_colocated(
        &self,
        primary_cwd: &Path,
        name: &str,
        dest: &Path,
    ) -> Result<(), JjError>;

    /// Move the working copy at `cwd` to `change_id`.
    async fn edit(&self, cwd: &Path, change_id: &str) -> Result<(), JjError>;

    /// Recover from the "stale working copy" failure mode.
    async fn update_stale(&self, cwd: &Path) -> Result<(), JjError>;

    /// Register an additional remote on an already-cloned repo. Used by the
    /// Restore Orchestrator to add non-origin remotes after `clone_colocated`
    /// (which only wires up `origin`).
    async fn add_remote(&self, cwd: &Path, name: &str, url: &str) -> Result<(), JjError>;
}
