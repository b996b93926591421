//! Value types shared between the [`JjDriver`](crate::JjDriver) trait and its
//! callers.
//!
//! These intentionally contain no subprocess or parsing details — that's an
//! implementation concern of [`crate::jj_cli::JjCli`].

use std::fmt;

/// A stable, content-independent revision identifier that persists across
/// rewrites of the underlying commit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeId(pub String);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identifier of the specific committed snapshot associated with a
/// change at a moment in time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The working copy's current position: `(change_id, commit_id, bookmark?)`.
///
/// `divergent` is set when the log reports two workspaces disagreeing about
/// a change's current commit; callers warn but proceed (§4.6 pin procedure).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingCopyState {
    pub change_id: ChangeId,
    pub commit_id: CommitId,
    pub bookmark: Option<String>,
    pub divergent: bool,
}

/// A `(name, url)` pair as reported by `jj git remote list`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRecord {
    pub name: String,
    pub url: String,
}

/// A parsed bookmark record: local name, the change id it points at, and
/// whether it is synced with its remote counterpart.
///
/// The local bookmark name is everything before `@` and before `:` in jj's
/// bookmark listing output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookmarkRecord {
    pub name: String,
    pub change_id: ChangeId,
    pub synced_with_remote: bool,
}

/// A revision reachable from the working copy but not from any remote
/// bookmark — recorded for human reference only (never consulted by
/// restore).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UncommittedRecord {
    pub change_id: ChangeId,
    pub commit_id: CommitId,
    pub description: String,
    pub bookmark: Option<String>,
}
