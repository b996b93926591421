//! The Manifest Model: the typed, validated document transferred between
//! machines. See `RepoData`/`WorkspaceData`/`UncommittedChange`/`FileEntry`/
//! `SymlinkEntry` below for the per-field invariants.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::safety;

/// Remote URL schemes accepted on a repository's remotes.
pub const ALLOWED_URL_SCHEMES: &[&str] = &["https://", "http://", "git@", "ssh://", "git://"];

/// Root document. Field order here is the field order serialized to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// `1` if `files` is omitted, `2` otherwise.
    pub version: u32,
    pub captured_at: DateTime<Utc>,
    pub hostname: String,
    pub root_dir: String,
    pub workspaces: BTreeMap<String, RepoData>,
    pub uncommitted: Vec<UncommittedChange>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub files: Option<Vec<FileEntry>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub symlinks: Option<Vec<SymlinkEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoData {
    pub remotes: BTreeMap<String, String>,
    pub workspaces: BTreeMap<String, WorkspaceData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceData {
    pub path: String,
    pub current_change_id: String,
    pub current_commit_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bookmark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncommittedChange {
    pub change_id: String,
    pub commit_id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bookmark: Option<String>,
    pub repo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub relative_path: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymlinkEntry {
    pub relative_path: String,
    pub target: String,
}

impl Manifest {
    /// Deserialize and validate in one named step (distinct from serde's
    /// structural checks), mirroring the original implementation's use of a
    /// dedicated validator rather than trusting the wire shape alone.
    pub fn from_json_validated(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_slice(bytes).map_err(|e| ManifestError::SchemaError {
            reason: e.to_string(),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Re-check every invariant from §3 that can be verified from the
    /// document alone (repo-name uniqueness is structural — `workspaces` is
    /// a map — and bookmark/change-id consistency is established at capture
    /// time, not re-derivable here).
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.root_dir.is_empty() {
            return Err(ManifestError::SchemaError {
                reason: "root_dir must not be empty".to_string(),
            });
        }
        let root = Path::new(&self.root_dir);

        for (repo_name, repo) in &self.workspaces {
            for url in repo.remotes.values() {
                if !ALLOWED_URL_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
                    return Err(ManifestError::UrlSchemeRejected { url: url.clone() });
                }
            }
            for (ws_name, ws) in &repo.workspaces {
                if ws.current_change_id.is_empty() || ws.current_commit_id.is_empty() {
                    return Err(ManifestError::SchemaError {
                        reason: format!(
                            "{repo_name}/{ws_name}: current_change_id and current_commit_id must not be empty"
                        ),
                    });
                }
            }
        }

        if let Some(files) = &self.files {
            for f in files {
                if f.relative_path.is_empty() || f.relative_path.starts_with('.') {
                    return Err(ManifestError::SchemaError {
                        reason: format!("invalid file relative_path: {:?}", f.relative_path),
                    });
                }
                safety::safe_join(root, &f.relative_path)?;
            }
        }

        if let Some(links) = &self.symlinks {
            for s in links {
                safety::safe_join(root, &s.relative_path)?;
                safety::safe_join(root, &s.target)?;
            }
        }

        Ok(())
    }

    /// Serialize with the field order declared above, omitting absent
    /// optional fields. `serde_json` preserves struct field order by default
    /// (no `#[serde(flatten)]`/map reordering involved), so a plain
    /// `to_vec`/`to_string` already gives the deterministic layout §3 calls
    /// for.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        serde_json::to_vec_pretty(self).map_err(|e| ManifestError::SchemaError {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        let mut remotes = BTreeMap::new();
        remotes.insert("origin".to_string(), "git@h:u/proj".to_string());
        let mut workspaces = BTreeMap::new();
        workspaces.insert(
            "default".to_string(),
            WorkspaceData {
                path: "/home/dev/proj".to_string(),
                current_change_id: "abcd1234".to_string(),
                current_commit_id: "deadbeef".to_string(),
                bookmark: None,
            },
        );
        let mut repos = BTreeMap::new();
        repos.insert(
            "proj".to_string(),
            RepoData {
                remotes,
                workspaces,
            },
        );
        Manifest {
            version: 1,
            captured_at: Utc::now(),
            hostname: "dev01".to_string(),
            root_dir: "/home/dev".to_string(),
            workspaces: repos,
            uncommitted: Vec::new(),
            agent_instructions: None,
            files: None,
            symlinks: None,
        }
    }

    #[test]
    fn round_trips_through_json() {
        let manifest = sample();
        let bytes = manifest.to_json_bytes().unwrap();
        let parsed = Manifest::from_json_validated(&bytes).unwrap();
        assert_eq!(manifest, parsed);
    }

    #[test]
    fn rejects_empty_root_dir() {
        let mut manifest = sample();
        manifest.root_dir = String::new();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn rejects_disallowed_remote_scheme() {
        let mut manifest = sample();
        manifest
            .workspaces
            .get_mut("proj")
            .unwrap()
            .remotes
            .insert("origin".to_string(), "file:///etc/passwd".to_string());
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ManifestError::UrlSchemeRejected { .. }));
    }

    #[test]
    fn accepts_ssh_shorthand_remote() {
        let manifest = sample();
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn rejects_path_escaping_file_entry() {
        let mut manifest = sample();
        manifest.version = 2;
        manifest.files = Some(vec![FileEntry {
            relative_path: "sub/../../etc/passwd".to_string(),
            size: 10,
            mtime: Utc::now(),
        }]);
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ManifestError::PathEscape { .. }));
    }

    #[test]
    fn rejects_empty_change_id() {
        let mut manifest = sample();
        manifest
            .workspaces
            .get_mut("proj")
            .unwrap()
            .workspaces
            .get_mut("default")
            .unwrap()
            .current_change_id = String::new();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn from_json_validated_rejects_malformed_json() {
        let err = Manifest::from_json_validated(b"{not json").unwrap_err();
        assert!(matches!(err, ManifestError::SchemaError { .. }));
    }
}
