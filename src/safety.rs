//! Name & Path Safety: shared guards against unsafe machine/backup names and
//! paths that would escape the declared root.

use std::path::{Component, Path, PathBuf};

use crate::error::ManifestError;

/// `^[A-Za-z0-9_-]+$`, checked without pulling in a regex dependency for a
/// single fixed character class.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn validate_name(name: &str) -> Result<(), ManifestError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(ManifestError::SchemaError {
            reason: format!("invalid name {name:?}: must match ^[A-Za-z0-9_-]+$"),
        })
    }
}

/// Replace runs of characters outside `[A-Za-z0-9_-]` with a single `-`,
/// strip leading/trailing `-`, and fall back to `"unknown"` if empty.
#[must_use]
pub fn sanitize_hostname(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            last_was_dash = c == '-';
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lexically join `relative` onto `root` without touching the filesystem,
/// rejecting any path that would escape `root` via a `..` component.
///
/// Used where the target may not exist yet (manifest validation, restore's
/// up-front path-safety pass) — canonicalization requires existence, so it
/// cannot be used there. Absolute `relative` paths are rejected outright.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, ManifestError> {
    let rel_path = Path::new(relative);
    if rel_path.is_absolute() {
        return Err(ManifestError::PathEscape {
            path: relative.to_string(),
        });
    }

    let mut stack: Vec<std::ffi::OsString> = Vec::new();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => stack.push(part.to_os_string()),
            Component::CurDir => {}
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return Err(ManifestError::PathEscape {
                        path: relative.to_string(),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ManifestError::PathEscape {
                    path: relative.to_string(),
                });
            }
        }
    }

    let mut resolved = root.to_path_buf();
    for part in stack {
        resolved.push(part);
    }
    Ok(resolved)
}

/// "Inside root" check for paths that already exist on disk: canonicalize
/// both operands (following symlinks) and verify descendance. Never compare
/// via string prefix.
pub fn is_inside_root_fs(candidate: &Path, root: &Path) -> std::io::Result<bool> {
    let root_canon = root.canonicalize()?;
    let candidate_canon = candidate.canonicalize()?;
    Ok(candidate_canon.starts_with(&root_canon))
}

/// Collapse `..`/`.` components without touching the filesystem. Used where
/// [`is_inside_root_fs`] can't apply because the candidate doesn't exist yet
/// (restore's up-front path-safety pass runs before anything is cloned or
/// written).
#[must_use]
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut stack: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                stack.pop();
            }
            Component::CurDir => {}
            other => stack.push(other),
        }
    }
    stack.into_iter().collect()
}

/// "Inside root" check for paths that may not exist on disk yet: lexically
/// normalize both operands and verify descendance. Never compare via string
/// prefix on the raw, un-normalized paths.
#[must_use]
pub fn is_inside_root_lexical(candidate: &Path, root: &Path) -> bool {
    normalize_lexical(candidate).starts_with(normalize_lexical(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_underscore_and_hyphen() {
        assert!(is_valid_name("dev_01"));
        assert!(is_valid_name("dev-01"));
    }

    #[test]
    fn rejects_empty_and_traversal() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("../evil"));
    }

    #[test]
    fn sanitizes_hostname_collapsing_runs() {
        assert_eq!(sanitize_hostname("My Laptop!!"), "My-Laptop");
        assert_eq!(sanitize_hostname("...."), "unknown");
        assert_eq!(sanitize_hostname(""), "unknown");
    }

    #[test]
    fn safe_join_rejects_parent_escape() {
        let root = Path::new("/home/dev");
        assert!(safe_join(root, "../etc/passwd").is_err());
    }

    #[test]
    fn safe_join_accepts_plain_relative_path() {
        let root = Path::new("/home/dev");
        let joined = safe_join(root, "files/note.md").unwrap();
        assert_eq!(joined, PathBuf::from("/home/dev/files/note.md"));
    }

    #[test]
    fn safe_join_dot_resolves_to_root_itself() {
        let root = Path::new("/home/dev");
        assert_eq!(safe_join(root, ".").unwrap(), root);
    }

    #[test]
    fn safe_join_rejects_absolute_paths() {
        let root = Path::new("/home/dev");
        assert!(safe_join(root, "/etc/passwd").is_err());
    }

    #[test]
    fn safe_join_rejects_escape_after_descending() {
        let root = Path::new("/home/dev");
        // a/../../escape nets one level above root
        assert!(safe_join(root, "a/../../escape").is_err());
    }

    #[test]
    fn lexical_containment_accepts_descendant() {
        let root = Path::new("/home/dev");
        assert!(is_inside_root_lexical(Path::new("/home/dev/proj-wip"), root));
    }

    #[test]
    fn lexical_containment_rejects_escape_via_parent_component() {
        let root = Path::new("/home/dev/proj");
        assert!(!is_inside_root_lexical(Path::new("/home/dev/proj/../../etc"), root));
    }
}
