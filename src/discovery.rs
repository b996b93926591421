//! Discovery Engine: a single-pass walk of `root_dir` that classifies every
//! directory (primary repository, secondary workspace, workspace-tree
//! parent, or ordinary) and enumerates backup-eligible loose files and
//! symlinks.
//!
//! Grounded on `bobisme-maw`'s own hand-rolled `std::fs::read_dir` recursion
//! (`epoch_gc.rs`/`doctor.rs`) rather than pulling in a walking crate — the
//! teacher never reaches for `ignore`/`walkdir`.

use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::io::Read;
use std::path::{Path, PathBuf};

use devenv_vcs::RemoteRecord;

use crate::error::ReportedError;

/// Directories never descended into, regardless of position in the tree.
const SKIP_SET: &[&str] = &[
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".cache",
    "target",
    "dist",
    ".cargo",
    ".rustup",
    ".mise",
    ".local",
    ".npm",
    ".bun",
    "go",
    ".gradle",
    ".m2",
];

/// Dot-directories are skipped by rule 1 except this one — `.dotfiles` is
/// still walked (it may contain a jj repo of its own) but never contributes
/// loose files or symlinks directly.
const DOTFILES_DIR: &str = ".dotfiles";

const MAX_LOOSE_FILE_BYTES: u64 = 10 * 1024 * 1024;
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    Primary,
    Secondary,
}

#[derive(Debug, Clone)]
struct RawWorkspace {
    path: PathBuf,
    kind: WorkspaceKind,
    /// For a secondary workspace, the resolved absolute path to the primary
    /// repo's `.jj` directory, read from `.jj/repo`.
    repo_pointer: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DiscoveredWorkspace {
    /// Derived from the directory's basename for secondary workspaces;
    /// always `"default"` for a repo's own primary checkout (jj's own name
    /// for the primary workspace).
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DiscoveredRepo {
    pub primary_path: PathBuf,
    pub workspaces: Vec<DiscoveredWorkspace>,
}

#[derive(Debug, Clone)]
pub struct DiscoveredSymlink {
    /// Absolute path of the link.
    pub link_path: PathBuf,
    /// Target, relative to `root_dir`.
    pub target_relative: String,
}

#[derive(Debug, Default, Clone)]
pub struct DiscoveryResult {
    pub repos: Vec<DiscoveredRepo>,
    /// Absolute paths of eligible loose files.
    pub files: Vec<PathBuf>,
    pub symlinks: Vec<DiscoveredSymlink>,
    pub warnings: Vec<ReportedError>,
}

/// Walk `root` and classify it per §4.2. This is the full Discovery Engine
/// entry point; repository naming (which needs a remote lookup via
/// [`devenv_vcs::JjDriver`]) happens in the Backup Orchestrator, which
/// consumes this result.
pub fn discover(root: &Path) -> DiscoveryResult {
    let mut raw_workspaces: Vec<RawWorkspace> = Vec::new();
    let mut symlinks: Vec<DiscoveredSymlink> = Vec::new();
    let mut warnings: Vec<ReportedError> = Vec::new();

    walk_classify(root, root, false, &mut raw_workspaces, &mut symlinks, &mut warnings);

    let workspace_paths: HashSet<PathBuf> = raw_workspaces.iter().map(|w| w.path.clone()).collect();
    let repos = group_repos(&raw_workspaces, &mut warnings);

    let workspace_tree_parents: HashSet<PathBuf> = raw_workspaces
        .iter()
        .filter_map(|w| w.path.parent().map(Path::to_path_buf))
        .filter(|parent| parent != root && !workspace_paths.contains(parent))
        .collect();

    let mut files = Vec::new();
    collect_direct_child_files(root, &mut files, &mut warnings);
    for parent in &workspace_tree_parents {
        collect_direct_child_files(parent, &mut files, &mut warnings);
        for entry_path in read_dir_paths(parent, &mut warnings) {
            if workspace_paths.contains(&entry_path) {
                continue;
            }
            if is_dot_or_skipped(&entry_path) {
                continue;
            }
            if entry_path.is_dir() {
                collect_files_recursive(&entry_path, &workspace_paths, &mut files, &mut warnings);
            }
        }
    }

    DiscoveryResult {
        repos,
        files,
        symlinks,
        warnings,
    }
}

fn is_dot_or_skipped(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|name| name.starts_with('.') || SKIP_SET.contains(&name))
}

fn should_skip_dir(name: &str) -> bool {
    SKIP_SET.contains(&name) || (name.starts_with('.') && name != DOTFILES_DIR)
}

#[allow(clippy::too_many_arguments)]
fn walk_classify(
    dir: &Path,
    root: &Path,
    in_dotfiles: bool,
    workspaces: &mut Vec<RawWorkspace>,
    symlinks: &mut Vec<DiscoveredSymlink>,
    warnings: &mut Vec<ReportedError>,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warnings.push(ReportedError::new(format!("discovery: {}", dir.display()), e.to_string()));
            return;
        }
    };

    let mut subdirs: Vec<(PathBuf, String)> = Vec::new();
    let mut has_jj = false;

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let name = entry.file_name();
        let name_str = name.to_string_lossy().into_owned();

        if file_type.is_symlink() {
            if !in_dotfiles {
                collect_symlink(&path, root, symlinks, warnings);
            }
            continue;
        }
        if file_type.is_dir() {
            if name_str == ".jj" {
                has_jj = true;
                continue;
            }
            if should_skip_dir(&name_str) {
                continue;
            }
            subdirs.push((path, name_str));
        }
    }

    if has_jj {
        classify_workspace(dir, workspaces, warnings);
        return; // rule 2: never descend past a `.jj` subdirectory
    }

    for (subdir_path, subdir_name) in subdirs {
        let child_in_dotfiles = in_dotfiles || subdir_name == DOTFILES_DIR;
        walk_classify(&subdir_path, root, child_in_dotfiles, workspaces, symlinks, warnings);
    }
}

fn classify_workspace(dir: &Path, workspaces: &mut Vec<RawWorkspace>, warnings: &mut Vec<ReportedError>) {
    let repo_marker = dir.join(".jj").join("repo");
    let metadata = match std::fs::symlink_metadata(&repo_marker) {
        Ok(m) => m,
        Err(e) => {
            warnings.push(ReportedError::new(
                format!("discovery: {}", dir.display()),
                format!(".jj/repo unreadable: {e}"),
            ));
            return;
        }
    };

    if metadata.is_dir() {
        workspaces.push(RawWorkspace {
            path: dir.to_path_buf(),
            kind: WorkspaceKind::Primary,
            repo_pointer: None,
        });
    } else {
        let pointer = match std::fs::read_to_string(&repo_marker) {
            Ok(s) => s,
            Err(e) => {
                warnings.push(ReportedError::new(
                    format!("discovery: {}", dir.display()),
                    format!("failed to read .jj/repo: {e}"),
                ));
                return;
            }
        };
        let pointer_path = Path::new(pointer.trim());
        let resolved = if pointer_path.is_absolute() {
            pointer_path.to_path_buf()
        } else {
            dir.join(".jj").join(pointer_path)
        };
        workspaces.push(RawWorkspace {
            path: dir.to_path_buf(),
            kind: WorkspaceKind::Secondary,
            repo_pointer: Some(resolved),
        });
    }
}

fn group_repos(raw: &[RawWorkspace], warnings: &mut Vec<ReportedError>) -> Vec<DiscoveredRepo> {
    let mut by_jj_dir: HashMap<PathBuf, DiscoveredRepo> = HashMap::new();

    for w in raw.iter().filter(|w| w.kind == WorkspaceKind::Primary) {
        let jj_dir = canonical_or_self(&w.path.join(".jj"));
        by_jj_dir.insert(
            jj_dir,
            DiscoveredRepo {
                primary_path: w.path.clone(),
                workspaces: vec![DiscoveredWorkspace {
                    name: "default".to_string(),
                    path: w.path.clone(),
                }],
            },
        );
    }

    for w in raw.iter().filter(|w| w.kind == WorkspaceKind::Secondary) {
        let Some(pointer) = &w.repo_pointer else {
            continue;
        };
        let jj_dir = canonical_or_self(pointer);
        match by_jj_dir.get_mut(&jj_dir) {
            Some(repo) => {
                let name = w
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| w.path.display().to_string());
                repo.workspaces.push(DiscoveredWorkspace { name, path: w.path.clone() });
            }
            None => warnings.push(ReportedError::new(
                format!("discovery: {}", w.path.display()),
                "secondary workspace points to a primary repo outside root_dir; skipping".to_string(),
            )),
        }
    }

    by_jj_dir.into_values().collect()
}

fn canonical_or_self(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn collect_symlink(path: &Path, root: &Path, out: &mut Vec<DiscoveredSymlink>, warnings: &mut Vec<ReportedError>) {
    let Ok(resolved) = path.canonicalize() else {
        return; // broken symlink: silently excluded
    };
    let Ok(root_canon) = root.canonicalize() else {
        warnings.push(ReportedError::new(
            "discovery",
            format!("root_dir {} does not exist", root.display()),
        ));
        return;
    };
    let Ok(relative) = resolved.strip_prefix(&root_canon) else {
        return; // target outside root_dir: excluded
    };
    out.push(DiscoveredSymlink {
        link_path: path.to_path_buf(),
        target_relative: relative.to_string_lossy().replace('\\', "/"),
    });
}

fn read_dir_paths(dir: &Path, warnings: &mut Vec<ReportedError>) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
        Err(e) => {
            warnings.push(ReportedError::new(format!("discovery: {}", dir.display()), e.to_string()));
            Vec::new()
        }
    }
}

fn collect_direct_child_files(dir: &Path, out: &mut Vec<PathBuf>, warnings: &mut Vec<ReportedError>) {
    for path in read_dir_paths(dir, warnings) {
        let Ok(metadata) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        if file_eligible(&path, &metadata).unwrap_or(false) {
            out.push(path);
        }
    }
}

fn collect_files_recursive(
    dir: &Path,
    workspace_paths: &HashSet<PathBuf>,
    out: &mut Vec<PathBuf>,
    warnings: &mut Vec<ReportedError>,
) {
    for path in read_dir_paths(dir, warnings) {
        let Ok(metadata) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        if metadata.is_dir() {
            if workspace_paths.contains(&path) || is_dot_or_skipped(&path) {
                continue;
            }
            collect_files_recursive(&path, workspace_paths, out, warnings);
        } else if metadata.is_file() && file_eligible(&path, &metadata).unwrap_or(false) {
            out.push(path);
        }
    }
}

/// A regular file qualifies iff its name doesn't start with `.`, its size is
/// at most 10 MiB, and the first 8 KiB contain no NUL byte (the binary
/// heuristic preserved verbatim per §9's open question, UTF-16 false
/// negatives and all).
fn file_eligible(path: &Path, metadata: &Metadata) -> std::io::Result<bool> {
    let starts_with_dot = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.'));
    if starts_with_dot {
        return Ok(false);
    }
    if metadata.len() > MAX_LOOSE_FILE_BYTES {
        return Ok(false);
    }
    if contains_nul_in_prefix(path)? {
        return Ok(false);
    }
    Ok(true)
}

fn contains_nul_in_prefix(path: &Path) -> std::io::Result<bool> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; BINARY_SNIFF_BYTES];
    let mut total_read = 0;
    loop {
        let n = file.read(&mut buf[total_read..])?;
        if n == 0 {
            break;
        }
        total_read += n;
        if total_read == buf.len() {
            break;
        }
    }
    Ok(buf[..total_read].contains(&0))
}

/// Derive a unique repository name from its remotes: origin (or the first
/// remote if there is no origin), strip trailing `/`, take the final
/// segment, strip a trailing `.git`.
#[must_use]
pub fn derive_repo_name(remotes: &[RemoteRecord]) -> Option<String> {
    let chosen = remotes
        .iter()
        .find(|r| r.name == "origin")
        .or_else(|| remotes.first())?;
    let trimmed = chosen.url.trim_end_matches('/');
    let last_segment = trimmed.rsplit(['/', ':']).next()?;
    Some(last_segment.strip_suffix(".git").unwrap_or(last_segment).to_string())
}

/// Disambiguate a repo name against names already taken, appending `-1`,
/// `-2`, … on collision.
#[must_use]
pub fn disambiguate_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
