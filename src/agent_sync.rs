//! Sync rules for the two agent-product session directories (§4.5).
//!
//! Agent A (Claude Code) is synced with a path whitelist; agent B (OpenCode)
//! is synced with a first-segment directory-prefix whitelist. Both rules are
//! pure functions over a relative path so they can be unit tested without a
//! real directory tree.

/// Claude Code's on-disk layout under `~/.claude/`. Exact entries: top-level
/// configuration and history files, the `projects`/`plans`/`todos`/
/// `file-history` directories, and the two plugin manifests named in §4.5.
/// Credential files (`.credentials.json`) are deliberately absent.
const CLAUDE_CODE_WHITELIST: &[&str] = &[
    "config.json",
    "history.jsonl",
    "CLAUDE.md",
    "projects",
    "plans",
    "todos",
    "file-history",
    "plugins/config.json",
    "plugins/installed-plugins.json",
];

/// OpenCode's storage layout keys its objects by first path segment.
const OPENCODE_PREFIX_WHITELIST: &[&str] = &["session", "message", "part", "project", "todo"];

/// Whether `relative_path` (POSIX separators) is included by the Claude Code
/// (agent A) whitelist rule: exact match, or one of the whitelisted
/// directory prefixes followed by `/`.
#[must_use]
pub fn claude_code_included(relative_path: &str) -> bool {
    CLAUDE_CODE_WHITELIST.iter().any(|entry| {
        relative_path == *entry || relative_path.starts_with(&format!("{entry}/"))
    })
}

/// Whether `relative_path` is included by the OpenCode (agent B)
/// directory-prefix rule: its first path segment is in the whitelist.
#[must_use]
pub fn opencode_included(relative_path: &str) -> bool {
    let first_segment = relative_path.split('/').next().unwrap_or("");
    OPENCODE_PREFIX_WHITELIST.contains(&first_segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_code_includes_exact_whitelisted_file() {
        assert!(claude_code_included("config.json"));
        assert!(claude_code_included("history.jsonl"));
    }

    #[test]
    fn claude_code_includes_whitelisted_directory_contents() {
        assert!(claude_code_included("projects/repo-a/session.json"));
        assert!(claude_code_included("plugins/config.json"));
    }

    #[test]
    fn claude_code_excludes_credentials() {
        assert!(!claude_code_included(".credentials.json"));
    }

    #[test]
    fn claude_code_excludes_unlisted_path() {
        assert!(!claude_code_included("cache/tmp.bin"));
    }

    #[test]
    fn claude_code_does_not_prefix_match_similarly_named_file() {
        // "projects-backup" must not be swept in by the "projects" prefix rule.
        assert!(!claude_code_included("projects-backup/x"));
    }

    #[test]
    fn opencode_includes_whitelisted_first_segment() {
        assert!(opencode_included("session/abc.json"));
        assert!(opencode_included("todo/list.json"));
    }

    #[test]
    fn opencode_excludes_other_first_segment() {
        assert!(!opencode_included("config/settings.json"));
    }
}
