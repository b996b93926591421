//! Pure parsing functions for `jj`'s textual output.
//!
//! Kept separate from [`crate::jj_cli`] so the parsing logic — the part most
//! likely to drift with jj wording changes (§9 open question) — is testable
//! without spawning a subprocess.

use crate::error::JjError;
use crate::types::{BookmarkRecord, ChangeId, CommitId, RemoteRecord, UncommittedRecord};

pub const FIELD_SEP: &str = "\u{1f}";

pub fn parse_remotes(out: &str) -> Result<Vec<RemoteRecord>, JjError> {
    out.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next().ok_or_else(|| JjError::ParseError {
                operation: "git remote list".to_string(),
                reason: format!("missing remote name in line {line:?}"),
            })?;
            let url = parts.next().ok_or_else(|| JjError::ParseError {
                operation: "git remote list".to_string(),
                reason: format!("missing remote url in line {line:?}"),
            })?;
            Ok(RemoteRecord {
                name: name.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

pub fn parse_current_state_fields(line: &str) -> Result<(ChangeId, CommitId, Option<String>), JjError> {
    let mut fields = line.split(FIELD_SEP);
    let change_id = fields.next().ok_or_else(|| JjError::ParseError {
        operation: "log @".to_string(),
        reason: "empty output".to_string(),
    })?;
    let commit_id = fields.next().ok_or_else(|| JjError::ParseError {
        operation: "log @".to_string(),
        reason: "missing commit id field".to_string(),
    })?;
    let bookmarks = fields.next().unwrap_or_default();
    let bookmark = bookmarks.split(',').find(|b| !b.is_empty()).map(str::to_string);
    Ok((ChangeId(change_id.to_string()), CommitId(commit_id.to_string()), bookmark))
}

pub fn parse_workspaces(out: &str) -> Vec<String> {
    out.lines()
        .filter_map(|line| line.split(':').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_uncommitted(out: &str) -> Vec<UncommittedRecord> {
    out.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut fields = line.split(FIELD_SEP);
            let change_id = fields.next().unwrap_or_default().to_string();
            let commit_id = fields.next().unwrap_or_default().to_string();
            let description = fields.next().unwrap_or_default().to_string();
            let bookmarks = fields.next().unwrap_or_default();
            let bookmark = bookmarks.split(',').find(|b| !b.is_empty()).map(str::to_string);
            UncommittedRecord {
                change_id: ChangeId(change_id),
                commit_id: CommitId(commit_id),
                description,
                bookmark,
            }
        })
        .collect()
}

pub fn parse_bookmarks(out: &str) -> Vec<BookmarkRecord> {
    let mut by_name: std::collections::HashMap<String, BookmarkRecord> =
        std::collections::HashMap::new();
    for line in out.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split(FIELD_SEP);
        let raw_name = fields.next().unwrap_or_default();
        let change_id = fields.next().unwrap_or_default().to_string();
        let kind = fields.next().unwrap_or_default();

        // Local bookmark name is everything before '@' and before ':'.
        let local_name = raw_name
            .split('@')
            .next()
            .unwrap_or(raw_name)
            .split(':')
            .next()
            .unwrap_or(raw_name)
            .to_string();

        let entry = by_name.entry(local_name.clone()).or_insert(BookmarkRecord {
            name: local_name,
            change_id: ChangeId(change_id.clone()),
            synced_with_remote: false,
        });
        if kind == "remote" && entry.change_id.0 == change_id {
            entry.synced_with_remote = true;
        }
    }
    by_name.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_remote_list() {
        let out = "origin git@h:u/r\nupstream https://h/u/r2\n";
        let remotes = parse_remotes(out).unwrap();
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].name, "origin");
        assert_eq!(remotes[0].url, "git@h:u/r");
    }

    #[test]
    fn rejects_malformed_remote_line() {
        let out = "origin\n";
        assert!(parse_remotes(out).is_err());
    }

    #[test]
    fn parses_current_state_with_bookmark() {
        let line = format!("abcd1234{FIELD_SEP}deadbeef{FIELD_SEP}main");
        let (change_id, commit_id, bookmark) = parse_current_state_fields(&line).unwrap();
        assert_eq!(change_id.0, "abcd1234");
        assert_eq!(commit_id.0, "deadbeef");
        assert_eq!(bookmark.as_deref(), Some("main"));
    }

    #[test]
    fn parses_current_state_without_bookmark() {
        let line = format!("abcd1234{FIELD_SEP}deadbeef{FIELD_SEP}");
        let (_, _, bookmark) = parse_current_state_fields(&line).unwrap();
        assert_eq!(bookmark, None);
    }

    #[test]
    fn parses_workspace_names() {
        let out = "default: /path/to/repo (abcd1234)\nfeature: /path/to/feature (efef5656)\n";
        assert_eq!(parse_workspaces(out), vec!["default", "feature"]);
    }

    #[test]
    fn derives_local_bookmark_name_before_at_and_colon() {
        let out = format!("main@origin{FIELD_SEP}abcd1234{FIELD_SEP}remote\n");
        let bookmarks = parse_bookmarks(&out);
        assert_eq!(bookmarks.len(), 1);
        assert_eq!(bookmarks[0].name, "main");
        assert!(bookmarks[0].synced_with_remote);
    }

    #[test]
    fn bookmark_not_synced_when_remote_differs() {
        let out = format!(
            "main{FIELD_SEP}abcd1234{FIELD_SEP}local\nmain@origin{FIELD_SEP}efef5656{FIELD_SEP}remote\n"
        );
        let bookmarks = parse_bookmarks(&out);
        assert_eq!(bookmarks.len(), 1);
        assert!(!bookmarks[0].synced_with_remote);
    }
}
