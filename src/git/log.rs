//! Parser for raw `git log` dumps.
//!
//! The expected input is produced by
//!
//! ```text
//! git log --numstat --summary --format=%x1e%H%x1f%aI%x1f%an%x1f%ae%x1f%P%x1f%s
//! ```
//!
//! Every entry starts with a record separator (`0x1e`) followed by
//! unit-separated header fields, then numstat lines (`added<TAB>deleted<TAB>path`)
//! and optional `--summary` lines.

use super::LogEntry;
use crate::error::Result;
use crate::model::{ChangeType, CommitRecord, FileChange};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub const LOG_FORMAT: &str = "%x1e%H%x1f%aI%x1f%an%x1f%ae%x1f%P%x1f%s";

const RECORD_SEPARATOR: char = '\u{1e}';
const FIELD_SEPARATOR: char = '\u{1f}';
const RENAME_ARROWS: [&str; 2] = [" => ", " ⇒ "];

/// Iterates entries of a raw log in input order (git prints newest first).
pub struct LogParser<'a> {
    chunks: std::str::Split<'a, char>,
    index: usize,
}

impl<'a> LogParser<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut chunks = input.split(RECORD_SEPARATOR);
        // Anything before the first separator is not part of an entry.
        chunks.next();
        Self { chunks, index: 0 }
    }
}

impl Iterator for LogParser<'_> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;
        self.index += 1;
        Some(Ok(parse_entry(chunk, self.index)))
    }
}

fn parse_entry(chunk: &str, index: usize) -> LogEntry {
    let mut lines = chunk.lines();
    let header = lines.next().unwrap_or_default();
    let fields: Vec<&str> = header.splitn(6, FIELD_SEPARATOR).collect();
    let reference = fields
        .first()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("entry #{index}"));

    let malformed = |reason: String| LogEntry::Malformed {
        reference: reference.clone(),
        reason,
    };

    if fields.len() != 6 {
        return malformed(format!("expected 6 header fields, found {}", fields.len()));
    }
    let sha = fields[0].trim();
    if sha.len() < 7 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return malformed(format!("invalid sha '{sha}'"));
    }
    let timestamp = match DateTime::parse_from_rfc3339(fields[1].trim()) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => return malformed(format!("invalid date '{}': {e}", fields[1].trim())),
    };
    let parent_shas: Vec<String> = fields[4].split_whitespace().map(str::to_string).collect();

    let mut files: Vec<FileChange> = Vec::new();
    let mut kinds: HashMap<String, ChangeType> = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(' ') {
            if let Some((kind, path)) = parse_summary_line(line) {
                kinds.insert(path, kind);
            }
            continue;
        }
        match parse_numstat_line(line) {
            Some(change) => files.push(change),
            None => return malformed(format!("invalid numstat line '{line}'")),
        }
    }

    for change in files.iter_mut() {
        if change.change_type == ChangeType::Rename {
            continue;
        }
        if let Some(kind) = kinds.get(&change.path) {
            change.change_type = *kind;
        }
    }

    LogEntry::Commit(CommitRecord {
        sha: sha.to_string(),
        author_name: fields[2].trim().to_string(),
        author_email: fields[3].trim().to_string(),
        timestamp,
        subject: fields[5].trim().to_string(),
        is_merge: parent_shas.len() > 1,
        parent_shas,
        files,
    })
}

fn parse_numstat_line(line: &str) -> Option<FileChange> {
    let mut parts = line.splitn(3, '\t');
    let added = parts.next()?;
    let deleted = parts.next()?;
    let raw_path = unquote(parts.next()?.trim());
    if raw_path.is_empty() {
        return None;
    }

    let (additions, deletions, binary) = match (added, deleted) {
        ("-", "-") => (0, 0, true),
        (a, d) => (a.parse().ok()?, d.parse().ok()?, false),
    };

    let change = match expand_rename(&raw_path) {
        Some((old, new)) => FileChange::renamed(old, new, additions, deletions),
        None => FileChange::new(raw_path, additions, deletions, ChangeType::Modify),
    };
    Some(FileChange { binary, ..change })
}

/// `create mode 100644 path` / `delete mode 100644 path`
fn parse_summary_line(line: &str) -> Option<(ChangeType, String)> {
    let line = line.trim();
    let (kind, rest) = if let Some(rest) = line.strip_prefix("create mode ") {
        (ChangeType::Add, rest)
    } else if let Some(rest) = line.strip_prefix("delete mode ") {
        (ChangeType::Delete, rest)
    } else {
        return None;
    };
    let (_mode, path) = rest.split_once(' ')?;
    Some((kind, unquote(path.trim())))
}

/// Expand git's rename notation into `(old, new)` paths. Handles both the
/// plain `old => new` form and the compact `dir/{old => new}/file` form.
pub fn expand_rename(raw: &str) -> Option<(String, String)> {
    let arrow = RENAME_ARROWS.iter().copied().find(|a| raw.contains(a))?;

    if let (Some(open), Some(close)) = (raw.find('{'), raw.rfind('}')) {
        if open < close {
            let prefix = &raw[..open];
            let suffix = &raw[close + 1..];
            if let Some((old, new)) = raw[open + 1..close].split_once(arrow) {
                return Some((
                    join_rename_parts(prefix, old.trim(), suffix),
                    join_rename_parts(prefix, new.trim(), suffix),
                ));
            }
        }
    }

    let (old, new) = raw.split_once(arrow)?;
    let (old, new) = (old.trim(), new.trim());
    if old.is_empty() || new.is_empty() {
        return None;
    }
    Some((old.to_string(), new.to_string()))
}

fn join_rename_parts(prefix: &str, middle: &str, suffix: &str) -> String {
    let joined = format!("{prefix}{middle}{suffix}");
    let mut normalized = String::with_capacity(joined.len());
    for segment in joined.split('/').filter(|s| !s.is_empty()) {
        if !normalized.is_empty() {
            normalized.push('/');
        }
        normalized.push_str(segment);
    }
    normalized
}

fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}
