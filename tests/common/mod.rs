#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use repograph::model::{ChangeType, CommitRecord, FileChange};

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

pub fn commit(sha: &str, name: &str, email: &str, timestamp: DateTime<Utc>, files: Vec<FileChange>) -> CommitRecord {
    CommitRecord {
        sha: sha.to_string(),
        author_name: name.to_string(),
        author_email: email.to_string(),
        timestamp,
        subject: format!("commit {sha}"),
        is_merge: false,
        parent_shas: Vec::new(),
        files,
    }
}

pub fn merge(mut record: CommitRecord) -> CommitRecord {
    record.is_merge = true;
    record.parent_shas = vec!["p1".to_string(), "p2".to_string()];
    record
}

pub fn modify(path: &str, additions: u32, deletions: u32) -> FileChange {
    FileChange::new(path, additions, deletions, ChangeType::Modify)
}

pub fn add(path: &str, additions: u32) -> FileChange {
    FileChange::new(path, additions, 0, ChangeType::Add)
}

pub fn delete(path: &str, deletions: u32) -> FileChange {
    FileChange::new(path, 0, deletions, ChangeType::Delete)
}
