use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
    Rename,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
            ChangeType::Rename => "rename",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// Source path of a rename; `None` for every other change type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
    pub additions: u32,
    pub deletions: u32,
    pub change_type: ChangeType,
    #[serde(default)]
    pub binary: bool,
}

impl FileChange {
    pub fn new(path: impl Into<String>, additions: u32, deletions: u32, change_type: ChangeType) -> Self {
        Self {
            path: path.into(),
            previous_path: None,
            additions,
            deletions,
            change_type,
            binary: false,
        }
    }

    pub fn renamed(
        previous_path: impl Into<String>,
        path: impl Into<String>,
        additions: u32,
        deletions: u32,
    ) -> Self {
        Self {
            path: path.into(),
            previous_path: Some(previous_path.into()),
            additions,
            deletions,
            change_type: ChangeType::Rename,
            binary: false,
        }
    }

    pub fn churn(&self) -> u64 {
        self.additions as u64 + self.deletions as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub is_merge: bool,
    pub parent_shas: Vec<String>,
    pub files: Vec<FileChange>,
}

/// Deduplicated contributor after alias merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorIdentity {
    pub canonical_id: String,
    pub display_name: String,
    pub canonical_email: String,
    pub aliases: BTreeSet<Alias>,
    pub total_commits: u64,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotspot {
    pub path: String,
    pub change_count: u64,
    pub additions: u64,
    pub deletions: u64,
    pub commit_count: u32,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAggregate {
    pub path: String,
    pub file_count: u64,
    pub change_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionAggregate {
    pub extension: String,
    pub file_count: u64,
    pub change_count: u64,
}

/// Recoverable per-record issue, accumulated instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    Parse { reference: String, reason: String },
    IdentityResolution { canonical_id: String, detail: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Parse { reference, reason } => {
                write!(f, "skipped log entry {reference}: {reason}")
            }
            Warning::IdentityResolution { canonical_id, detail } => {
                write!(f, "ambiguous alias merge for {canonical_id}: {detail}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DateRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new() -> Self {
        Self { since: None, until: None }
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        if let Some(since) = self.since {
            if timestamp < &since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if timestamp > &until {
                return false;
            }
        }
        true
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::new()
    }
}
