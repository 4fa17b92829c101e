//! Immutable repository snapshot assembled from the stage outputs.

use crate::hotspot::{extension_of, HotspotReport};
use crate::identity::IdentityTable;
use crate::metrics::{CommitSummary, RepositoryMetrics};
use crate::model::{
    ChangeType, CommitRecord, ContributorIdentity, DirectoryAggregate, ExtensionAggregate, Warning,
    SCHEMA_VERSION,
};
use crate::pipeline::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

pub const UNKNOWN_LANGUAGE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub language: String,
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl RepoInfo {
    /// Detect language from the tracked files and license from the worktree root.
    pub fn detect(name: impl Into<String>, root: Option<&Path>, tracked_files: &[String]) -> Self {
        Self {
            name: name.into(),
            language: primary_language(tracked_files),
            license: root.and_then(detect_license),
            path: root.map(|p| p.to_string_lossy().to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitSummary {
    pub commits: u64,
    pub merges: u64,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
    pub contributors: u64,
    pub tracked_files: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorSummary {
    pub name: String,
    pub email: String,
    pub commits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotspotSummary {
    pub path: String,
    pub changes: u64,
    pub additions: u64,
    pub deletions: u64,
    pub commits: u32,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchedFile {
    pub path: String,
    pub additions: u32,
    pub deletions: u32,
    pub change_type: ChangeType,
}

/// Per-commit slice of history carried into the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub sha: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub is_merge: bool,
    /// Canonical email of the resolved author.
    pub author: String,
    pub files: Vec<TouchedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryProfile {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub valid: bool,
    pub repo: RepoInfo,
    pub git_summary: GitSummary,
    pub contributors: Vec<ContributorSummary>,
    pub hotspots: Vec<HotspotSummary>,
    pub directories: Vec<DirectoryAggregate>,
    pub extensions: Vec<ExtensionAggregate>,
    pub metrics: RepositoryMetrics,
    pub identities: Vec<ContributorIdentity>,
    pub commits: Vec<CommitEntry>,
    pub warnings: Vec<Warning>,
    pub failures: Vec<StageFailure>,
}

/// Collects stage outputs; `assemble` freezes them into a profile that is
/// only `valid` when no stage failure was recorded.
#[derive(Debug)]
pub struct ProfileAssembler {
    repo: RepoInfo,
    top_n: usize,
    summary: CommitSummary,
    identities: IdentityTable,
    hotspots: HotspotReport,
    metrics: RepositoryMetrics,
    commits: Vec<CommitEntry>,
    warnings: Vec<Warning>,
    failures: Vec<StageFailure>,
}

impl ProfileAssembler {
    pub fn new(repo: RepoInfo, top_n: usize) -> Self {
        Self {
            repo,
            top_n,
            summary: CommitSummary::default(),
            identities: IdentityTable::default(),
            hotspots: HotspotReport::default(),
            metrics: RepositoryMetrics::default(),
            commits: Vec::new(),
            warnings: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn repo(&self) -> &RepoInfo {
        &self.repo
    }

    pub fn set_repo(&mut self, repo: RepoInfo) {
        self.repo = repo;
    }

    pub fn identity_table(&self) -> &IdentityTable {
        &self.identities
    }

    /// Attribute each record to its resolved identity and keep the ledger.
    pub fn history(&mut self, records: &[CommitRecord], identities: &IdentityTable) -> &mut Self {
        self.commits = records
            .iter()
            .map(|record| CommitEntry {
                sha: record.sha.clone(),
                subject: record.subject.clone(),
                date: record.timestamp,
                is_merge: record.is_merge,
                author: identities
                    .for_commit(record)
                    .map(|i| i.canonical_email.clone())
                    .unwrap_or_else(|| crate::identity::UNKNOWN_IDENTITY.to_string()),
                files: record
                    .files
                    .iter()
                    .map(|f| TouchedFile {
                        path: f.path.clone(),
                        additions: f.additions,
                        deletions: f.deletions,
                        change_type: f.change_type,
                    })
                    .collect(),
            })
            .collect();
        self
    }

    pub fn summary(&mut self, summary: CommitSummary) -> &mut Self {
        self.summary = summary;
        self
    }

    pub fn identities(&mut self, identities: IdentityTable) -> &mut Self {
        self.identities = identities;
        self
    }

    pub fn hotspots(&mut self, hotspots: HotspotReport) -> &mut Self {
        self.hotspots = hotspots;
        self
    }

    pub fn metrics(&mut self, metrics: RepositoryMetrics) -> &mut Self {
        self.metrics = metrics;
        self
    }

    pub fn warnings(&mut self, warnings: impl IntoIterator<Item = Warning>) -> &mut Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn stage_failed(&mut self, stage: Stage, reason: impl Into<String>) -> &mut Self {
        self.failures.push(StageFailure {
            stage,
            reason: reason.into(),
        });
        self
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn assemble(self) -> RepositoryProfile {
        let contributors = self
            .identities
            .ranked()
            .into_iter()
            .take(self.top_n)
            .map(|i| ContributorSummary {
                name: i.display_name.clone(),
                email: i.canonical_email.clone(),
                commits: i.total_commits,
            })
            .collect();

        let hotspots = self
            .hotspots
            .top
            .iter()
            .map(|h| HotspotSummary {
                path: h.path.clone(),
                changes: h.change_count,
                additions: h.additions,
                deletions: h.deletions,
                commits: h.commit_count,
                last_modified: h.last_modified,
            })
            .collect();

        let git_summary = GitSummary {
            commits: self.summary.commits,
            merges: self.summary.merges,
            first_commit: self.summary.first_commit,
            last_commit: self.summary.last_commit,
            contributors: self.identities.len() as u64,
            tracked_files: self.hotspots.tracked_files.len() as u64,
        };

        let valid = self.failures.is_empty();
        debug!(valid, repo = %self.repo.name, "Assembled repository profile");

        RepositoryProfile {
            version: SCHEMA_VERSION,
            generated_at: Utc::now(),
            valid,
            repo: self.repo,
            git_summary,
            contributors,
            hotspots,
            directories: self.hotspots.directories,
            extensions: self.hotspots.extensions,
            metrics: self.metrics,
            identities: self.identities.into_identities().into_values().collect(),
            commits: self.commits,
            warnings: self.warnings,
            failures: self.failures,
        }
    }
}

const LANGUAGES: &[(&str, &str)] = &[
    ("rs", "Rust"),
    ("py", "Python"),
    ("js", "JavaScript"),
    ("jsx", "JavaScript"),
    ("mjs", "JavaScript"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("go", "Go"),
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("c", "C"),
    ("h", "C"),
    ("cc", "C++"),
    ("cpp", "C++"),
    ("hpp", "C++"),
    ("cs", "C#"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("swift", "Swift"),
    ("scala", "Scala"),
    ("sh", "Shell"),
    ("ex", "Elixir"),
    ("exs", "Elixir"),
    ("hs", "Haskell"),
    ("lua", "Lua"),
    ("dart", "Dart"),
];

pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = extension_of(path);
    LANGUAGES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, language)| *language)
}

/// Most common language over `files`; ties resolve alphabetically.
pub fn primary_language(files: &[String]) -> String {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for path in files {
        if let Some(language) = language_for_path(path) {
            *counts.entry(language).or_insert(0) += 1;
        }
    }
    let best = counts.values().copied().max().unwrap_or(0);
    counts
        .into_iter()
        .find(|(_, count)| *count == best && best > 0)
        .map(|(language, _)| language.to_string())
        .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string())
}

const LICENSE_FILES: &[&str] = &[
    "LICENSE",
    "LICENSE.md",
    "LICENSE.txt",
    "LICENCE",
    "LICENCE.md",
    "COPYING",
    "COPYING.md",
    "LICENSE-MIT",
    "LICENSE-APACHE",
];

/// Identify the license of a worktree from its top-level license file.
pub fn detect_license(root: &Path) -> Option<String> {
    for name in LICENSE_FILES {
        let path = root.join(name);
        let Ok(file) = std::fs::File::open(&path) else {
            continue;
        };
        let mut head = Vec::with_capacity(4096);
        if file.take(4096).read_to_end(&mut head).is_err() {
            continue;
        }
        let text = String::from_utf8_lossy(&head);
        debug!("Detecting license from {}", path.display());
        return Some(classify_license(&text).unwrap_or("Other").to_string());
    }
    None
}

pub fn classify_license(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    let has = |needle: &str| upper.contains(needle);

    if has("GNU AFFERO GENERAL PUBLIC LICENSE") {
        Some("AGPL-3.0")
    } else if has("GNU LESSER GENERAL PUBLIC LICENSE") {
        Some(if has("VERSION 2.1") { "LGPL-2.1" } else { "LGPL-3.0" })
    } else if has("GNU GENERAL PUBLIC LICENSE") {
        Some(if has("VERSION 2") { "GPL-2.0" } else { "GPL-3.0" })
    } else if has("APACHE LICENSE") {
        Some("Apache-2.0")
    } else if has("MOZILLA PUBLIC LICENSE") {
        Some("MPL-2.0")
    } else if has("MIT LICENSE") || has("PERMISSION IS HEREBY GRANTED, FREE OF CHARGE") {
        Some("MIT")
    } else if has("ISC LICENSE") || has("PERMISSION TO USE, COPY, MODIFY, AND/OR DISTRIBUTE") {
        Some("ISC")
    } else if has("REDISTRIBUTION AND USE IN SOURCE AND BINARY FORMS") {
        Some(if has("NEITHER THE NAME") { "BSD-3-Clause" } else { "BSD-2-Clause" })
    } else if has("THIS IS FREE AND UNENCUMBERED SOFTWARE") {
        Some("Unlicense")
    } else {
        None
    }
}
