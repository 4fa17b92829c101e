use crate::config::FilterPolicy;
use crate::model::{ChangeType, CommitRecord, DirectoryAggregate, ExtensionAggregate, FileChange, Hotspot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

pub const ROOT_DIRECTORY: &str = ".";
pub const NO_EXTENSION: &str = "(none)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotspotOptions {
    pub top_n: usize,
    pub directory_depth: u32,
    pub count_merge_churn: bool,
}

impl Default for HotspotOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            directory_depth: 1,
            count_merge_churn: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotspotReport {
    /// Every non-ignored path, ranked.
    pub ranked: Vec<Hotspot>,
    /// The first `top_n` entries of `ranked`.
    pub top: Vec<Hotspot>,
    pub directories: Vec<DirectoryAggregate>,
    pub extensions: Vec<ExtensionAggregate>,
    /// Paths whose last recorded change was not a deletion, sorted.
    pub tracked_files: Vec<String>,
    pub ignored_changes: u64,
}

#[derive(Debug, Clone)]
struct PathChurn {
    additions: u64,
    deletions: u64,
    commit_count: u32,
    last_modified: DateTime<Utc>,
    deleted: bool,
}

impl PathChurn {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            additions: 0,
            deletions: 0,
            commit_count: 0,
            last_modified: timestamp,
            deleted: false,
        }
    }

    fn add_stats(&mut self, change: &FileChange) {
        self.additions += change.additions as u64;
        self.deletions += change.deletions as u64;
        self.commit_count += 1;
    }

    /// Carry the history of a renamed path forward.
    fn absorb(&mut self, previous: PathChurn) {
        self.additions += previous.additions;
        self.deletions += previous.deletions;
        self.commit_count += previous.commit_count;
        self.last_modified = self.last_modified.max(previous.last_modified);
    }
}

pub struct HotspotCalculator<'a> {
    policy: &'a FilterPolicy,
    options: HotspotOptions,
}

impl<'a> HotspotCalculator<'a> {
    pub fn new(policy: &'a FilterPolicy, options: HotspotOptions) -> Self {
        Self { policy, options }
    }

    pub fn compute(&self, records: &[CommitRecord]) -> HotspotReport {
        let mut churn: HashMap<String, PathChurn> = HashMap::new();
        let mut ignored_changes = 0u64;

        for record in records {
            let count_churn = !record.is_merge || self.options.count_merge_churn;

            for change in &record.files {
                if self.policy.is_ignored(&change.path) {
                    if let Some(previous) = &change.previous_path {
                        churn.remove(previous);
                    }
                    ignored_changes += 1;
                    continue;
                }

                let carried = match &change.previous_path {
                    Some(previous) if previous != &change.path => churn.remove(previous),
                    _ => None,
                };

                let entry = churn
                    .entry(change.path.clone())
                    .or_insert_with(|| PathChurn::new(record.timestamp));
                if let Some(previous) = carried {
                    entry.absorb(previous);
                }
                if count_churn {
                    entry.add_stats(change);
                }
                entry.last_modified = entry.last_modified.max(record.timestamp);
                entry.deleted = change.change_type == ChangeType::Delete;
            }
        }

        let mut tracked_files: Vec<String> = churn
            .iter()
            .filter(|(_, c)| !c.deleted)
            .map(|(path, _)| path.clone())
            .collect();
        tracked_files.sort();

        let mut ranked: Vec<Hotspot> = churn
            .into_iter()
            .map(|(path, c)| Hotspot {
                path,
                change_count: c.additions + c.deletions,
                additions: c.additions,
                deletions: c.deletions,
                commit_count: c.commit_count,
                last_modified: c.last_modified,
            })
            .collect();
        rank_hotspots(&mut ranked);

        let top = ranked.iter().take(self.options.top_n).cloned().collect();
        let directories = aggregate_directories(&ranked, self.options.directory_depth);
        let extensions = aggregate_extensions(&ranked);

        debug!(
            paths = ranked.len(),
            ignored_changes, "Computed hotspots"
        );

        HotspotReport {
            ranked,
            top,
            directories,
            extensions,
            tracked_files,
            ignored_changes,
        }
    }
}

/// Sort by change count descending, ties broken by path ascending.
pub fn rank_hotspots(hotspots: &mut [Hotspot]) {
    hotspots.sort_by(|a, b| b.change_count.cmp(&a.change_count).then_with(|| a.path.cmp(&b.path)));
}

/// Directory a path rolls up into at `depth` components; root files roll up
/// under `.`. Depth 0 keeps the full parent directory.
pub fn directory_of(path: &str, depth: u32) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() <= 1 {
        return ROOT_DIRECTORY.to_string();
    }
    let dirs = &parts[..parts.len() - 1];
    if depth == 0 || dirs.len() <= depth as usize {
        dirs.join("/")
    } else {
        dirs[..depth as usize].join("/")
    }
}

pub fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_EXTENSION.to_string())
}

fn aggregate_directories(hotspots: &[Hotspot], depth: u32) -> Vec<DirectoryAggregate> {
    let mut map: HashMap<String, (u64, u64)> = HashMap::new();
    for h in hotspots {
        let entry = map.entry(directory_of(&h.path, depth)).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += h.change_count;
    }

    let mut dirs: Vec<DirectoryAggregate> = map
        .into_iter()
        .map(|(path, (file_count, change_count))| DirectoryAggregate {
            path,
            file_count,
            change_count,
        })
        .collect();
    dirs.sort_by(|a, b| b.change_count.cmp(&a.change_count).then_with(|| a.path.cmp(&b.path)));
    dirs
}

fn aggregate_extensions(hotspots: &[Hotspot]) -> Vec<ExtensionAggregate> {
    let mut map: HashMap<String, (u64, u64)> = HashMap::new();
    for h in hotspots {
        let entry = map.entry(extension_of(&h.path)).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += h.change_count;
    }

    let mut exts: Vec<ExtensionAggregate> = map
        .into_iter()
        .map(|(extension, (file_count, change_count))| ExtensionAggregate {
            extension,
            file_count,
            change_count,
        })
        .collect();
    exts.sort_by(|a, b| {
        b.change_count
            .cmp(&a.change_count)
            .then_with(|| a.extension.cmp(&b.extension))
    });
    exts
}
