use crate::config::ClassificationRules;
use crate::hotspot::HotspotReport;
use crate::identity::IdentityTable;
use crate::model::CommitRecord;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub commits: u64,
    pub merges: u64,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
}

impl CommitSummary {
    pub fn from_records(records: &[CommitRecord]) -> Self {
        let mut summary = CommitSummary::default();
        for record in records {
            summary.commits += 1;
            if record.is_merge {
                summary.merges += 1;
            }
            summary.first_commit = Some(summary.first_commit.map_or(record.timestamp, |t| t.min(record.timestamp)));
            summary.last_commit = Some(summary.last_commit.map_or(record.timestamp, |t| t.max(record.timestamp)));
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetrics {
    pub evolution_years: u32,
    pub avg_commits_per_year: f64,
    pub avg_hotspot_changes: f64,
    pub ratio_code: f64,
    pub ratio_tests: f64,
    pub ratio_docs: f64,
    /// Fewest contributors that together authored at least half the commits.
    pub bus_factor: u32,
    pub merge_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Code,
    Tests,
    Docs,
    Uncategorized,
}

/// Classify a path. Tests win over docs, docs over code.
pub fn classify(path: &str, rules: &ClassificationRules) -> FileCategory {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let Some((file_name, dirs)) = parts.split_last() else {
        return FileCategory::Uncategorized;
    };
    let file_name = file_name.to_lowercase();
    let extension = file_name
        .rsplit_once('.')
        .map(|(stem, ext)| if stem.is_empty() { "" } else { ext })
        .unwrap_or("");
    let in_dir = |candidates: &[String]| {
        dirs.iter()
            .any(|d| candidates.iter().any(|c| c.eq_ignore_ascii_case(d)))
    };
    let has_ext = |candidates: &[String]| {
        !extension.is_empty()
            && candidates
                .iter()
                .any(|c| c.trim_start_matches('.').eq_ignore_ascii_case(extension))
    };

    let test_named = rules
        .test_file_prefixes
        .iter()
        .any(|p| file_name.starts_with(&p.to_lowercase()))
        || rules
            .test_file_markers
            .iter()
            .any(|m| file_name.contains(&m.to_lowercase()));
    if in_dir(&rules.test_dirs) || test_named {
        return FileCategory::Tests;
    }

    if in_dir(&rules.doc_dirs) || has_ext(&rules.doc_extensions) {
        return FileCategory::Docs;
    }

    let in_source_root = dirs
        .first()
        .is_some_and(|d| rules.source_dirs.iter().any(|s| s.eq_ignore_ascii_case(d)));
    if in_source_root || has_ext(&rules.source_extensions) {
        return FileCategory::Code;
    }

    FileCategory::Uncategorized
}

pub struct RepositoryMetricsCalculator<'a> {
    rules: &'a ClassificationRules,
}

impl<'a> RepositoryMetricsCalculator<'a> {
    pub fn new(rules: &'a ClassificationRules) -> Self {
        Self { rules }
    }

    pub fn compute(
        &self,
        records: &[CommitRecord],
        identities: &IdentityTable,
        hotspots: &HotspotReport,
    ) -> RepositoryMetrics {
        self.compute_with_summary(&CommitSummary::from_records(records), identities, hotspots)
    }

    pub fn compute_with_summary(
        &self,
        summary: &CommitSummary,
        identities: &IdentityTable,
        hotspots: &HotspotReport,
    ) -> RepositoryMetrics {
        let evolution_years = match (summary.first_commit, summary.last_commit) {
            (Some(first), Some(last)) => (last.year() - first.year()).max(0) as u32,
            _ => 0,
        };
        let avg_commits_per_year = summary.commits as f64 / evolution_years.max(1) as f64;

        let avg_hotspot_changes = if hotspots.top.is_empty() {
            0.0
        } else {
            hotspots.top.iter().map(|h| h.change_count as f64).sum::<f64>() / hotspots.top.len() as f64
        };

        let (ratio_code, ratio_tests, ratio_docs) = self.ratios(&hotspots.tracked_files);

        let merge_ratio = if summary.commits == 0 {
            0.0
        } else {
            summary.merges as f64 / summary.commits as f64
        };

        RepositoryMetrics {
            evolution_years,
            avg_commits_per_year,
            avg_hotspot_changes,
            ratio_code,
            ratio_tests,
            ratio_docs,
            bus_factor: bus_factor(identities),
            merge_ratio,
        }
    }

    fn ratios(&self, tracked_files: &[String]) -> (f64, f64, f64) {
        if tracked_files.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let (mut code, mut tests, mut docs) = (0usize, 0usize, 0usize);
        for path in tracked_files {
            match classify(path, self.rules) {
                FileCategory::Code => code += 1,
                FileCategory::Tests => tests += 1,
                FileCategory::Docs => docs += 1,
                FileCategory::Uncategorized => {}
            }
        }
        let total = tracked_files.len() as f64;
        (code as f64 / total, tests as f64 / total, docs as f64 / total)
    }
}

fn bus_factor(identities: &IdentityTable) -> u32 {
    let total: u64 = identities.iter().map(|i| i.total_commits).sum();
    if total == 0 {
        return 0;
    }
    let mut covered = 0u64;
    let mut factor = 0u32;
    for identity in identities.ranked() {
        covered += identity.total_commits;
        factor += 1;
        if covered * 2 >= total {
            break;
        }
    }
    factor
}
