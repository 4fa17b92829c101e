//! Commit history extraction.
//!
//! Two sources feed the same [`LogEntry`] stream: a repository opened with
//! gix ([`GitRepo`]) and a raw `git log --numstat` dump ([`LogParser`]).
//! [`CommitHistoryExtractor`] drains either one into chronologically ordered
//! [`CommitRecord`]s, skipping malformed entries.

pub mod log;
pub mod repo;

pub use log::{expand_rename, LogParser, LOG_FORMAT};
pub use repo::{CommitWalk, GitRepo};

use crate::error::{RepographError, Result};
use crate::model::{CommitRecord, DateRange, Warning};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;
use tracing::{debug, warn};

/// One entry of a commit log as produced by a source.
#[derive(Debug, Clone)]
pub enum LogEntry {
    Commit(CommitRecord),
    Malformed { reference: String, reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedHistory {
    /// Parents before children; otherwise oldest first, then by sha.
    pub records: Vec<CommitRecord>,
    pub warnings: Vec<Warning>,
    pub total_entries: usize,
    pub skipped: usize,
}

impl ExtractedHistory {
    pub fn skipped_ratio(&self) -> f64 {
        if self.total_entries == 0 {
            0.0
        } else {
            self.skipped as f64 / self.total_entries as f64
        }
    }

    /// Fails with a parse error when more entries were skipped than `threshold` allows.
    pub fn ensure_within(&self, threshold: f64) -> Result<()> {
        if self.skipped_ratio() > threshold {
            return Err(RepographError::Parse {
                skipped: self.skipped,
                total: self.total_entries,
                threshold,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommitHistoryExtractor {
    range: DateRange,
    max_commits: Option<usize>,
    parse_error_threshold: f64,
}

impl CommitHistoryExtractor {
    pub fn new(parse_error_threshold: f64) -> Self {
        Self {
            range: DateRange::new(),
            max_commits: None,
            parse_error_threshold,
        }
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Keep only the `max` most recent commits.
    pub fn with_max_commits(mut self, max: Option<usize>) -> Self {
        self.max_commits = max;
        self
    }

    pub fn range(&self) -> &DateRange {
        &self.range
    }

    pub fn max_commits(&self) -> Option<usize> {
        self.max_commits
    }

    /// Drain `entries` without judging the skip ratio. A source error aborts
    /// the pass; malformed entries become warnings.
    pub fn collect<I>(&self, entries: I) -> Result<ExtractedHistory>
    where
        I: IntoIterator<Item = Result<LogEntry>>,
    {
        let mut history = ExtractedHistory::default();
        let mut seen: HashSet<String> = HashSet::new();

        for entry in entries {
            history.total_entries += 1;
            match entry? {
                LogEntry::Commit(record) => {
                    if !seen.insert(record.sha.clone()) {
                        skip(&mut history, record.sha, "duplicate commit sha".to_string());
                        continue;
                    }
                    if self.range.contains(&record.timestamp) {
                        history.records.push(record);
                    }
                }
                LogEntry::Malformed { reference, reason } => skip(&mut history, reference, reason),
            }
        }

        history.records = parents_first(std::mem::take(&mut history.records), |r| {
            (r.timestamp, r.sha.clone(), r.parent_shas.clone())
        });

        if let Some(max) = self.max_commits {
            let len = history.records.len();
            if len > max {
                history.records.drain(..len - max);
            }
        }

        debug!(
            records = history.records.len(),
            skipped = history.skipped,
            "Commit history extracted"
        );
        Ok(history)
    }

    /// Like [`collect`](Self::collect), but fails when the skip ratio
    /// exceeds the configured threshold.
    pub fn extract<I>(&self, entries: I) -> Result<ExtractedHistory>
    where
        I: IntoIterator<Item = Result<LogEntry>>,
    {
        let history = self.collect(entries)?;
        history.ensure_within(self.parse_error_threshold)?;
        Ok(history)
    }

    pub fn parse_error_threshold(&self) -> f64 {
        self.parse_error_threshold
    }
}

fn skip(history: &mut ExtractedHistory, reference: String, reason: String) {
    warn!("Skipping log entry {}: {}", reference, reason);
    history.skipped += 1;
    history.warnings.push(Warning::Parse { reference, reason });
}

/// Orders `items` so that every commit follows the parents present in the
/// set. Among commits whose parents are all placed, the oldest goes first and
/// equal timestamps fall back to the id. Parents outside the set are ignored.
pub(crate) fn parents_first<T, K, F>(items: Vec<T>, node: F) -> Vec<T>
where
    K: Ord + Hash + Clone,
    F: Fn(&T) -> (DateTime<Utc>, K, Vec<K>),
{
    let nodes: Vec<(DateTime<Utc>, K, Vec<K>)> = items.iter().map(node).collect();
    let index: HashMap<&K, usize> = nodes.iter().enumerate().map(|(i, (_, id, _))| (id, i)).collect();

    let mut unplaced_parents = vec![0usize; nodes.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, (_, _, parents)) in nodes.iter().enumerate() {
        for parent in parents {
            if let Some(&p) = index.get(parent) {
                if p != i {
                    unplaced_parents[i] += 1;
                    children[p].push(i);
                }
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<(DateTime<Utc>, K, usize)>> = unplaced_parents
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse((nodes[i].0, nodes[i].1.clone(), i)))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse((_, _, i))) = ready.pop() {
        order.push(i);
        for &child in &children[i] {
            unplaced_parents[child] -= 1;
            if unplaced_parents[child] == 0 {
                ready.push(Reverse((nodes[child].0, nodes[child].1.clone(), child)));
            }
        }
    }

    // A parent cycle cannot come from git; fall back to date order for it.
    if order.len() < nodes.len() {
        let mut rest: Vec<usize> = (0..nodes.len()).filter(|&i| unplaced_parents[i] > 0).collect();
        rest.sort_by(|&a, &b| (nodes[a].0, &nodes[a].1).cmp(&(nodes[b].0, &nodes[b].1)));
        order.extend(rest);
    }

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
