use super::{parents_first, LogEntry};
use crate::error::{RepographError, Result};
use crate::model::{ChangeType, CommitRecord, DateRange, FileChange};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use gix::object::tree::diff::ChangeDetached;
use gix::{discover, ObjectId, Repository};
use indicatif::{ProgressBar, ProgressStyle};
use similar::{ChangeTag, TextDiff};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

pub struct GitRepo {
    repo: Repository,
    path: PathBuf,
    progress: bool,
}

impl GitRepo {
    /// Open a repository at `path`, or current dir if `None`
    pub fn open<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let repo_path = path
            .map(|p| p.as_ref().to_path_buf())
            .unwrap_or(std::env::current_dir()?);

        let repo = discover(&repo_path)
            .map_err(|e| RepographError::repository_access(repo_path.display().to_string(), e))?;
        let path = repo.workdir().unwrap_or_else(|| repo.path()).to_path_buf();
        debug!("Opened git repository at {}", path.display());

        Ok(Self {
            repo,
            path,
            progress: false,
        })
    }

    /// Show a spinner on stderr while walking history.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name of the working tree, without a trailing `.git`.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().trim_end_matches(".git").to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "repository".to_string())
    }

    pub fn resolve_range(&self, since: Option<&str>, until: Option<&str>) -> Result<DateRange> {
        let mut range = DateRange::new();

        let since_dt = if let Some(s) = since {
            Some(self.parse_commit_or_date(s)?)
        } else {
            None
        };

        let until_dt = if let Some(u) = until {
            Some(self.parse_commit_or_date(u)?)
        } else {
            None
        };

        if let (Some(s), Some(u)) = (since_dt, until_dt) {
            if s > u {
                return Err(RepographError::InvalidDate(format!(
                    "Invalid range: since ({}) is after until ({})",
                    s, u
                )));
            }
        }

        if let Some(s) = since_dt {
            range = range.with_since(s);
        }
        if let Some(u) = until_dt {
            range = range.with_until(u);
        }

        Ok(range)
    }

    fn parse_commit_or_date(&self, input: &str) -> Result<DateTime<Utc>> {
        if let Some(dt) = parse_date(input) {
            return Ok(dt);
        }

        // Fallback to Git ref
        let id = self
            .repo
            .rev_parse_single(input)
            .map_err(|e| RepographError::InvalidDate(format!("Invalid commit or date '{input}': {e}")))?;

        let commit = id
            .object()?
            .try_into_commit()
            .map_err(|_| RepographError::InvalidDate(format!("Not a commit: {input}")))?;

        let secs = commit.time()?.seconds;
        DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| RepographError::InvalidDate(format!("Invalid timestamp: {secs}")))
    }

    /// Walk every commit reachable from HEAD. Commit ids and dates are read up
    /// front so the walk can be ordered parents first; trees are diffed lazily
    /// as the returned iterator advances. Parents whose objects are absent, as
    /// at the boundary of a shallow clone, end the walk.
    pub fn commits(&self, range: &DateRange, max_commits: Option<usize>) -> Result<CommitWalk<'_>> {
        let location = self.path.display().to_string();
        let mut head = self
            .repo
            .head()
            .map_err(|e| RepographError::repository_access(location.clone(), e))?;
        let head_commit = head
            .peel_to_commit_in_place()
            .map_err(|e| RepographError::repository_access(location.clone(), e))?;

        let mut dated: Vec<(DateTime<Utc>, ObjectId, Vec<ObjectId>)> = Vec::new();
        let mut malformed: VecDeque<LogEntry> = VecDeque::new();
        let mut seen: HashSet<ObjectId> = HashSet::new();
        let mut stack: VecDeque<ObjectId> = VecDeque::from([head_commit.id]);

        while let Some(commit_id) = stack.pop_back() {
            if !seen.insert(commit_id) {
                continue;
            }

            let commit = self.repo.find_commit(commit_id)?;
            let parents = self.present_parents(&commit);
            stack.extend(parents.iter().copied());

            let timestamp = match commit.time() {
                Ok(time) => DateTime::from_timestamp(time.seconds, 0),
                Err(e) => {
                    malformed.push_back(LogEntry::Malformed {
                        reference: commit_id.to_string(),
                        reason: format!("undecodable commit time: {e}"),
                    });
                    continue;
                }
            };

            match timestamp {
                Some(ts) if range.contains(&ts) => dated.push((ts, commit_id, parents)),
                Some(_) => {}
                None => malformed.push_back(LogEntry::Malformed {
                    reference: commit_id.to_string(),
                    reason: "commit time out of range".to_string(),
                }),
            }
        }

        let mut dated: Vec<(DateTime<Utc>, ObjectId)> =
            parents_first(dated, |(ts, id, parents)| (*ts, *id, parents.clone()))
                .into_iter()
                .map(|(ts, id, _)| (ts, id))
                .collect();
        if let Some(max) = max_commits {
            let len = dated.len();
            if len > max {
                dated.drain(..len - max);
            }
        }
        debug!(commits = dated.len(), "Resolved commit walk");

        let pb = if self.progress {
            ProgressBar::new(dated.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Reading commits...");

        Ok(CommitWalk {
            repo: self,
            pending: malformed,
            ids: dated.into_iter(),
            pb,
        })
    }

    fn read_commit(&self, commit_id: ObjectId, timestamp: DateTime<Utc>) -> Result<LogEntry> {
        let commit = self.repo.find_commit(commit_id)?;
        let reference = commit_id.to_string();

        let (author_name, author_email) = match commit.author() {
            Ok(author) => (author.name.to_string(), author.email.to_string()),
            Err(e) => {
                return Ok(LogEntry::Malformed {
                    reference,
                    reason: format!("undecodable author: {e}"),
                })
            }
        };
        let subject = match commit.message() {
            Ok(message) => message.title.to_string().trim().to_string(),
            Err(e) => {
                return Ok(LogEntry::Malformed {
                    reference,
                    reason: format!("undecodable message: {e}"),
                })
            }
        };

        let parents: Vec<ObjectId> = commit.parent_ids().map(|id| id.into()).collect();
        // A shallow boundary commit is diffed against the empty tree.
        let base = parents.first().copied().filter(|pid| self.repo.has_object(pid));
        let files = self.compute_changes(commit_id, base)?;

        Ok(LogEntry::Commit(CommitRecord {
            sha: reference,
            author_name,
            author_email,
            timestamp,
            subject,
            is_merge: parents.len() > 1,
            parent_shas: parents.iter().map(|id| id.to_string()).collect(),
            files,
        }))
    }

    fn present_parents(&self, commit: &gix::Commit<'_>) -> Vec<ObjectId> {
        commit
            .parent_ids()
            .map(|id| id.detach())
            .filter(|pid| {
                let present = self.repo.has_object(pid);
                if !present {
                    debug!(parent = %pid, "Parent missing, treating as shallow boundary");
                }
                present
            })
            .collect()
    }

    fn compute_changes(&self, commit_id: ObjectId, parent_id: Option<ObjectId>) -> Result<Vec<FileChange>> {
        let commit_tree = self.repo.find_commit(commit_id)?.tree()?;
        let parent_tree = match parent_id {
            Some(pid) => Some(self.repo.find_commit(pid)?.tree()?),
            None => None,
        };

        let changes: Vec<ChangeDetached> =
            self.repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&commit_tree), None)?;

        let mut files = Vec::new();
        for change in changes {
            self.handle_change(change, &mut files);
        }
        Ok(files)
    }

    fn handle_change(&self, change: ChangeDetached, files: &mut Vec<FileChange>) {
        match change {
            ChangeDetached::Addition {
                id,
                location,
                entry_mode,
                ..
            } => {
                if entry_mode.is_tree() {
                    return;
                }
                if let Ok(obj) = self.repo.find_object(id) {
                    let binary = is_binary(&obj);
                    let lines = if binary { 0 } else { count_lines(&obj) };
                    files.push(FileChange {
                        binary,
                        ..FileChange::new(location.to_string(), lines, 0, ChangeType::Add)
                    });
                }
            }
            ChangeDetached::Deletion {
                id,
                location,
                entry_mode,
                ..
            } => {
                if entry_mode.is_tree() {
                    return;
                }
                if let Ok(obj) = self.repo.find_object(id) {
                    let binary = is_binary(&obj);
                    let lines = if binary { 0 } else { count_lines(&obj) };
                    files.push(FileChange {
                        binary,
                        ..FileChange::new(location.to_string(), 0, lines, ChangeType::Delete)
                    });
                }
            }
            ChangeDetached::Modification {
                previous_id,
                id,
                location,
                entry_mode,
                ..
            } => {
                if entry_mode.is_tree() {
                    return;
                }
                if let (Ok(old_obj), Ok(new_obj)) =
                    (self.repo.find_object(previous_id), self.repo.find_object(id))
                {
                    let binary = is_binary(&old_obj) || is_binary(&new_obj);
                    let (added, deleted) = if binary { (0, 0) } else { line_diff(&old_obj, &new_obj) };
                    files.push(FileChange {
                        binary,
                        ..FileChange::new(location.to_string(), added, deleted, ChangeType::Modify)
                    });
                }
            }
            ChangeDetached::Rewrite {
                source_id,
                id,
                source_location,
                location,
                entry_mode,
                copy,
                ..
            } => {
                if entry_mode.is_tree() {
                    return;
                }
                if let (Ok(old_obj), Ok(new_obj)) =
                    (self.repo.find_object(source_id), self.repo.find_object(id))
                {
                    let binary = is_binary(&old_obj) || is_binary(&new_obj);
                    let change = if copy {
                        let lines = if binary { 0 } else { count_lines(&new_obj) };
                        FileChange::new(location.to_string(), lines, 0, ChangeType::Add)
                    } else {
                        let (added, deleted) = if binary { (0, 0) } else { line_diff(&old_obj, &new_obj) };
                        FileChange::renamed(source_location.to_string(), location.to_string(), added, deleted)
                    };
                    files.push(FileChange { binary, ..change });
                }
            }
        }
    }
}

/// Lazily diffs commits in chronological order. Single pass: a retry has to
/// open a new walk.
pub struct CommitWalk<'repo> {
    repo: &'repo GitRepo,
    pending: VecDeque<LogEntry>,
    ids: std::vec::IntoIter<(DateTime<Utc>, ObjectId)>,
    pb: ProgressBar,
}

impl CommitWalk<'_> {
    pub fn remaining(&self) -> usize {
        self.pending.len() + self.ids.len()
    }
}

impl Iterator for CommitWalk<'_> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.pending.pop_front() {
            return Some(Ok(entry));
        }
        match self.ids.next() {
            Some((timestamp, id)) => {
                self.pb.inc(1);
                Some(self.repo.read_commit(id, timestamp))
            }
            None => {
                if !self.pb.is_finished() {
                    self.pb.finish_and_clear();
                }
                None
            }
        }
    }
}

fn is_binary(object: &gix::Object) -> bool {
    object.data.as_slice().iter().take(8192).any(|&b| b == 0)
}

fn count_lines(object: &gix::Object) -> u32 {
    String::from_utf8_lossy(object.data.as_slice()).lines().count() as u32
}

fn line_diff(old_object: &gix::Object, new_object: &gix::Object) -> (u32, u32) {
    let old_text = String::from_utf8_lossy(old_object.data.as_slice());
    let new_text = String::from_utf8_lossy(new_object.data.as_slice());

    let diff = TextDiff::from_lines(old_text.as_ref(), new_text.as_ref());
    let (mut added, mut deleted) = (0u32, 0u32);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => deleted += 1,
            ChangeTag::Equal => {}
        }
    }
    (added, deleted)
}

/// Parse RFC3339, `YYYY-MM-DD`, "N days ago" style phrases or humantime
/// durations such as `90d` (interpreted as that long before now).
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(datetime) = date.and_hms_opt(0, 0, 0) {
            return Some(Utc.from_utc_datetime(&datetime));
        }
    }

    let duration = parse_natural_duration(input)
        .or_else(|| humantime::parse_duration(input.trim().trim_start_matches('-')).ok())?;
    let target = SystemTime::now().checked_sub(duration)?;
    Some(DateTime::<Utc>::from(target))
}

fn parse_natural_duration(input: &str) -> Option<Duration> {
    let input = input.trim().to_lowercase();

    if let Some(days) = input.strip_suffix(" days ago") {
        if let Ok(n) = days.trim().parse::<u64>() {
            return Some(Duration::from_secs(n * 86400));
        }
    }

    if let Some(weeks) = input.strip_suffix(" weeks ago") {
        if let Ok(n) = weeks.trim().parse::<u64>() {
            return Some(Duration::from_secs(n * 7 * 86400));
        }
    }

    if let Some(months) = input.strip_suffix(" months ago") {
        if let Ok(n) = months.trim().parse::<u64>() {
            return Some(Duration::from_secs(n * 30 * 86400));
        }
    }

    None
}
