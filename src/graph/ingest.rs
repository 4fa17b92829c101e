use super::{
    edge, label, properties, EdgeKey, EdgeUpsert, NodeKey, NodeUpsert, StoreError, UpsertPort, WriteBatch,
    WriteOp,
};
use crate::config::IngestConfig;
use crate::error::{RepographError, Result};
use crate::profile::RepositoryProfile;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Every write derived from one profile, deduplicated by identity key and
/// split into commit-scale and file-scale groups.
#[derive(Debug, Clone, Default)]
pub struct IngestPlan {
    pub repo: Option<NodeUpsert>,
    pub commit_nodes: Vec<NodeUpsert>,
    pub commit_edges: Vec<EdgeUpsert>,
    pub file_nodes: Vec<NodeUpsert>,
    pub file_edges: Vec<EdgeUpsert>,
}

impl IngestPlan {
    /// Build the plan. Two different writes for the same identity key are a
    /// constraint violation upsert cannot resolve.
    pub fn from_profile(profile: &RepositoryProfile) -> Result<Self> {
        let repo_name = profile.repo.name.clone();
        let repo_key = NodeKey::global(label::REPO, repo_name.clone());

        let mut commit_nodes = NodeSet::default();
        let mut commit_edges = EdgeSet::default();
        let mut file_nodes = NodeSet::default();
        let mut file_edges = EdgeSet::default();

        let repo = NodeUpsert {
            key: repo_key.clone(),
            props: properties(json!({
                "name": repo_name,
                "language": profile.repo.language,
                "license": profile.repo.license,
                "commits": profile.git_summary.commits,
                "firstCommit": profile.git_summary.first_commit,
                "lastCommit": profile.git_summary.last_commit,
                "evolutionYears": profile.metrics.evolution_years,
                "avgCommitsPerYear": profile.metrics.avg_commits_per_year,
                "avgHotspotChanges": profile.metrics.avg_hotspot_changes,
                "ratioCode": profile.metrics.ratio_code,
                "ratioTests": profile.metrics.ratio_tests,
                "ratioDocs": profile.metrics.ratio_docs,
            })),
        };

        for identity in &profile.identities {
            let key = NodeKey::global(label::CONTRIBUTOR, identity.canonical_email.clone());
            commit_nodes.insert(NodeUpsert {
                key: key.clone(),
                props: properties(json!({
                    "email": identity.canonical_email,
                    "name": identity.display_name,
                    "commits": identity.total_commits,
                })),
            })?;
            commit_edges.insert(EdgeUpsert {
                key: EdgeKey::new(edge::HAS_CONTRIBUTOR, repo_key.clone(), key),
                props: properties(json!({ "commits": identity.total_commits })),
            })?;
        }

        for commit in &profile.commits {
            let commit_key = NodeKey::global(label::COMMIT, commit.sha.clone());
            commit_nodes.insert(NodeUpsert {
                key: commit_key.clone(),
                props: properties(json!({
                    "sha": commit.sha,
                    "subject": commit.subject,
                    "date": commit.date,
                    "isMerge": commit.is_merge,
                })),
            })?;

            let author = NodeKey::global(label::CONTRIBUTOR, commit.author.clone());
            if !commit_nodes.contains(&author) {
                return Err(RepographError::GraphConstraint {
                    label: label::CONTRIBUTOR.to_string(),
                    key: commit.author.clone(),
                    reason: format!("commit {} is attributed to an unresolved contributor", commit.sha),
                });
            }
            commit_edges.insert(EdgeUpsert {
                key: EdgeKey::new(edge::COMMITTED_BY, commit_key.clone(), author),
                props: Default::default(),
            })?;

            for file in &commit.files {
                let file_key = NodeKey::scoped(label::FILE, repo_name.clone(), file.path.clone());
                file_nodes.insert(NodeUpsert {
                    key: file_key.clone(),
                    props: properties(json!({ "path": file.path })),
                })?;
                // A path listed twice in one commit keeps its last counts.
                file_edges.replace(EdgeUpsert {
                    key: EdgeKey::new(edge::TOUCHED, commit_key.clone(), file_key),
                    props: properties(json!({
                        "add": file.additions,
                        "del": file.deletions,
                        "type": file.change_type.as_str(),
                    })),
                });
            }
        }

        for hotspot in &profile.hotspots {
            let key = NodeKey::scoped(label::HOTSPOT, repo_name.clone(), hotspot.path.clone());
            file_nodes.insert(NodeUpsert {
                key: key.clone(),
                props: properties(json!({ "path": hotspot.path, "changes": hotspot.changes })),
            })?;
            file_edges.insert(EdgeUpsert {
                key: EdgeKey::new(edge::HAS_HOTSPOT, repo_key.clone(), key),
                props: properties(json!({ "changes": hotspot.changes })),
            })?;
        }

        for dir in &profile.directories {
            let key = NodeKey::scoped(label::DIRECTORY, repo_name.clone(), dir.path.clone());
            file_nodes.insert(NodeUpsert {
                key: key.clone(),
                props: properties(json!({
                    "path": dir.path,
                    "files": dir.file_count,
                    "changes": dir.change_count,
                })),
            })?;
            file_edges.insert(EdgeUpsert {
                key: EdgeKey::new(edge::HAS_DIRECTORY, repo_key.clone(), key),
                props: properties(json!({ "changes": dir.change_count })),
            })?;
        }

        for ext in &profile.extensions {
            let key = NodeKey::scoped(label::EXTENSION, repo_name.clone(), ext.extension.clone());
            file_nodes.insert(NodeUpsert {
                key: key.clone(),
                props: properties(json!({
                    "name": ext.extension,
                    "files": ext.file_count,
                    "changes": ext.change_count,
                })),
            })?;
            file_edges.insert(EdgeUpsert {
                key: EdgeKey::new(edge::HAS_EXTENSION, repo_key.clone(), key),
                props: properties(json!({ "files": ext.file_count, "changes": ext.change_count })),
            })?;
        }

        Ok(Self {
            repo: Some(repo),
            commit_nodes: commit_nodes.into_vec(),
            commit_edges: commit_edges.into_vec(),
            file_nodes: file_nodes.into_vec(),
            file_edges: file_edges.into_vec(),
        })
    }

    pub fn repo_key(&self) -> Option<&NodeKey> {
        self.repo.as_ref().map(|r| &r.key)
    }

    /// Expected node count per label.
    pub fn expected_nodes(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for node in self.repo.iter().chain(&self.commit_nodes).chain(&self.file_nodes) {
            *counts.entry(node.key.label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Expected edge count per kind.
    pub fn expected_edges(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for e in self.commit_edges.iter().chain(&self.file_edges) {
            *counts.entry(e.key.kind.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn targets_of(&self, kind: &str) -> Vec<NodeKey> {
        self.commit_edges
            .iter()
            .chain(&self.file_edges)
            .filter(|e| e.key.kind == kind)
            .map(|e| e.key.to.clone())
            .collect()
    }

    fn scoped_keys(&self, node_label: &str) -> Vec<String> {
        self.file_nodes
            .iter()
            .filter(|n| n.key.label == node_label)
            .map(|n| n.key.key.clone())
            .collect()
    }
}

#[derive(Default)]
struct NodeSet {
    nodes: BTreeMap<NodeKey, NodeUpsert>,
}

impl NodeSet {
    fn insert(&mut self, node: NodeUpsert) -> Result<()> {
        match self.nodes.get(&node.key) {
            Some(existing) if existing.props != node.props => Err(RepographError::GraphConstraint {
                label: node.key.label.clone(),
                key: node.key.key.clone(),
                reason: "conflicting properties for the same identity key".to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.nodes.insert(node.key.clone(), node);
                Ok(())
            }
        }
    }

    fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    fn into_vec(self) -> Vec<NodeUpsert> {
        self.nodes.into_values().collect()
    }
}

#[derive(Default)]
struct EdgeSet {
    edges: BTreeMap<EdgeKey, EdgeUpsert>,
}

impl EdgeSet {
    fn insert(&mut self, edge: EdgeUpsert) -> Result<()> {
        match self.edges.get(&edge.key) {
            Some(existing) if existing.props != edge.props => Err(RepographError::GraphConstraint {
                label: edge.key.kind.clone(),
                key: edge.key.to_string(),
                reason: "conflicting properties for the same edge".to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.edges.insert(edge.key.clone(), edge);
                Ok(())
            }
        }
    }

    fn replace(&mut self, edge: EdgeUpsert) {
        self.edges.insert(edge.key.clone(), edge);
    }

    fn into_vec(self) -> Vec<EdgeUpsert> {
        self.edges.into_values().collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestOutcome {
    pub repo: String,
    pub batches: usize,
    pub writes: usize,
    pub retries: u32,
    pub pruned: u64,
    pub expected_nodes: BTreeMap<String, u64>,
    pub expected_edges: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub nodes: BTreeMap<String, u64>,
    pub edges: BTreeMap<String, u64>,
}

pub struct GraphIngester<'s, S: UpsertPort> {
    store: &'s mut S,
    config: IngestConfig,
    retries: u32,
}

impl<'s, S: UpsertPort> GraphIngester<'s, S> {
    pub fn new(store: &'s mut S, config: IngestConfig) -> Self {
        Self {
            store,
            config,
            retries: 0,
        }
    }

    /// Write then verify.
    pub fn ingest(&mut self, profile: &RepositoryProfile) -> Result<(IngestOutcome, VerificationReport)> {
        let plan = IngestPlan::from_profile(profile)?;
        let outcome = self.write(profile, &plan)?;
        let report = self.verify(&plan)?;
        Ok((outcome, report))
    }

    /// Upsert every write of `plan` in bounded batches, then prune repo-owned
    /// summary nodes and edges the profile no longer contains.
    pub fn write(&mut self, profile: &RepositoryProfile, plan: &IngestPlan) -> Result<IngestOutcome> {
        if !profile.valid {
            return Err(RepographError::InvalidProfile(format!(
                "profile for '{}' is incomplete ({} stage failure(s))",
                profile.repo.name,
                profile.failures.len()
            )));
        }

        self.retries = 0;
        self.with_retry("ensure constraints", |store| store.ensure_constraints())?;

        let mut outcome = IngestOutcome {
            repo: profile.repo.name.clone(),
            expected_nodes: plan.expected_nodes(),
            expected_edges: plan.expected_edges(),
            ..Default::default()
        };

        let commit_size = self.config.commit_batch_size.max(1);
        let file_size = self.config.file_batch_size.max(1);

        let mut batches: Vec<WriteBatch> = Vec::new();
        if let Some(repo) = &plan.repo {
            batches.push(WriteBatch::new(vec![WriteOp::Node(repo.clone())]));
        }
        batches.extend(chunk(plan.commit_nodes.iter().cloned().map(WriteOp::Node), commit_size));
        batches.extend(chunk(plan.commit_edges.iter().cloned().map(WriteOp::Edge), commit_size));
        batches.extend(chunk(plan.file_nodes.iter().cloned().map(WriteOp::Node), file_size));
        batches.extend(chunk(plan.file_edges.iter().cloned().map(WriteOp::Edge), file_size));

        for (index, batch) in batches.iter().enumerate() {
            self.with_retry("apply batch", |store| store.apply_batch(batch))?;
            outcome.writes += batch.len();
            debug!(batch = index + 1, of = batches.len(), writes = batch.len(), "Batch committed");
        }
        outcome.batches = batches.len();

        if let Some(repo_key) = plan.repo_key() {
            for node_label in [label::FILE, label::HOTSPOT, label::DIRECTORY, label::EXTENSION] {
                let keep = plan.scoped_keys(node_label);
                outcome.pruned += self.with_retry("prune nodes", |store| {
                    store.retain_scoped(node_label, &repo_key.key, &keep)
                })?;
            }
            let keep = plan.targets_of(edge::HAS_CONTRIBUTOR);
            outcome.pruned += self.with_retry("prune edges", |store| {
                store.retain_edges_from(edge::HAS_CONTRIBUTOR, repo_key, &keep)
            })?;
        }

        outcome.retries = self.retries;
        info!(
            repo = %outcome.repo,
            batches = outcome.batches,
            writes = outcome.writes,
            pruned = outcome.pruned,
            "Graph ingestion complete"
        );
        Ok(outcome)
    }

    /// Read back node and edge counts and compare them with the plan.
    pub fn verify(&mut self, plan: &IngestPlan) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();

        let mut nodes_by_label: BTreeMap<&str, Vec<NodeKey>> = BTreeMap::new();
        for node in plan.repo.iter().chain(&plan.commit_nodes).chain(&plan.file_nodes) {
            nodes_by_label
                .entry(node.key.label.as_str())
                .or_default()
                .push(node.key.clone());
        }
        for (node_label, keys) in &nodes_by_label {
            let present = self.with_retry("verify nodes", |store| store.count_nodes_present(keys))?;
            if present != keys.len() as u64 {
                return Err(RepographError::Verification(format!(
                    "expected {} {} node(s), found {}",
                    keys.len(),
                    node_label,
                    present
                )));
            }
            report.nodes.insert(node_label.to_string(), present);
        }

        let owned: BTreeSet<&str> = [
            edge::HAS_CONTRIBUTOR,
            edge::HAS_HOTSPOT,
            edge::HAS_DIRECTORY,
            edge::HAS_EXTENSION,
        ]
        .into_iter()
        .collect();

        let mut edges_by_kind: BTreeMap<&str, Vec<EdgeKey>> = BTreeMap::new();
        for e in plan.commit_edges.iter().chain(&plan.file_edges) {
            edges_by_kind.entry(e.key.kind.as_str()).or_default().push(e.key.clone());
        }
        for kind in &owned {
            edges_by_kind.entry(*kind).or_default();
        }

        for (kind, keys) in &edges_by_kind {
            let found = match (owned.contains(kind), plan.repo_key()) {
                (true, Some(repo_key)) => {
                    self.with_retry("verify edges", |store| store.count_edges_from(kind, repo_key))?
                }
                _ => self.with_retry("verify edges", |store| store.count_edges_present(keys))?,
            };
            if found != keys.len() as u64 {
                return Err(RepographError::Verification(format!(
                    "expected {} {} edge(s), found {}",
                    keys.len(),
                    kind,
                    found
                )));
            }
            report.edges.insert(kind.to_string(), found);
        }

        debug!(?report, "Graph verified");
        Ok(report)
    }

    /// Run `op`, retrying transient failures with exponential backoff.
    fn with_retry<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut S) -> std::result::Result<T, StoreError>,
    ) -> Result<T> {
        let mut delay = self.config.base_delay();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op(&mut *self.store) {
                Ok(value) => return Ok(value),
                Err(StoreError::Transient(reason)) if attempt <= self.config.max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt,
                        self.config.max_retries + 1,
                        reason,
                        delay
                    );
                    self.retries += 1;
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Err(StoreError::Transient(reason)) => {
                    return Err(RepographError::GraphConnection {
                        attempts: attempt,
                        reason,
                    })
                }
                Err(StoreError::Constraint { label, key, reason }) => {
                    return Err(RepographError::GraphConstraint { label, key, reason })
                }
                Err(StoreError::Fatal(reason)) => return Err(RepographError::GraphStore(reason)),
            }
        }
    }
}

fn chunk(ops: impl Iterator<Item = WriteOp>, size: usize) -> Vec<WriteBatch> {
    let mut batches = Vec::new();
    let mut current = Vec::with_capacity(size);
    for op in ops {
        current.push(op);
        if current.len() == size {
            batches.push(WriteBatch::new(std::mem::replace(&mut current, Vec::with_capacity(size))));
        }
    }
    if !current.is_empty() {
        batches.push(WriteBatch::new(current));
    }
    batches
}
