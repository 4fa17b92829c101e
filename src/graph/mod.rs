//! Knowledge graph of repository history.
//!
//! Writes go through [`UpsertPort`], which any backend offering conditional
//! insert-or-update can implement. [`SqliteGraphStore`] is the shipped
//! backend; [`GraphIngester`] turns a profile into batched upserts.

pub mod ingest;
pub mod sqlite;

pub use ingest::{GraphIngester, IngestOutcome, IngestPlan, VerificationReport};
pub use sqlite::SqliteGraphStore;

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub type Properties = Map<String, Value>;

pub mod label {
    pub const REPO: &str = "Repo";
    pub const CONTRIBUTOR: &str = "Contributor";
    pub const COMMIT: &str = "Commit";
    pub const FILE: &str = "File";
    pub const HOTSPOT: &str = "Hotspot";
    pub const DIRECTORY: &str = "Directory";
    pub const EXTENSION: &str = "Extension";
}

pub mod edge {
    pub const HAS_CONTRIBUTOR: &str = "HAS_CONTRIBUTOR";
    pub const HAS_HOTSPOT: &str = "HAS_HOTSPOT";
    pub const HAS_DIRECTORY: &str = "HAS_DIRECTORY";
    pub const HAS_EXTENSION: &str = "HAS_EXTENSION";
    pub const COMMITTED_BY: &str = "COMMITTED_BY";
    pub const TOUCHED: &str = "TOUCHED";
}

/// Identity of a node: label plus key, optionally scoped to a repository.
/// Global labels use an empty scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub label: String,
    pub scope: String,
    pub key: String,
}

impl NodeKey {
    pub fn global(label: &str, key: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            scope: String::new(),
            key: key.into(),
        }
    }

    pub fn scoped(label: &str, scope: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            scope: scope.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_empty() {
            write!(f, "{}({})", self.label, self.key)
        } else {
            write!(f, "{}({}:{})", self.label, self.scope, self.key)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey {
    pub kind: String,
    pub from: NodeKey,
    pub to: NodeKey,
}

impl EdgeKey {
    pub fn new(kind: &str, from: NodeKey, to: NodeKey) -> Self {
        Self {
            kind: kind.to_string(),
            from,
            to,
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from, self.kind, self.to)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpsert {
    pub key: NodeKey,
    pub props: Properties,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeUpsert {
    pub key: EdgeKey,
    pub props: Properties,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Node(NodeUpsert),
    Edge(EdgeUpsert),
}

/// Writes applied atomically: all of them or none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new(ops: Vec<WriteOp>) -> Self {
        Self { ops }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: BTreeMap<String, u64>,
    pub edges: BTreeMap<String, u64>,
}

impl GraphStats {
    pub fn node_count(&self, label: &str) -> u64 {
        self.nodes.get(label).copied().unwrap_or(0)
    }

    pub fn edge_count(&self, kind: &str) -> u64 {
        self.edges.get(kind).copied().unwrap_or(0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Busy, locked or unreachable store; safe to retry.
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("constraint violation on {label} '{key}': {reason}")]
    Constraint {
        label: String,
        key: String,
        reason: String,
    },
    #[error("store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Conditional insert-or-update access to a graph backend.
pub trait UpsertPort {
    /// Create the identity constraints if missing. Idempotent.
    fn ensure_constraints(&mut self) -> Result<(), StoreError>;

    /// Apply every write of `batch` atomically.
    fn apply_batch(&mut self, batch: &WriteBatch) -> Result<(), StoreError>;

    /// Delete nodes of `label` within `scope` whose key is not in `keep`,
    /// together with their edges. Returns the number of nodes removed.
    fn retain_scoped(&mut self, label: &str, scope: &str, keep: &[String]) -> Result<u64, StoreError>;

    /// Delete `kind` edges leaving `from` whose target is not in `keep`.
    fn retain_edges_from(&mut self, kind: &str, from: &NodeKey, keep: &[NodeKey]) -> Result<u64, StoreError>;

    fn count_nodes_present(&self, keys: &[NodeKey]) -> Result<u64, StoreError>;

    fn count_edges_present(&self, keys: &[EdgeKey]) -> Result<u64, StoreError>;

    fn count_edges_from(&self, kind: &str, from: &NodeKey) -> Result<u64, StoreError>;

    fn stats(&self) -> Result<GraphStats, StoreError>;

    fn upsert_node(&mut self, key: NodeKey, props: Properties) -> Result<(), StoreError> {
        self.apply_batch(&WriteBatch::new(vec![WriteOp::Node(NodeUpsert { key, props })]))
    }

    fn upsert_edge(&mut self, kind: &str, from: NodeKey, to: NodeKey, props: Properties) -> Result<(), StoreError> {
        self.apply_batch(&WriteBatch::new(vec![WriteOp::Edge(EdgeUpsert {
            key: EdgeKey::new(kind, from, to),
            props,
        })]))
    }
}

/// Property map of a `json!({...})` object literal; other values yield an
/// empty map.
pub fn properties(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        _ => Properties::new(),
    }
}
