use super::{EdgeKey, GraphStats, NodeKey, Properties, StoreError, UpsertPort, WriteBatch, WriteOp};
use crate::error::{RepographError, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const GRAPH_SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY,
        label TEXT NOT NULL,
        scope TEXT NOT NULL DEFAULT '',
        key TEXT NOT NULL,
        props TEXT NOT NULL,
        UNIQUE (label, scope, key)
    );
    CREATE TABLE IF NOT EXISTS edges (
        id INTEGER PRIMARY KEY,
        kind TEXT NOT NULL,
        src INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        dst INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        props TEXT NOT NULL,
        UNIQUE (kind, src, dst)
    );
    CREATE INDEX IF NOT EXISTS idx_nodes_label_scope ON nodes(label, scope);
    CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst);
";

/// Graph store backed by two SQLite tables. Identity constraints are UNIQUE
/// indexes; upserts use `INSERT ... ON CONFLICT DO UPDATE`.
pub struct SqliteGraphStore {
    conn: Connection,
}

impl SqliteGraphStore {
    pub fn open<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        debug!("Opened graph store at {}", path.as_ref().display());
        Self::from_connection(conn, timeout)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    fn from_connection(conn: Connection, timeout: Duration) -> Result<Self> {
        conn.busy_timeout(timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&mut self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.check_schema_version()?;
        Ok(())
    }

    fn check_schema_version(&mut self) -> Result<()> {
        let user_version: i64 = self
            .conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))?;

        if user_version == 0 {
            let set_stmt = format!("PRAGMA user_version = {GRAPH_SCHEMA_VERSION};");
            self.conn.execute_batch(&set_stmt)?;
        } else if user_version != GRAPH_SCHEMA_VERSION as i64 {
            return Err(RepographError::Config(format!(
                "Graph schema version mismatch: expected {}, found {}",
                GRAPH_SCHEMA_VERSION, user_version
            )));
        }

        Ok(())
    }

    /// Stored properties of a node, if present.
    pub fn node_properties(&self, key: &NodeKey) -> std::result::Result<Option<Properties>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT props FROM nodes WHERE label = ? AND scope = ? AND key = ?",
                params![key.label, key.scope, key.key],
                |row| row.get(0),
            )
            .optional()
            .map_err(classify)?;
        raw.map(|text| serde_json::from_str(&text).map_err(|e| StoreError::Fatal(e.to_string())))
            .transpose()
    }
}

fn classify(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StoreError::Transient(err.to_string()),
            ErrorCode::ConstraintViolation => StoreError::Constraint {
                label: String::new(),
                key: String::new(),
                reason: err.to_string(),
            },
            _ => StoreError::Fatal(err.to_string()),
        },
        _ => StoreError::Fatal(err.to_string()),
    }
}

/// Attach the offending key to a constraint error.
fn with_key(err: StoreError, label: &str, key: &str) -> StoreError {
    match err {
        StoreError::Constraint { reason, .. } => StoreError::Constraint {
            label: label.to_string(),
            key: key.to_string(),
            reason,
        },
        other => other,
    }
}

fn node_id(tx: &Transaction<'_>, key: &NodeKey) -> std::result::Result<Option<i64>, StoreError> {
    tx.prepare_cached("SELECT id FROM nodes WHERE label = ? AND scope = ? AND key = ?")
        .and_then(|mut stmt| {
            stmt.query_row(params![key.label, key.scope, key.key], |row| row.get(0))
                .optional()
        })
        .map_err(classify)
}

fn encode(props: &Properties) -> std::result::Result<String, StoreError> {
    serde_json::to_string(props).map_err(|e| StoreError::Fatal(e.to_string()))
}

impl UpsertPort for SqliteGraphStore {
    fn ensure_constraints(&mut self) -> std::result::Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA).map_err(classify)
    }

    fn apply_batch(&mut self, batch: &WriteBatch) -> std::result::Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(classify)?;

        for op in &batch.ops {
            match op {
                WriteOp::Node(node) => {
                    let props = encode(&node.props)?;
                    tx.prepare_cached(
                        "INSERT INTO nodes (label, scope, key, props) VALUES (?, ?, ?, ?)
                         ON CONFLICT (label, scope, key) DO UPDATE SET props = excluded.props",
                    )
                    .and_then(|mut stmt| {
                        stmt.execute(params![node.key.label, node.key.scope, node.key.key, props])
                    })
                    .map_err(|e| with_key(classify(e), &node.key.label, &node.key.key))?;
                }
                WriteOp::Edge(edge) => {
                    let endpoint = |key: &NodeKey| -> std::result::Result<i64, StoreError> {
                        node_id(&tx, key)?.ok_or_else(|| StoreError::Constraint {
                            label: key.label.clone(),
                            key: key.key.clone(),
                            reason: format!("{} edge references a missing node", edge.key.kind),
                        })
                    };
                    let src = endpoint(&edge.key.from)?;
                    let dst = endpoint(&edge.key.to)?;
                    let props = encode(&edge.props)?;
                    tx.prepare_cached(
                        "INSERT INTO edges (kind, src, dst, props) VALUES (?, ?, ?, ?)
                         ON CONFLICT (kind, src, dst) DO UPDATE SET props = excluded.props",
                    )
                    .and_then(|mut stmt| stmt.execute(params![edge.key.kind, src, dst, props]))
                    .map_err(|e| with_key(classify(e), &edge.key.kind, &edge.key.to_string()))?;
                }
            }
        }

        tx.commit().map_err(classify)
    }

    fn retain_scoped(&mut self, label: &str, scope: &str, keep: &[String]) -> std::result::Result<u64, StoreError> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let tx = self.conn.transaction().map_err(classify)?;

        let existing: Vec<(i64, String)> = {
            let mut stmt = tx
                .prepare("SELECT id, key FROM nodes WHERE label = ? AND scope = ?")
                .map_err(classify)?;
            let rows = stmt
                .query_map(params![label, scope], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(classify)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(classify)?
        };

        let mut removed = 0u64;
        for (id, key) in existing {
            if !keep.contains(key.as_str()) {
                tx.execute("DELETE FROM edges WHERE src = ? OR dst = ?", params![id, id])
                    .map_err(classify)?;
                tx.execute("DELETE FROM nodes WHERE id = ?", params![id])
                    .map_err(classify)?;
                removed += 1;
            }
        }

        tx.commit().map_err(classify)?;
        Ok(removed)
    }

    fn retain_edges_from(&mut self, kind: &str, from: &NodeKey, keep: &[NodeKey]) -> std::result::Result<u64, StoreError> {
        let keep: HashSet<&NodeKey> = keep.iter().collect();
        let tx = self.conn.transaction().map_err(classify)?;

        let existing: Vec<(i64, NodeKey)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT e.id, d.label, d.scope, d.key
                     FROM edges e
                     JOIN nodes s ON e.src = s.id
                     JOIN nodes d ON e.dst = d.id
                     WHERE e.kind = ? AND s.label = ? AND s.scope = ? AND s.key = ?",
                )
                .map_err(classify)?;
            let rows = stmt
                .query_map(params![kind, from.label, from.scope, from.key], |row| {
                    Ok((
                        row.get(0)?,
                        NodeKey {
                            label: row.get(1)?,
                            scope: row.get(2)?,
                            key: row.get(3)?,
                        },
                    ))
                })
                .map_err(classify)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(classify)?
        };

        let mut removed = 0u64;
        for (id, target) in existing {
            if !keep.contains(&target) {
                tx.execute("DELETE FROM edges WHERE id = ?", params![id])
                    .map_err(classify)?;
                removed += 1;
            }
        }

        tx.commit().map_err(classify)?;
        Ok(removed)
    }

    fn count_nodes_present(&self, keys: &[NodeKey]) -> std::result::Result<u64, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT EXISTS (SELECT 1 FROM nodes WHERE label = ? AND scope = ? AND key = ?)")
            .map_err(classify)?;
        let mut present = 0u64;
        for key in keys {
            let exists: bool = stmt
                .query_row(params![key.label, key.scope, key.key], |row| row.get(0))
                .map_err(classify)?;
            if exists {
                present += 1;
            }
        }
        Ok(present)
    }

    fn count_edges_present(&self, keys: &[EdgeKey]) -> std::result::Result<u64, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT EXISTS (
                    SELECT 1 FROM edges e
                    JOIN nodes s ON e.src = s.id
                    JOIN nodes d ON e.dst = d.id
                    WHERE e.kind = ?
                      AND s.label = ? AND s.scope = ? AND s.key = ?
                      AND d.label = ? AND d.scope = ? AND d.key = ?
                )",
            )
            .map_err(classify)?;
        let mut present = 0u64;
        for key in keys {
            let exists: bool = stmt
                .query_row(
                    params![
                        key.kind,
                        key.from.label,
                        key.from.scope,
                        key.from.key,
                        key.to.label,
                        key.to.scope,
                        key.to.key
                    ],
                    |row| row.get(0),
                )
                .map_err(classify)?;
            if exists {
                present += 1;
            }
        }
        Ok(present)
    }

    fn count_edges_from(&self, kind: &str, from: &NodeKey) -> std::result::Result<u64, StoreError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM edges e
                 JOIN nodes s ON e.src = s.id
                 WHERE e.kind = ? AND s.label = ? AND s.scope = ? AND s.key = ?",
                params![kind, from.label, from.scope, from.key],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(classify)
    }

    fn stats(&self) -> std::result::Result<GraphStats, StoreError> {
        let mut stats = GraphStats::default();

        let mut stmt = self
            .conn
            .prepare("SELECT label, COUNT(*) FROM nodes GROUP BY label")
            .map_err(classify)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(classify)?;
        for row in rows {
            let (label, count) = row.map_err(classify)?;
            stats.nodes.insert(label, count as u64);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM edges GROUP BY kind")
            .map_err(classify)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(classify)?;
        for row in rows {
            let (kind, count) = row.map_err(classify)?;
            stats.edges.insert(kind, count as u64);
        }

        Ok(stats)
    }
}
