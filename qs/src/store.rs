//! Core Store implementation
//!
//! One SQLite connection, one table per collection. All payloads are JSON
//! documents; the engine owns the shapes, the store only indexes id,
//! parent_id and status.

use std::path::Path;

use eyre::{Context, Result, eyre};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::now_ms;

/// Append-only schema migrations. The index into this slice is the schema
/// version; migrations are applied in order and never rewritten.
const MIGRATIONS: &[&str] = &[
    // v1: base tables
    "CREATE TABLE IF NOT EXISTS intents (
        id TEXT PRIMARY KEY,
        parent_id TEXT,
        status TEXT,
        doc TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        parent_id TEXT,
        status TEXT,
        doc TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS validation_results (
        id TEXT PRIMARY KEY,
        parent_id TEXT,
        status TEXT,
        doc TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS quantum_capsules (
        id TEXT PRIMARY KEY,
        parent_id TEXT,
        status TEXT,
        doc TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );",
    // v2: lookup indexes for the list() filters
    "CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);
    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
    CREATE INDEX IF NOT EXISTS idx_intents_status ON intents(status);
    CREATE INDEX IF NOT EXISTS idx_validation_parent ON validation_results(parent_id);",
];

/// The collections known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Intents,
    Tasks,
    ValidationResults,
    Capsules,
}

impl Collection {
    /// Table name backing this collection
    pub fn table(&self) -> &'static str {
        match self {
            Self::Intents => "intents",
            Self::Tasks => "tasks",
            Self::ValidationResults => "validation_results",
            Self::Capsules => "quantum_capsules",
        }
    }
}

/// A stored document with its bookkeeping columns
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub parent_id: Option<String>,
    pub status: Option<String>,
    pub doc: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// SQLite-backed document store
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a store at the given path and apply pending migrations
    pub fn open(path: &Path) -> Result<Self> {
        debug!(?path, "Store::open: called");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).wrap_err("Failed to create store directory")?;
        }
        let conn = Connection::open(path).wrap_err_with(|| format!("Failed to open store at {}", path.display()))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (tests, no-persistence runs)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Store::open_in_memory: called");
        let conn = Connection::open_in_memory().wrap_err("Failed to open in-memory store")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Apply any migrations newer than the recorded schema version
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at INTEGER NOT NULL
                );",
            )
            .wrap_err("Failed to create schema_version table")?;

        let current = self.schema_version()?;
        debug!(current, target = MIGRATIONS.len(), "Store::migrate: versions");

        for (idx, sql) in MIGRATIONS.iter().enumerate() {
            let version = (idx + 1) as i64;
            if version <= current {
                continue;
            }
            debug!(version, "Store::migrate: applying migration");
            self.conn
                .execute_batch(sql)
                .wrap_err_with(|| format!("Migration v{} failed", version))?;
            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                    params![version, now_ms()],
                )
                .wrap_err("Failed to record schema version")?;
            info!(version, "Applied store migration");
        }
        Ok(())
    }

    /// Highest applied schema version (0 for a fresh database)
    pub fn schema_version(&self) -> Result<i64> {
        let version: Option<i64> = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .wrap_err("Failed to read schema version")?;
        Ok(version.unwrap_or(0))
    }

    /// Insert or replace a document
    pub fn put(
        &self,
        collection: Collection,
        id: &str,
        parent_id: Option<&str>,
        status: Option<&str>,
        doc: &Value,
    ) -> Result<()> {
        debug!(table = collection.table(), %id, ?status, "Store::put: called");
        let now = now_ms();
        let body = serde_json::to_string(doc).wrap_err("Failed to serialize document")?;
        let sql = format!(
            "INSERT INTO {} (id, parent_id, status, doc, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 parent_id = excluded.parent_id,
                 status = excluded.status,
                 doc = excluded.doc,
                 updated_at = excluded.updated_at",
            collection.table()
        );
        self.conn
            .execute(&sql, params![id, parent_id, status, body, now])
            .wrap_err_with(|| format!("Failed to put {} into {}", id, collection.table()))?;
        Ok(())
    }

    /// Fetch a single document by id
    pub fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        debug!(table = collection.table(), %id, "Store::get: called");
        let sql = format!(
            "SELECT id, parent_id, status, doc, created_at, updated_at FROM {} WHERE id = ?1",
            collection.table()
        );
        let row = self
            .conn
            .query_row(&sql, params![id], row_to_document)
            .optional()
            .wrap_err_with(|| format!("Failed to get {} from {}", id, collection.table()))?;
        Ok(row)
    }

    /// List documents, optionally filtered by status and/or parent id,
    /// newest first
    pub fn list(
        &self,
        collection: Collection,
        status: Option<&str>,
        parent_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        debug!(table = collection.table(), ?status, ?parent_id, "Store::list: called");
        let mut sql = format!(
            "SELECT id, parent_id, status, doc, created_at, updated_at FROM {} WHERE 1=1",
            collection.table()
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(s) = status {
            validate_status(s)?;
            args.push(s.to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(p) = parent_id {
            args.push(p.to_string());
            sql.push_str(&format!(" AND parent_id = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        let mut stmt = self.conn.prepare(&sql).wrap_err("Failed to prepare list query")?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_document)
            .wrap_err("Failed to run list query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.wrap_err("Failed to decode listed document")?);
        }
        Ok(out)
    }

    /// Delete a document, returning whether it existed
    pub fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        debug!(table = collection.table(), %id, "Store::delete: called");
        let sql = format!("DELETE FROM {} WHERE id = ?1", collection.table());
        let n = self
            .conn
            .execute(&sql, params![id])
            .wrap_err_with(|| format!("Failed to delete {} from {}", id, collection.table()))?;
        Ok(n > 0)
    }

    /// Count documents in a collection
    pub fn count(&self, collection: Collection) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let n: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .wrap_err("Failed to count documents")?;
        Ok(n as u64)
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let body: String = row.get(3)?;
    let doc = serde_json::from_str(&body).unwrap_or(Value::Null);
    Ok(Document {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        status: row.get(2)?,
        doc,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Guard against accidentally treating a document body as a status filter
pub fn validate_status(status: &str) -> Result<()> {
    if status.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        Ok(())
    } else {
        Err(eyre!("Invalid status filter: {}", status))
    }
}
