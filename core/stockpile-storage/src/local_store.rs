//! SQLite-backed durable store.
//!
//! Uses one connection guarded by a mutex. Async callers go through
//! [`LocalStore::run`], which moves the closure onto the blocking pool.

use crate::error::{StorageError, StorageResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use stockpile_types::{namespaces, OperationId, Payload, PendingOperation, Timestamp};
use tracing::{debug, info};

/// Configuration for the durable store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` opens an in-memory database (nothing survives
    /// the process).
    pub path: Option<PathBuf>,
    /// Upper bound on stored payload bytes across all namespaces.
    pub max_bytes: Option<u64>,
}

impl StoreConfig {
    /// File-backed store at `path` with no quota.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            max_bytes: None,
        }
    }
}

/// A mirrored cache entry in the `critical_data` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalEntry {
    /// Serialized cache value.
    pub data: Vec<u8>,
    /// When the value was written to the cache.
    pub timestamp: Timestamp,
    /// Time-to-live of the original cache entry, in milliseconds.
    pub ttl_ms: u64,
    /// Priority tier name of the original cache entry.
    pub priority: String,
}

/// Persistent store for records, the pending-operation log and the
/// critical-cache mirror.
pub struct LocalStore {
    conn: Mutex<Connection>,
    max_bytes: Option<u64>,
}

impl LocalStore {
    /// Opens (or creates) a store as described by `config`.
    pub fn open(config: &StoreConfig) -> StorageResult<Self> {
        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                info!("Opening local store at {}", path.display());
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        let store = Self {
            conn: Mutex::new(conn),
            max_bytes: config.max_bytes,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open(&StoreConfig::default())
    }

    /// Runs `f` against this store on the blocking thread pool.
    pub async fn run<T, F>(self: &Arc<Self>, f: F) -> StorageResult<T>
    where
        F: FnOnce(&LocalStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                data BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, id)
            );

            CREATE TABLE IF NOT EXISTS pending_operations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                op_type TEXT NOT NULL,
                collection TEXT NOT NULL,
                document_id TEXT NOT NULL,
                payload BLOB,
                enqueued_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS critical_data (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                timestamp INTEGER NOT NULL,
                ttl_ms INTEGER NOT NULL,
                priority TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Quota ────────────────────────────────────────────────────

    fn used_bytes(conn: &Connection) -> StorageResult<u64> {
        let used: i64 = conn.query_row(
            "SELECT
                (SELECT COALESCE(SUM(LENGTH(data)), 0) FROM records)
              + (SELECT COALESCE(SUM(LENGTH(data)), 0) FROM critical_data)
              + (SELECT COALESCE(SUM(LENGTH(payload)), 0) FROM pending_operations)",
            [],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as u64)
    }

    /// Fails with `QuotaExceeded` if writing `incoming` bytes (replacing
    /// `replaced` bytes) would overflow the budget.
    fn check_quota(&self, conn: &Connection, incoming: usize, replaced: u64) -> StorageResult<()> {
        let Some(limit) = self.max_bytes else {
            return Ok(());
        };
        let used = Self::used_bytes(conn)?.saturating_sub(replaced);
        let requested = incoming as u64;
        if used.saturating_add(requested) > limit {
            return Err(StorageError::QuotaExceeded {
                requested,
                used,
                limit,
            });
        }
        Ok(())
    }

    /// Total bytes currently stored across records, mirror and pending log.
    pub fn total_bytes(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        Self::used_bytes(&conn)
    }

    // ── Records ──────────────────────────────────────────────────

    /// Serializes `value` and stores it under `namespace`/`id`, replacing
    /// any previous value.
    pub fn put<T: Serialize + ?Sized>(&self, namespace: &str, id: &str, value: &T) -> StorageResult<()> {
        let data = serde_json::to_vec(value)?;
        self.put_raw(namespace, id, &data)
    }

    /// Stores raw bytes under `namespace`/`id`.
    pub fn put_raw(&self, namespace: &str, id: &str, data: &[u8]) -> StorageResult<()> {
        if namespaces::is_reserved(namespace) {
            return Err(StorageError::ReservedNamespace(namespace.to_string()));
        }
        let conn = self.conn()?;
        let replaced: Option<i64> = conn
            .query_row(
                "SELECT LENGTH(data) FROM records WHERE namespace = ?1 AND id = ?2",
                params![namespace, id],
                |row| row.get(0),
            )
            .optional()?;
        self.check_quota(&conn, data.len(), replaced.unwrap_or(0).max(0) as u64)?;
        conn.execute(
            "INSERT OR REPLACE INTO records (namespace, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![namespace, id, data, Timestamp::now().as_millis() as i64],
        )?;
        debug!(namespace, id, bytes = data.len(), "stored record");
        Ok(())
    }

    /// Returns every record in `namespace`, ordered by id.
    pub fn get_all<T: DeserializeOwned>(&self, namespace: &str) -> StorageResult<Vec<T>> {
        self.get_all_raw(namespace)?
            .into_iter()
            .map(|(_, data)| serde_json::from_slice(&data).map_err(StorageError::from))
            .collect()
    }

    /// Returns every `(id, bytes)` pair in `namespace`, ordered by id.
    pub fn get_all_raw(&self, namespace: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, data FROM records WHERE namespace = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Returns the record stored under `namespace`/`id`, if any.
    pub fn get_by_id<T: DeserializeOwned>(&self, namespace: &str, id: &str) -> StorageResult<Option<T>> {
        match self.get_raw(namespace, id)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Returns the raw bytes stored under `namespace`/`id`, if any.
    pub fn get_raw(&self, namespace: &str, id: &str) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let data = conn
            .query_row(
                "SELECT data FROM records WHERE namespace = ?1 AND id = ?2",
                params![namespace, id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    /// Removes a record. Returns whether it existed.
    pub fn remove(&self, namespace: &str, id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM records WHERE namespace = ?1 AND id = ?2",
            params![namespace, id],
        )?;
        Ok(removed > 0)
    }

    /// Number of records in `namespace`.
    pub fn count(&self, namespace: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE namespace = ?1",
            params![namespace],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Removes every record in `namespace`. Returns how many were removed.
    pub fn clear_namespace(&self, namespace: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM records WHERE namespace = ?1", params![namespace])?;
        Ok(removed)
    }

    /// Lists the record namespaces that currently hold data.
    pub fn namespaces(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT namespace FROM records ORDER BY namespace")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ── Pending-operation log ────────────────────────────────────

    /// Appends an operation to the log. Re-enqueuing an id that is already
    /// present is a no-op, so redundant calls are safe.
    pub fn enqueue(&self, op: &PendingOperation) -> StorageResult<()> {
        let conn = self.conn()?;
        let payload = op.payload.as_ref().map(Payload::as_bytes);
        self.check_quota(&conn, payload.map_or(0, <[u8]>::len), 0)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO pending_operations
                (id, op_type, collection, document_id, payload, enqueued_at, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                op.id.to_string(),
                op.op_type.as_str(),
                op.collection,
                op.document_id,
                payload,
                op.enqueued_at.as_millis() as i64,
                op.retry_count,
            ],
        )?;
        if inserted > 0 {
            debug!(operation_id = %op.id, op_type = %op.op_type, collection = %op.collection, "enqueued operation");
        }
        Ok(())
    }

    /// Returns the log in enqueue order.
    pub fn list_pending(&self) -> StorageResult<Vec<PendingOperation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, op_type, collection, document_id, payload, enqueued_at, retry_count
             FROM pending_operations ORDER BY seq",
        )?;
        let rows = stmt.query_map([], Self::pending_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(Self::pending_from_row(row?)?);
        }
        Ok(result)
    }

    /// Looks up one pending operation.
    pub fn get_pending(&self, id: &OperationId) -> StorageResult<Option<PendingOperation>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, op_type, collection, document_id, payload, enqueued_at, retry_count
                 FROM pending_operations WHERE id = ?1",
                params![id.to_string()],
                Self::pending_row,
            )
            .optional()?;
        row.map(Self::pending_from_row).transpose()
    }

    /// Removes an operation from the log. Returns whether it was present.
    pub fn dequeue(&self, id: &OperationId) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM pending_operations WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Updates the retry count of a queued operation. Returns whether it was
    /// present.
    pub fn set_retry_count(&self, id: &OperationId, retry_count: u32) -> StorageResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE pending_operations SET retry_count = ?1 WHERE id = ?2",
            params![retry_count, id.to_string()],
        )?;
        Ok(updated > 0)
    }

    /// Points every queued operation on `collection/from` at `to` instead.
    /// Returns how many operations were rewritten.
    pub fn retarget_pending(&self, collection: &str, from: &str, to: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE pending_operations SET document_id = ?3
             WHERE collection = ?1 AND document_id = ?2",
            params![collection, from, to],
        )?)
    }

    /// Number of queued operations.
    pub fn pending_count(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_operations", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Empties the log. Returns how many operations were discarded.
    pub fn clear_pending(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM pending_operations", [])?)
    }

    #[allow(clippy::type_complexity)]
    fn pending_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(String, String, String, String, Option<Vec<u8>>, i64, u32)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn pending_from_row(
        (id, op_type, collection, document_id, payload, enqueued_at, retry_count): (
            String,
            String,
            String,
            String,
            Option<Vec<u8>>,
            i64,
            u32,
        ),
    ) -> StorageResult<PendingOperation> {
        let id = OperationId::parse(&id)
            .map_err(|e| StorageError::InvalidData(format!("invalid operation id {id}: {e}")))?;
        Ok(PendingOperation {
            id,
            op_type: op_type.parse()?,
            collection,
            document_id,
            payload: payload.map(Payload::from_bytes),
            enqueued_at: Timestamp::from_millis(enqueued_at.max(0) as u64),
            retry_count,
        })
    }

    // ── Critical-data mirror ─────────────────────────────────────

    /// Mirrors a cache entry under `key`.
    pub fn put_critical(&self, key: &str, entry: &CriticalEntry) -> StorageResult<()> {
        let conn = self.conn()?;
        let replaced: Option<i64> = conn
            .query_row(
                "SELECT LENGTH(data) FROM critical_data WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        self.check_quota(&conn, entry.data.len(), replaced.unwrap_or(0).max(0) as u64)?;
        conn.execute(
            "INSERT OR REPLACE INTO critical_data (key, data, timestamp, ttl_ms, priority)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                entry.data,
                entry.timestamp.as_millis() as i64,
                entry.ttl_ms as i64,
                entry.priority,
            ],
        )?;
        Ok(())
    }

    /// Reads a mirrored entry.
    pub fn get_critical(&self, key: &str) -> StorageResult<Option<CriticalEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                "SELECT data, timestamp, ttl_ms, priority FROM critical_data WHERE key = ?1",
                params![key],
                |row| {
                    let timestamp: i64 = row.get(1)?;
                    let ttl_ms: i64 = row.get(2)?;
                    Ok(CriticalEntry {
                        data: row.get(0)?,
                        timestamp: Timestamp::from_millis(timestamp.max(0) as u64),
                        ttl_ms: ttl_ms.max(0) as u64,
                        priority: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Removes a mirrored entry. Returns whether it existed.
    pub fn remove_critical(&self, key: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM critical_data WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    /// Lists mirrored keys.
    pub fn critical_keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM critical_data ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Removes every mirrored entry.
    pub fn clear_critical(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM critical_data", [])?)
    }

    // ── Metadata ─────────────────────────────────────────────────

    /// Stores a metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Reads a metadata value.
    pub fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }
}
