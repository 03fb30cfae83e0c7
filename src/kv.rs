//! # Persistent Key-Value Backend
//!
//! Every durable structure in sheetq — the lock record, the queue blob, the
//! membership index, the handle caches — lives in one shared string key-value
//! store behind the [`PersistentKv`] trait. The trait deliberately mirrors the
//! host property store it abstracts: `get`/`set`/`delete` on whole string
//! values, no TTL, no compare-and-swap, no partial update.
//!
//! ## Why No CAS?
//!
//! The backing store offers none, and the rest of the crate is designed
//! around that absence: the lock uses write-then-verify polling, and every
//! blob mutation is a whole-value overwrite where the last writer wins. A
//! `compare_and_set` here would silently change the concurrency story, so the
//! trait refuses to promise one.
//!
//! ## Implementations
//!
//! - [`SqliteKv`]: durable store over a single SQLite table in WAL mode, with
//!   host-style size quotas (per-value and total).
//! - [`MemoryKv`]: `Mutex<HashMap>` store for tests and the stress driver,
//!   with optional quotas for quota-path testing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};

// =============================================================================
// Quotas
// =============================================================================

/// Default per-value size limit, in bytes.
///
/// Matches the 9 KB per-property limit typical of hosted property stores.
pub const DEFAULT_VALUE_QUOTA: usize = 9 * 1024;

/// Default total-store size limit, in bytes (sum of all value lengths).
pub const DEFAULT_TOTAL_QUOTA: usize = 500 * 1024;

/// Host-style size limits enforced on writes.
#[derive(Debug, Clone, Copy)]
pub struct KvQuotas {
    /// Maximum size of one value, in bytes.
    pub per_value: usize,
    /// Maximum total bytes across all values.
    pub total: usize,
}

impl Default for KvQuotas {
    fn default() -> Self {
        Self {
            per_value: DEFAULT_VALUE_QUOTA,
            total: DEFAULT_TOTAL_QUOTA,
        }
    }
}

impl KvQuotas {
    /// No limits. Used by the in-memory store unless a test opts in.
    pub fn unlimited() -> Self {
        Self {
            per_value: usize::MAX,
            total: usize::MAX,
        }
    }

    /// Rejects a write that would blow either budget.
    ///
    /// `other_total` is the byte total of every value *except* the key being
    /// written, so an overwrite is charged only for its new size.
    fn check(&self, key: &str, new_len: usize, other_total: usize) -> Result<()> {
        if new_len > self.per_value {
            return Err(Error::QuotaExceeded {
                key: key.to_string(),
                size: new_len,
                limit: self.per_value,
            });
        }
        let projected = other_total.saturating_add(new_len);
        if projected > self.total {
            return Err(Error::QuotaExceeded {
                key: key.to_string(),
                size: projected,
                limit: self.total,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Trait
// =============================================================================

/// Durable, process-wide string key-value store.
///
/// Single-key operations are individually durable but there is no atomicity
/// across keys and no compare-and-swap. Callers that need mutual exclusion
/// layer [`RequestLock`](crate::lock::RequestLock) on top.
pub trait PersistentKv: Send + Sync {
    /// Reads a value, `None` if the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value, overwriting the whole previous value if any.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Deletes a key. Deleting an absent key is a no-op.
    fn delete(&self, key: &str) -> Result<()>;
}

// =============================================================================
// SQLite Implementation
// =============================================================================

/// Schema for the property table. One row per key, whole value per row.
const CREATE_PROPS: &str = "
CREATE TABLE IF NOT EXISTS props (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;
";

/// Durable [`PersistentKv`] over a single SQLite table.
///
/// The connection is wrapped in a `Mutex` because rusqlite's `Connection` is
/// not `Sync`; contention is negligible since every operation is one
/// statement. WAL mode keeps concurrent readers cheap.
pub struct SqliteKv {
    conn: Mutex<Connection>,
    quotas: KvQuotas,
}

impl SqliteKv {
    /// Opens (creating if needed) a store at `path` with default quotas.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_quotas(path, KvQuotas::default())
    }

    /// Opens a store with explicit quotas.
    pub fn open_with_quotas(path: impl AsRef<Path>, quotas: KvQuotas) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        conn.execute_batch(CREATE_PROPS)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quotas,
        })
    }

    /// In-memory SQLite store, handy for tests that want SQL semantics
    /// without a file.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_PROPS)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quotas: KvQuotas::default(),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a prior statement panicked mid-flight; the
        // connection itself is still usable for subsequent statements.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PersistentKv for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock_conn();
        let value = conn
            .query_row("SELECT value FROM props WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn();
        // CAST to BLOB so LENGTH counts bytes, not TEXT characters; the
        // quota math is in bytes on both backends.
        let other_total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM props WHERE key != ?1",
            [key],
            |row| row.get(0),
        )?;
        self.quotas.check(key, value.len(), other_total as usize)?;
        conn.execute(
            "INSERT INTO props (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute("DELETE FROM props WHERE key = ?1", [key])?;
        Ok(())
    }
}

// =============================================================================
// In-Memory Implementation
// =============================================================================

/// Non-durable [`PersistentKv`] for tests and load drivers.
pub struct MemoryKv {
    map: Mutex<HashMap<String, String>>,
    quotas: KvQuotas,
}

impl MemoryKv {
    /// Unlimited in-memory store.
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            quotas: KvQuotas::unlimited(),
        }
    }

    /// In-memory store that enforces quotas like the durable one.
    pub fn with_quotas(quotas: KvQuotas) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            quotas,
        }
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PersistentKv for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock_map().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.lock_map();
        let other_total: usize = map
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, v)| v.len())
            .sum();
        self.quotas.check(key, value.len(), other_total)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock_map().remove(key);
        Ok(())
    }
}
