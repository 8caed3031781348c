//! `SQLite`-backed storage implementation.
//!
//! This module uses `SQLite` with WAL mode for the underlying storage. The
//! [`SqliteBackend`] struct implements the [`Backend`] trait, providing the
//! concrete bucketed store for strata.
//!
//! Bucket contents are stored in a single `kv` table with a composite
//! `(bucket, key)` primary key. `SQLite` compares BLOBs with `memcmp`, so
//! ranged reads over fixed-width big-endian keys come back in numeric order.

// Mutex poisoning indicates a panic in another thread, which is unrecoverable.
#![allow(clippy::missing_panics_doc)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags, params};
use thiserror::Error;
use tracing::debug;

use super::backend::{Backend, BatchTx};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors that can occur during backend operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bucketed transactional store backed by `SQLite`.
///
/// WAL mode allows concurrent reads while writes are in progress. The
/// batch-transaction lock is the connection mutex: a [`BatchTx`] guard holds
/// it for its whole lifetime, so operations under one guard are never
/// interleaved with another's.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    #[allow(dead_code)]
    path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Opens or creates a store at the specified path.
    ///
    /// If the database doesn't exist, it will be created with the
    /// appropriate schema. WAL mode is enabled for concurrent reads.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = %path.display(), "opened sqlite backend");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory store, useful for tests and tooling.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }
}

impl Backend for SqliteBackend {
    fn batch_tx(&self) -> Box<dyn BatchTx + '_> {
        Box::new(SqliteBatchTx {
            conn: self.conn.lock().unwrap(),
        })
    }

    fn force_commit(&self) -> Result<(), BackendError> {
        let conn = self.conn.lock().unwrap();
        // Autocommit applies each statement as it runs; flushing the WAL into
        // the main database file is what makes the data durable on its own.
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        debug!("checkpointed wal");
        Ok(())
    }
}

/// Guard over the connection mutex implementing the batch operations.
struct SqliteBatchTx<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl BatchTx for SqliteBatchTx<'_> {
    fn create_bucket(&mut self, name: &[u8]) -> Result<(), BackendError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO buckets (name) VALUES (?1)",
            params![name],
        )?;
        Ok(())
    }

    fn put(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        self.conn.execute(
            "INSERT INTO kv (bucket, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
            params![bucket, key, value],
        )?;
        Ok(())
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<(), BackendError> {
        self.conn.execute(
            "DELETE FROM kv WHERE bucket = ?1 AND key = ?2",
            params![bucket, key],
        )?;
        Ok(())
    }

    fn range(
        &self,
        bucket: &[u8],
        start: &[u8],
        end: &[u8],
        limit: u64,
    ) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>), BackendError> {
        // SQLite treats a negative LIMIT as unlimited.
        let limit = if limit == 0 {
            -1
        } else {
            i64::try_from(limit).unwrap_or(i64::MAX)
        };

        let mut stmt = self.conn.prepare_cached(
            "SELECT key, value FROM kv
             WHERE bucket = ?1 AND key >= ?2 AND key <= ?3
             ORDER BY key ASC LIMIT ?4",
        )?;

        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut rows = stmt.query(params![bucket, start, end, limit])?;
        while let Some(row) = rows.next()? {
            keys.push(row.get(0)?);
            values.push(row.get(1)?);
        }

        Ok((keys, values))
    }
}
