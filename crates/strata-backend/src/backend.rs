//! Storage backend trait abstraction.
//!
//! This module defines the [`Backend`] trait that abstracts the bucketed
//! transactional store, and the [`BatchTx`] guard through which all reads and
//! writes flow. The trait enables different storage implementations while
//! maintaining consistent semantics, and lets consumers depend on the small
//! surface they actually use rather than on a concrete engine.
//!
//! # Locking Model
//!
//! A [`BatchTx`] value holds the backend's batch-transaction lock for as long
//! as it lives; dropping it releases the lock. Callers scope a guard around
//! each group of operations that must be applied without interleaving:
//!
//! ```rust
//! use strata_backend::{Backend, SqliteBackend};
//!
//! let backend = SqliteBackend::in_memory().unwrap();
//! {
//!     let mut tx = backend.batch_tx();
//!     tx.create_bucket(b"meta").unwrap();
//!     tx.put(b"meta", b"version", b"1").unwrap();
//! } // lock released here
//! ```
//!
//! # Invariants
//!
//! - At most one `BatchTx` guard exists per backend at any time; operations
//!   under a guard are never interleaved with another guard's.
//! - Writes performed under a guard are visible to every later guard, even
//!   before `force_commit`.
//! - `force_commit` returns only after previously written data is durable.

use super::storage::BackendError;

/// A bucketed transactional byte-key/byte-value store.
///
/// This trait is object-safe and can be used with `Arc<dyn Backend>`.
pub trait Backend: Send + Sync {
    /// Acquires the batch-transaction lock and returns the guard through
    /// which operations are performed. Blocks until the lock is available.
    fn batch_tx(&self) -> Box<dyn BatchTx + '_>;

    /// Flushes outstanding writes durably to the underlying medium.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails; previously written data may then
    /// be durable only up to the last successful flush.
    fn force_commit(&self) -> Result<(), BackendError>;
}

/// Operations available while holding the batch-transaction lock.
///
/// Keys and bucket names are raw byte strings. Range scans compare keys
/// bytewise, so fixed-width big-endian encodings enumerate in numeric order.
pub trait BatchTx {
    /// Creates a bucket if it does not already exist. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be created.
    fn create_bucket(&mut self, name: &[u8]) -> Result<(), BackendError>;

    /// Writes `value` under `key` in `bucket`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<(), BackendError>;

    /// Deletes `key` from `bucket`. Deleting an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<(), BackendError>;

    /// Returns all `(key, value)` pairs in `bucket` with `start <= key <=
    /// end`, in ascending key order. A `limit` of 0 means unlimited;
    /// otherwise at most `limit` pairs are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    #[allow(clippy::type_complexity)]
    fn range(
        &self,
        bucket: &[u8],
        start: &[u8],
        end: &[u8],
        limit: u64,
    ) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>), BackendError>;
}
