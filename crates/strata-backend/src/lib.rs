//! # strata-backend
//!
//! Bucketed transactional byte-key/byte-value storage for the strata
//! key-value store.
//!
//! This crate provides the storage capability consumed by the higher layers
//! of strata: a small set of bucketed operations (put, delete, ranged read)
//! executed under a batch-transaction lock, plus a durable flush. The
//! [`Backend`] trait abstracts the store; [`SqliteBackend`] is the reference
//! implementation backed by `SQLite` in WAL mode.
//!
//! ## Example
//!
//! ```rust
//! use strata_backend::{Backend, SqliteBackend};
//!
//! let backend = SqliteBackend::in_memory().unwrap();
//! {
//!     let mut tx = backend.batch_tx();
//!     tx.create_bucket(b"config").unwrap();
//!     tx.put(b"config", b"mode", b"primary").unwrap();
//! }
//! backend.force_commit().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod storage;

pub use backend::{Backend, BatchTx};
pub use storage::{BackendError, SqliteBackend};

#[cfg(test)]
mod tests;
