//! # strata-lease
//!
//! Lease management for the strata key-value store.
//!
//! A lease is a time-bounded ownership token: application keys attached to it
//! are deleted when the lease expires or is revoked, so ephemeral resources
//! (session keys, service-registration entries) disappear automatically once
//! their holder stops renewing. The [`Lessor`] owns all leases on a replica:
//! it grants and revokes them, persists their records through a
//! [`strata_backend::Backend`], and, while holding the primary role driven
//! by the consensus layer, expires them onto a bounded outbound stream.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use strata_backend::SqliteBackend;
//! use strata_lease::{Lessor, RangeDeleter};
//!
//! struct NoopDeleter;
//!
//! impl RangeDeleter for NoopDeleter {
//!     fn delete_range(&self, _key: &[u8], _end: Option<&[u8]>) -> (i64, i64) {
//!         (0, 0)
//!     }
//! }
//!
//! let backend = Arc::new(SqliteBackend::in_memory().unwrap());
//! let lessor = Lessor::new(1, backend, Arc::new(NoopDeleter)).unwrap();
//!
//! let lease = lessor.grant(60).unwrap();
//! assert!(lease.id().0 > 0);
//! lessor.revoke(lease.id()).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod id;
pub mod lessor;
mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::LeaseError;
pub use lessor::{
    FOREVER_MS, Lease, LeaseId, LeaseItem, Lessor, LessorConfig, MIN_LEASE_TERM, RangeDeleter,
};
