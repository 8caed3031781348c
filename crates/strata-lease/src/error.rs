//! Lease-specific error types.

use strata_backend::BackendError;
use thiserror::Error;

use crate::lessor::LeaseId;

/// Errors that can occur during lease operations.
///
/// Corruption of persisted state (a lease record that fails to decode, or an
/// ID collision in the table) is deliberately *not* represented here: those
/// indicate a broken invariant and abort the process instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LeaseError {
    /// The lease was not found.
    #[error("lease not found: {id}")]
    NotFound {
        /// The lease ID that was not found.
        id: LeaseId,
    },

    /// The operation requires the primary lessor role.
    ///
    /// Callers are expected to redirect to the current primary.
    #[error("not a primary lessor")]
    NotPrimary,

    /// The storage backend failed; the error is propagated untouched.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}
