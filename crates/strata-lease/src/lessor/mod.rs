//! The lessor: owner of all leases.
//!
//! A lease is a time-bounded ownership token. Application keys attached to a
//! lease are deleted when the lease expires or is revoked, which is how
//! ephemeral resources (session keys, service-registration entries) vanish
//! once their holder stops renewing.
//!
//! # Architecture
//!
//! ```text
//! Grant ──────> table + durable record
//! Renew ──────> expiry reset (primary only)
//! Attach ─────> item set (memory only)
//! Promote ────> fresh expiries, role = primary
//! Demote ─────> expiries = forever, role = non-primary
//! Revoke <───── consumer of expired_leases()
//! ```
//!
//! # Key Concepts
//!
//! - **Primary**: exactly one replica of the group is expected to expire and
//!   renew leases; the replicated-state-machine layer drives the role through
//!   [`Lessor::promote`] and [`Lessor::demote`]. Non-primary replicas keep
//!   every expiry parked at [`FOREVER_MS`].
//! - **Expiry scan**: a dedicated thread walks the table on a fixed period
//!   and publishes expired leases on a bounded channel. Delivery is
//!   at-least-once: a full channel drops the batch and the next scan finds
//!   the same leases again.
//! - **Durability**: only `(id, ttl)` is persisted. Expiry is recomputed on
//!   promotion; item sets are rebuilt by re-scanning the main key-value store
//!   after recovery.
//!
//! Two replicas may briefly both consider themselves primary during a leader
//! change; the stale primary's proposals are rejected downstream, so no extra
//! local safeguard is layered on top.

// Mutex poisoning indicates a panic in another thread, which is unrecoverable.
// Millisecond interval and batch sizes fit comfortably in u64.
#![allow(clippy::missing_panics_doc, clippy::cast_possible_truncation)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use strata_backend::Backend;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::LeaseError;
use crate::id::IdGenerator;
use crate::record;


/// Lower bound on any effective lease lifetime.
pub const MIN_LEASE_TERM: Duration = Duration::from_secs(5);

/// Far-future expiry sentinel; no scan will ever reach it.
pub const FOREVER_MS: u64 = u64::MAX;

/// Default period of the expiry scan.
pub const DEFAULT_EXPIRY_INTERVAL: Duration = Duration::from_millis(500);

/// Default capacity of the expired-lease channel.
pub const DEFAULT_EXPIRED_CAPACITY: usize = 16;

const MIN_LEASE_TERM_MS: u64 = MIN_LEASE_TERM.as_millis() as u64;

/// Identifier of a lease.
///
/// Real leases always carry a positive ID; [`LeaseId::NONE`] is the reserved
/// "no lease" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl LeaseId {
    /// The absence of a lease. Never assigned.
    pub const NONE: Self = Self(0);
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// An application key whose lifetime is bound to a lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseItem {
    /// The leased application key.
    pub key: Vec<u8>,
}

/// A time-bounded ownership token and its attached items.
///
/// Values handed out by the lessor are snapshots; mutating lessor state is
/// only possible through the lessor itself.
#[derive(Debug, Clone)]
pub struct Lease {
    id: LeaseId,
    ttl: i64,
    expiry_ms: u64,
    items: HashSet<LeaseItem>,
}

impl Lease {
    /// The lease ID.
    #[must_use]
    pub const fn id(&self) -> LeaseId {
        self.id
    }

    /// Time to live in seconds; the nominal interval between renewals.
    #[must_use]
    pub const fn ttl(&self) -> i64 {
        self.ttl
    }

    /// Absolute expiry in Unix milliseconds. [`FOREVER_MS`] while the owning
    /// lessor is non-primary.
    #[must_use]
    pub const fn expiry_ms(&self) -> u64 {
        self.expiry_ms
    }

    /// The attached items.
    #[must_use]
    pub const fn items(&self) -> &HashSet<LeaseItem> {
        &self.items
    }
}

/// Capability to delete a range of application keys.
///
/// The lessor consumes this minimal interface, rather than the full
/// key-value surface, so tests can stub it out trivially. Implementations
/// must not call back into the lessor: the lessor invokes the deleter while
/// holding its own lock.
pub trait RangeDeleter: Send + Sync {
    /// Deletes the keys in `[key, end)`; when `end` is `None`, deletes the
    /// single `key`. Returns the number of deleted keys and the resulting
    /// store revision.
    fn delete_range(&self, key: &[u8], end: Option<&[u8]>) -> (i64, i64);
}

/// Tuning knobs for a [`Lessor`].
#[derive(Debug, Clone)]
pub struct LessorConfig {
    /// Period of the expiry scan.
    pub expiry_interval: Duration,

    /// Capacity of the expired-lease channel.
    pub expired_capacity: usize,
}

impl Default for LessorConfig {
    fn default() -> Self {
        Self {
            expiry_interval: DEFAULT_EXPIRY_INTERVAL,
            expired_capacity: DEFAULT_EXPIRED_CAPACITY,
        }
    }
}

impl LessorConfig {
    /// Sets the expiry-scan period.
    #[must_use]
    pub const fn with_expiry_interval(mut self, interval: Duration) -> Self {
        self.expiry_interval = interval;
        self
    }

    /// Sets the expired-lease channel capacity.
    #[must_use]
    pub const fn with_expired_capacity(mut self, capacity: usize) -> Self {
        self.expired_capacity = capacity;
        self
    }
}

/// Everything the lessor lock protects.
struct LessorState {
    /// Whether this replica currently expires and renews leases.
    primary: bool,
    leases: HashMap<LeaseId, Lease>,
    backend: Arc<dyn Backend>,
    range_deleter: Arc<dyn RangeDeleter>,
}

/// State shared with the expiry thread.
struct Shared {
    state: Mutex<LessorState>,
    clock: Arc<dyn Clock>,
    expired_tx: mpsc::Sender<Vec<Lease>>,
    stop: AtomicBool,
}

/// The owner of leases: grants, revokes, renews and expires them.
///
/// All state sits behind a single mutex; persistence happens inside the
/// critical section, so the lock is a total order on persisted mutations.
/// Lease traffic is infrequent next to key-value traffic, which is why the
/// blocking backend I/O under the lock is an accepted cost.
pub struct Lessor {
    shared: Arc<Shared>,
    id_gen: IdGenerator,
    expired_rx: Mutex<Option<mpsc::Receiver<Vec<Lease>>>>,
    expiry_thread: Option<thread::JoinHandle<()>>,
}

impl Lessor {
    /// Creates a lessor over `backend` and `range_deleter`, recovering any
    /// persisted leases and starting the expiry scan. The lessor starts
    /// non-primary.
    ///
    /// `replica_tag` distinguishes this replica's lease IDs from its peers'.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails during recovery.
    ///
    /// # Panics
    ///
    /// Panics if a persisted lease record fails to decode (the store is
    /// corrupt) or if the expiry thread cannot be spawned.
    pub fn new(
        replica_tag: u8,
        backend: Arc<dyn Backend>,
        range_deleter: Arc<dyn RangeDeleter>,
    ) -> Result<Self, LeaseError> {
        Self::with_config(
            replica_tag,
            backend,
            range_deleter,
            LessorConfig::default(),
            Arc::new(SystemClock),
        )
    }

    /// Creates a lessor with explicit configuration and clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails during recovery.
    ///
    /// # Panics
    ///
    /// As for [`Lessor::new`].
    pub fn with_config(
        replica_tag: u8,
        backend: Arc<dyn Backend>,
        range_deleter: Arc<dyn RangeDeleter>,
        config: LessorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LeaseError> {
        let id_gen = IdGenerator::new(replica_tag, clock.as_ref());

        let mut state = LessorState {
            primary: false,
            leases: HashMap::new(),
            backend,
            range_deleter,
        };
        init_and_recover(&mut state)?;

        let (expired_tx, expired_rx) = mpsc::channel(config.expired_capacity);
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            clock,
            expired_tx,
            stop: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let interval = config.expiry_interval;
        let expiry_thread = thread::Builder::new()
            .name("strata-lease-expiry".into())
            .spawn(move || run_expiry_loop(&loop_shared, interval))
            .expect("failed to spawn expiry thread");

        Ok(Self {
            shared,
            id_gen,
            expired_rx: Mutex::new(Some(expired_rx)),
            expiry_thread: Some(expiry_thread),
        })
    }

    /// Grants a lease that expires no earlier than `ttl` seconds from now,
    /// and no earlier than [`MIN_LEASE_TERM`] from now regardless of how
    /// small `ttl` is. The record is durable before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the record fails.
    ///
    /// # Panics
    ///
    /// Panics if the ID generator hands out an ID already present in the
    /// table; that is a broken invariant, not a recoverable condition.
    pub fn grant(&self, ttl: i64) -> Result<Lease, LeaseError> {
        let clock = self.shared.clock.as_ref();
        let nominal = clock.now_ms().saturating_add(ttl_to_ms(ttl));
        let expiry_ms = min_expiry(clock.now_ms(), nominal);

        let id = LeaseId(self.id_gen.next());

        let mut state = self.shared.state.lock().unwrap();
        assert!(
            !state.leases.contains_key(&id),
            "duplicate lease id {id} from generator"
        );

        record::persist(state.backend.as_ref(), id, ttl)?;
        let lease = Lease {
            id,
            ttl,
            expiry_ms,
            items: HashSet::new(),
        };
        state.leases.insert(id, lease.clone());
        debug!(%id, ttl, "granted lease");

        Ok(lease)
    }

    /// Revokes a lease, deleting every attached application key through the
    /// range deleter and dropping the durable record.
    ///
    /// Legal in any role: non-primary replicas revoke in response to
    /// replicated state changes.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::NotFound`] for an unknown ID, or a backend
    /// error if dropping the record fails.
    pub fn revoke(&self, id: LeaseId) -> Result<(), LeaseError> {
        let mut state = self.shared.state.lock().unwrap();
        let lease = state.leases.get(&id).ok_or(LeaseError::NotFound { id })?;

        for item in &lease.items {
            // Single-key delete; the count is of no interest here.
            state.range_deleter.delete_range(&item.key, None);
        }

        state.leases.remove(&id);
        record::unpersist(state.backend.as_ref(), id)?;
        debug!(%id, "revoked lease");
        Ok(())
    }

    /// Renews a lease, giving it a fresh full TTL from now (min-term
    /// clamped). Expiry is in-memory only, so nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::NotPrimary`] when this lessor is not primary
    /// (checked before the lookup), or [`LeaseError::NotFound`] for an
    /// unknown ID.
    pub fn renew(&self, id: LeaseId) -> Result<(), LeaseError> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.primary {
            return Err(LeaseError::NotPrimary);
        }

        let lease = state
            .leases
            .get_mut(&id)
            .ok_or(LeaseError::NotFound { id })?;
        refresh_expiry(lease, self.shared.clock.as_ref());
        Ok(())
    }

    /// Makes this lessor primary: it now expires and renews leases.
    ///
    /// Every lease gets a fresh full TTL, tolerating the handover gap in
    /// which the previous primary was the one responsible for renewals.
    pub fn promote(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.primary = true;

        for lease in state.leases.values_mut() {
            refresh_expiry(lease, self.shared.clock.as_ref());
        }
        info!(leases = state.leases.len(), "promoted to primary lessor");
    }

    /// Demotes this lessor: expiries are parked at [`FOREVER_MS`] and the
    /// role flips to non-primary.
    ///
    /// Both happen under one critical section, and in that order: no scan
    /// can pair a live deadline with the non-primary role.
    pub fn demote(&self) {
        let mut state = self.shared.state.lock().unwrap();
        for lease in state.leases.values_mut() {
            lease.expiry_ms = FOREVER_MS;
        }
        state.primary = false;
        info!("demoted from primary lessor");
    }

    /// Attaches items to a lease; duplicates collapse. Attachments are not
    /// persisted: after a restart they are rebuilt by re-scanning the main
    /// key-value store and calling this again.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::NotFound`] for an unknown ID.
    pub fn attach(&self, id: LeaseId, items: Vec<LeaseItem>) -> Result<(), LeaseError> {
        let mut state = self.shared.state.lock().unwrap();
        let lease = state
            .leases
            .get_mut(&id)
            .ok_or(LeaseError::NotFound { id })?;
        lease.items.extend(items);
        Ok(())
    }

    /// Replaces the backend and range-deleter handles and reloads the table
    /// from the new backend, as after a snapshot install. Reloaded leases
    /// have forever expiry and empty item sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails during the reload.
    ///
    /// # Panics
    ///
    /// Panics if a persisted lease record fails to decode.
    pub fn recover(
        &self,
        backend: Arc<dyn Backend>,
        range_deleter: Arc<dyn RangeDeleter>,
    ) -> Result<(), LeaseError> {
        let mut state = self.shared.state.lock().unwrap();
        state.backend = backend;
        state.range_deleter = range_deleter;
        init_and_recover(&mut state)
    }

    /// Claims the receiving end of the expired-lease stream.
    ///
    /// The stream carries non-empty batches of leases snapshotted at
    /// detection time, at least once per expired lease. There is at most one
    /// logical consumer: the first call returns the receiver, every later
    /// call returns `None`.
    pub fn expired_leases(&self) -> Option<mpsc::Receiver<Vec<Lease>>> {
        self.expired_rx.lock().unwrap().take()
    }

    /// Returns a snapshot of the lease with the given ID.
    #[must_use]
    pub fn get(&self, id: LeaseId) -> Option<Lease> {
        self.shared.state.lock().unwrap().leases.get(&id).cloned()
    }

    /// Whether this lessor currently holds the primary role.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.shared.state.lock().unwrap().primary
    }

    /// Number of leases in the table.
    #[must_use]
    pub fn lease_count(&self) -> usize {
        self.shared.state.lock().unwrap().leases.len()
    }

    /// Stops the expiry scan and waits for its thread to exit. Idempotent;
    /// also invoked on drop.
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.expiry_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Lessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Lessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lessor")
            .field("leases", &self.lease_count())
            .field("primary", &self.is_primary())
            .finish_non_exhaustive()
    }
}

/// Loads every persisted record into the table with forever expiry and an
/// empty item set, then forces a durable commit.
fn init_and_recover(state: &mut LessorState) -> Result<(), LeaseError> {
    let records = record::load_all(state.backend.as_ref())?;
    state.leases.clear();
    for (id, ttl) in records {
        state.leases.insert(
            id,
            Lease {
                id,
                ttl,
                expiry_ms: FOREVER_MS,
                items: HashSet::new(),
            },
        );
    }
    state.backend.force_commit()?;
    info!(leases = state.leases.len(), "recovered lease table");
    Ok(())
}

/// The expiry scan: wakes every `interval`, and while primary publishes the
/// expired leases it finds. Runs until the stop flag is raised.
fn run_expiry_loop(shared: &Shared, interval: Duration) {
    debug!(interval_ms = interval.as_millis() as u64, "expiry loop started");

    while !shared.stop.load(Ordering::Relaxed) {
        let expired = {
            let state = shared.state.lock().unwrap();
            if state.primary {
                find_expired(&state, shared.clock.now_ms())
            } else {
                Vec::new()
            }
        };

        if !expired.is_empty() {
            // Non-blocking: the consumer may be busy. Nothing is mutated on
            // this path, so a dropped batch is rediscovered next tick.
            match shared.expired_tx.try_send(expired) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(batch)) => {
                    warn!(dropped = batch.len(), "expired-lease channel full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        thread::sleep(interval);
    }

    debug!("expiry loop stopped");
}

/// One O(n) walk of the table collecting every lease past its deadline.
fn find_expired(state: &LessorState, now_ms: u64) -> Vec<Lease> {
    state
        .leases
        .values()
        .filter(|lease| lease.expiry_ms <= now_ms)
        .cloned()
        .collect()
}

/// Resets a lease's expiry to a fresh full TTL from now, min-term clamped.
fn refresh_expiry(lease: &mut Lease, clock: &dyn Clock) {
    let nominal = clock.now_ms().saturating_add(ttl_to_ms(lease.ttl));
    lease.expiry_ms = min_expiry(clock.now_ms(), nominal);
}

/// Clamps an expected expiry so every lease lives at least
/// [`MIN_LEASE_TERM`] from `now`. The clock is sampled separately for the
/// nominal expiry and the clamp, so the result may exceed the minimum by
/// scheduling jitter; expiries are lower-bounded, not equal-bounded.
fn min_expiry(now_ms: u64, nominal_ms: u64) -> u64 {
    nominal_ms.max(now_ms.saturating_add(MIN_LEASE_TERM_MS))
}

/// Converts a TTL in whole seconds to milliseconds, saturating.
fn ttl_to_ms(ttl: i64) -> u64 {
    u64::try_from(ttl).unwrap_or(0).saturating_mul(1000)
}
