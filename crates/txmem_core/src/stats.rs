//! Runtime statistics.
//!
//! Counters for monitoring transaction throughput and conflict rates.
//! All counters are atomic and can be read while transactions are in
//! flight.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for a single world.
///
/// Values are monotonically increasing.
#[derive(Debug, Default)]
pub struct WorldStats {
    /// Transaction attempts started (each retry starts a new attempt).
    attempts_started: AtomicU64,
    /// Transactions committed.
    transactions_committed: AtomicU64,
    /// Attempts abandoned for retry (stale snapshot or commit conflict).
    transactions_retried: AtomicU64,
    /// Transactions aborted by a user error.
    transactions_aborted: AtomicU64,

    /// Ref reads routed through a transaction or served from a head.
    reads: AtomicU64,
    /// Staged writes (including read-modify-write).
    writes: AtomicU64,
    /// Staged commutes.
    commutes: AtomicU64,
    /// Ensure calls.
    ensures: AtomicU64,
    /// Refs created in this world.
    tvars_created: AtomicU64,
}

impl WorldStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_attempt_start(&self) {
        self.attempts_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.transactions_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commute(&self) {
        self.commutes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ensure(&self) {
        self.ensures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tvar_created(&self) {
        self.tvars_created.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of transaction attempts started.
    pub fn attempts_started(&self) -> u64 {
        self.attempts_started.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of attempts abandoned for retry.
    pub fn transactions_retried(&self) -> u64 {
        self.transactions_retried.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions aborted by a user error.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of ref reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of staged writes.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the number of staged commutes.
    pub fn commutes(&self) -> u64 {
        self.commutes.load(Ordering::Relaxed)
    }

    /// Returns the number of ensure calls.
    pub fn ensures(&self) -> u64 {
        self.ensures.load(Ordering::Relaxed)
    }

    /// Returns the number of refs created in this world.
    pub fn tvars_created(&self) -> u64 {
        self.tvars_created.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts_started: self.attempts_started(),
            transactions_committed: self.transactions_committed(),
            transactions_retried: self.transactions_retried(),
            transactions_aborted: self.transactions_aborted(),
            reads: self.reads(),
            writes: self.writes(),
            commutes: self.commutes(),
            ensures: self.ensures(),
            tvars_created: self.tvars_created(),
        }
    }
}

/// A point-in-time snapshot of world statistics.
///
/// Unlike [`WorldStats`], this is a plain struct that can be compared
/// or passed across threads without atomics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transaction attempts started.
    pub attempts_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Attempts abandoned for retry.
    pub transactions_retried: u64,
    /// Transactions aborted by a user error.
    pub transactions_aborted: u64,
    /// Ref reads.
    pub reads: u64,
    /// Staged writes.
    pub writes: u64,
    /// Staged commutes.
    pub commutes: u64,
    /// Ensure calls.
    pub ensures: u64,
    /// Refs created.
    pub tvars_created: u64,
}
