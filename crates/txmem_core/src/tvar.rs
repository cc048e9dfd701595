//! Transactional variables.
//!
//! A [`TVar<T>`] is a mutable cell with a bounded multi-version
//! history. All mutation goes through a transaction run by
//! [`crate::World::run`] (or the free [`crate::run`]); bare reads see
//! the latest committed value.

use crate::error::{TxError, TxResult};
use crate::history::{DynVal, Version, VersionHistory};
use crate::types::{RefId, WritePoint};
use crate::world::{self, World, WorldState};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Untyped interior of a [`TVar`]. The working set and the commit path
/// operate on this type; the concrete value type is recovered at the
/// typed surface.
pub(crate) struct TVarCore {
    pub(crate) id: RefId,
    pub(crate) world: Arc<WorldState>,
    history: RwLock<VersionHistory>,
}

impl TVarCore {
    /// Returns the newest committed version.
    pub(crate) fn latest(&self) -> Version {
        self.history.read().latest().clone()
    }

    /// Returns the newest version visible at `read_point`, if the
    /// history window still holds one.
    pub(crate) fn visible_at(&self, read_point: WritePoint) -> Option<Version> {
        self.history.read().visible_at(read_point).cloned()
    }

    /// Publishes a new version. Called only under the world's commit
    /// lock.
    pub(crate) fn append(&self, value: DynVal, write_point: WritePoint) {
        self.history.write().append(value, write_point);
    }

    fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

/// A mutable cell with versioned history, read and written inside
/// transactions.
///
/// `TVar` is a cheap cloneable handle; clones share the same cell.
/// Values are stored behind an `Arc`, so `T` should be an immutable
/// value type: interior mutability would leak uncommitted state to
/// other transactions.
pub struct TVar<T> {
    core: Arc<TVarCore>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> Clone for TVar<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Clone + Send + Sync> TVar<T> {
    /// Creates a tvar in the process-wide default world.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::new_in(World::global(), value)
    }

    /// Creates a tvar in the given world.
    ///
    /// The initial entry is stamped with the world's current write
    /// point (0 for a fresh world). Transactions may only touch tvars
    /// of their own world; operations on a foreign tvar fail with
    /// [`TxError::WorldMismatch`].
    #[must_use]
    pub fn new_in(world: &World, value: T) -> Self {
        let state = Arc::clone(world.state());
        let id = RefId::new(state.next_ref_id.fetch_add(1, Ordering::SeqCst));
        let write_point = WritePoint::new(state.write_point.load(Ordering::SeqCst));
        let capacity = state.config.max_history;
        state.stats.record_tvar_created();

        Self {
            core: Arc::new(TVarCore {
                id,
                world: state,
                history: RwLock::new(VersionHistory::new(Arc::new(value), write_point, capacity)),
            }),
            _marker: PhantomData,
        }
    }

    /// Reads the tvar.
    ///
    /// Inside a transaction this is a snapshot read with
    /// read-your-writes semantics; it fails with [`TxError::Retry`]
    /// when the snapshot has aged out of the history window (the
    /// driver then re-runs the body). Outside a transaction it returns
    /// the latest committed value and never fails.
    pub fn read(&self) -> TxResult<T> {
        self.core.world.stats.record_read();
        let staged = world::with_active(|tx| match tx {
            Some(tx) => tx.read(&self.core).map(Some),
            None => Ok(None),
        })?;
        let value = match staged {
            Some(value) => value,
            None => self.core.latest().value,
        };
        Ok(downcast::<T>(&value, "read")?.clone())
    }

    /// Stages a write of `value`.
    ///
    /// Fails with [`TxError::NotInTransaction`] outside a transaction
    /// and with [`TxError::WriteAfterCommute`] if this tvar has already
    /// been commuted in the current transaction.
    pub fn write(&self, value: T) -> TxResult<()> {
        world::with_active(|tx| match tx {
            Some(tx) => tx.write(&self.core, Arc::new(value)),
            None => Err(TxError::not_in_transaction("write")),
        })?;
        self.core.world.stats.record_write();
        Ok(())
    }

    /// Reads, applies `f`, and stages the result; returns the new
    /// value. Equivalent to `write(f(&read()?))`.
    pub fn modify<F>(&self, f: F) -> TxResult<T>
    where
        F: FnOnce(&T) -> T,
    {
        if !world::has_active() {
            return Err(TxError::not_in_transaction("modify"));
        }
        let current = self.read()?;
        let updated = f(&current);
        self.write(updated.clone())?;
        Ok(updated)
    }

    /// Stages a commutative update and returns the provisional value.
    ///
    /// `f` must be safe to re-run: at commit time the queued operations
    /// are re-applied, oldest first, against the then-latest committed
    /// value, and commuted-only tvars are exempt from conflict
    /// validation. Concurrent commuters therefore never force each
    /// other to retry, at the price of no ordering between them beyond
    /// commit order.
    ///
    /// The base for the provisional value is the staged value if this
    /// transaction has one, else the latest *committed* value rather
    /// than the snapshot at the read point, so the value returned here
    /// does not obey snapshot consistency. That is deliberate: it is
    /// the value the commit-time re-application will most likely see.
    pub fn commute<F>(&self, f: F) -> TxResult<T>
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        world::with_active(|tx| match tx {
            Some(tx) => tx.check_world(&self.core, "commute"),
            None => Err(TxError::not_in_transaction("commute")),
        })?;

        let base = world::with_active(|tx| tx.and_then(|tx| tx.staged_value(self.core.id)))
            .unwrap_or_else(|| self.core.latest().value);
        let provisional = f(downcast::<T>(&base, "commute")?);
        let staged: DynVal = Arc::new(provisional.clone());

        let op = Arc::new(move |value: &DynVal| -> DynVal {
            // The erased value is always a `T`; anything else passes
            // through untouched.
            match value.downcast_ref::<T>() {
                Some(current) => Arc::new(f(current)),
                None => Arc::clone(value),
            }
        });
        world::with_active(|tx| match tx {
            Some(tx) => tx.commute(&self.core, staged, op),
            None => Err(TxError::not_in_transaction("commute")),
        })?;
        self.core.world.stats.record_commute();
        Ok(provisional)
    }

    /// Adds this tvar to the transaction's validation set without
    /// staging a write.
    ///
    /// The commit then succeeds only if the tvar's head has not
    /// advanced past the transaction's read point, which rules out
    /// write skew between transactions that read overlapping state.
    pub fn ensure(&self) -> TxResult<()> {
        world::with_active(|tx| match tx {
            Some(tx) => tx.ensure(&self.core),
            None => Err(TxError::not_in_transaction("ensure")),
        })?;
        self.core.world.stats.record_ensure();
        Ok(())
    }

    /// Returns this tvar's id.
    #[must_use]
    pub fn id(&self) -> RefId {
        self.core.id
    }

    /// Number of currently retained versions. Diagnostic; bounded by
    /// the world's `max_history`.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.core.history_len()
    }

    pub(crate) fn core(&self) -> &Arc<TVarCore> {
        &self.core
    }
}

impl<T: Any + Clone + Send + Sync> fmt::Debug for TVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TVar")
            .field("id", &self.core.id)
            .field("head", &self.core.latest().write_point)
            .finish_non_exhaustive()
    }
}

/// Recovers the concrete value type. A tvar's value type is fixed at
/// construction and ref ids are never shared across worlds, so every
/// reachable path hands this a `T`; a mismatch is reported as an
/// error rather than unwrapped.
fn downcast<'a, T: Any>(value: &'a DynVal, op: &'static str) -> TxResult<&'a T> {
    let recovered = value.downcast_ref::<T>();
    debug_assert!(
        recovered.is_some(),
        "tvar value type is fixed at construction"
    );
    recovered.ok_or(TxError::WorldMismatch { op })
}
