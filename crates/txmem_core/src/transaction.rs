//! Per-attempt transaction state.
//!
//! A [`Transaction`] is the working set of a single attempt at running
//! a transaction body: the snapshot read point, the values the attempt
//! would publish, and the refs it has ensured. It is created by the
//! runtime driver, mutated only from the thread executing the body,
//! and discarded on commit or retry.

use crate::error::{TxError, TxResult};
use crate::history::DynVal;
use crate::tvar::TVarCore;
use crate::types::{RefId, WritePoint};
use crate::world::WorldState;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A deferred commute operation, re-applied at commit time against the
/// then-latest committed value.
pub(crate) type CommuteFn = Arc<dyn Fn(&DynVal) -> DynVal + Send + Sync>;

/// The in-transaction state of one ref.
pub(crate) enum TxSlot {
    /// Cached snapshot value from the first read. Not validated and
    /// not published.
    Read(DynVal),
    /// Value staged by `write` or `modify`. Validated against the read
    /// point at commit and published as-is.
    Written(DynVal),
    /// Provisional value produced by `commute`, plus the operations to
    /// re-apply at commit against the latest committed value. Not
    /// validated.
    Commuted {
        value: DynVal,
        ops: Vec<CommuteFn>,
    },
}

impl TxSlot {
    fn value(&self) -> &DynVal {
        match self {
            Self::Read(value) | Self::Written(value) => value,
            Self::Commuted { value, .. } => value,
        }
    }
}

struct TxEntry {
    tvar: Arc<TVarCore>,
    slot: TxSlot,
}

/// Working set of a single transaction attempt.
pub(crate) struct Transaction {
    world: Arc<WorldState>,
    read_point: WritePoint,
    slots: HashMap<RefId, TxEntry>,
    ensured: HashMap<RefId, Arc<TVarCore>>,
}

impl Transaction {
    pub(crate) fn new(world: Arc<WorldState>, read_point: WritePoint) -> Self {
        Self {
            world,
            read_point,
            slots: HashMap::new(),
            ensured: HashMap::new(),
        }
    }

    pub(crate) fn world(&self) -> &Arc<WorldState> {
        &self.world
    }

    /// Transactional read: the staged value if this attempt has one,
    /// otherwise the newest committed version visible at the read
    /// point, cached for repeat reads. Fails with [`TxError::Retry`]
    /// when the snapshot has aged out of the ref's history window.
    pub(crate) fn read(&mut self, tvar: &Arc<TVarCore>) -> TxResult<DynVal> {
        self.check_world(tvar, "read")?;
        if let Some(entry) = self.slots.get(&tvar.id) {
            return Ok(entry.slot.value().clone());
        }

        let Some(version) = tvar.visible_at(self.read_point) else {
            tracing::debug!(
                tvar = %tvar.id,
                read_point = self.read_point.as_u64(),
                "snapshot aged out of history window"
            );
            return Err(TxError::Retry);
        };
        let value = version.value.clone();
        self.slots.insert(
            tvar.id,
            TxEntry {
                tvar: Arc::clone(tvar),
                slot: TxSlot::Read(value.clone()),
            },
        );
        Ok(value)
    }

    /// Stages a write. Fails with [`TxError::WriteAfterCommute`] when
    /// the ref has already been commuted in this attempt.
    pub(crate) fn write(&mut self, tvar: &Arc<TVarCore>, value: DynVal) -> TxResult<()> {
        self.check_world(tvar, "write")?;
        match self.slots.get_mut(&tvar.id) {
            Some(entry) => {
                if matches!(entry.slot, TxSlot::Commuted { .. }) {
                    return Err(TxError::WriteAfterCommute { tvar: tvar.id });
                }
                entry.slot = TxSlot::Written(value);
            }
            None => {
                self.slots.insert(
                    tvar.id,
                    TxEntry {
                        tvar: Arc::clone(tvar),
                        slot: TxSlot::Written(value),
                    },
                );
            }
        }
        Ok(())
    }

    /// Returns the staged value for `id`, if any. Used by `commute` to
    /// pick its base without disturbing the slot.
    pub(crate) fn staged_value(&self, id: RefId) -> Option<DynVal> {
        self.slots.get(&id).map(|entry| entry.slot.value().clone())
    }

    /// Records a commute: stores the provisional value and queues the
    /// operation for commit-time re-application.
    ///
    /// On a write-staged ref the provisional value simply replaces the
    /// staged value and no operation is queued: the ref stays in the
    /// validated write set, and commit re-applies commutes only to refs
    /// outside it.
    pub(crate) fn commute(
        &mut self,
        tvar: &Arc<TVarCore>,
        provisional: DynVal,
        op: CommuteFn,
    ) -> TxResult<()> {
        self.check_world(tvar, "commute")?;
        match self.slots.get_mut(&tvar.id) {
            Some(entry) => match &mut entry.slot {
                TxSlot::Written(value) => *value = provisional,
                TxSlot::Commuted { value, ops } => {
                    *value = provisional;
                    ops.push(op);
                }
                slot @ TxSlot::Read(_) => {
                    *slot = TxSlot::Commuted {
                        value: provisional,
                        ops: vec![op],
                    };
                }
            },
            None => {
                self.slots.insert(
                    tvar.id,
                    TxEntry {
                        tvar: Arc::clone(tvar),
                        slot: TxSlot::Commuted {
                            value: provisional,
                            ops: vec![op],
                        },
                    },
                );
            }
        }
        Ok(())
    }

    /// Adds the ref to the ensured set: its head must not have advanced
    /// past the read point at commit time. Staged values are untouched.
    pub(crate) fn ensure(&mut self, tvar: &Arc<TVarCore>) -> TxResult<()> {
        self.check_world(tvar, "ensure")?;
        self.ensured
            .entry(tvar.id)
            .or_insert_with(|| Arc::clone(tvar));
        Ok(())
    }

    /// True when committing would publish nothing and validate nothing:
    /// no staged writes or commutes, and no ensured refs.
    pub(crate) fn is_read_only(&self) -> bool {
        self.ensured.is_empty() && !self.has_effects()
    }

    /// True when at least one ref has a staged write or commute.
    pub(crate) fn has_effects(&self) -> bool {
        self.slots
            .values()
            .any(|entry| !matches!(entry.slot, TxSlot::Read(_)))
    }

    /// Commit validation: every written or ensured ref must not have a
    /// head newer than the read point. Commuted-but-not-written refs
    /// are exempt. Called under the commit lock.
    pub(crate) fn validate(&self) -> TxResult<()> {
        let written = self
            .slots
            .values()
            .filter(|entry| matches!(entry.slot, TxSlot::Written(_)))
            .map(|entry| &entry.tvar);
        for tvar in written.chain(self.ensured.values()) {
            let head = tvar.latest().write_point;
            if head > self.read_point {
                tracing::debug!(
                    tvar = %tvar.id,
                    head = head.as_u64(),
                    read_point = self.read_point.as_u64(),
                    "commit conflict"
                );
                return Err(TxError::Retry);
            }
        }
        Ok(())
    }

    /// Re-applies queued commute operations, oldest first, against each
    /// ref's latest committed value. Called under the commit lock,
    /// after validation.
    pub(crate) fn reapply_commutes(&mut self) {
        for entry in self.slots.values_mut() {
            let TxEntry { tvar, slot } = entry;
            if let TxSlot::Commuted { value, ops } = slot {
                let mut current = tvar.latest().value;
                for op in ops.iter() {
                    current = op(&current);
                }
                *value = current;
            }
        }
    }

    /// Publishes every staged write and commute at `write_point`.
    /// Called under the commit lock.
    pub(crate) fn publish(&self, write_point: WritePoint) {
        for entry in self.slots.values() {
            match &entry.slot {
                TxSlot::Written(value) | TxSlot::Commuted { value, .. } => {
                    entry.tvar.append(value.clone(), write_point);
                }
                TxSlot::Read(_) => {}
            }
        }
    }

    /// Rejects tvars that belong to another world. Ref ids are only
    /// unique within one world, so letting a foreign tvar into the
    /// working set could silently collide with an unrelated slot.
    pub(crate) fn check_world(&self, tvar: &Arc<TVarCore>, op: &'static str) -> TxResult<()> {
        if Arc::ptr_eq(&self.world, &tvar.world) {
            Ok(())
        } else {
            Err(TxError::WorldMismatch { op })
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("read_point", &self.read_point)
            .field("slots", &self.slots.len())
            .field("ensured", &self.ensured.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;
    use crate::TVar;

    fn fixture() -> (World, TVar<i64>, Transaction) {
        let world = World::new();
        let tvar = TVar::new_in(&world, 10i64);
        let tx = Transaction::new(world.state().clone(), world.write_point());
        (world, tvar, tx)
    }

    fn as_i64(value: &DynVal) -> i64 {
        *value.downcast_ref::<i64>().unwrap()
    }

    #[test]
    fn read_caches_snapshot() {
        let (_world, tvar, mut tx) = fixture();
        let value = tx.read(tvar.core()).unwrap();
        assert_eq!(as_i64(&value), 10);
        assert!(tx.staged_value(tvar.id()).is_some());
        assert!(tx.is_read_only());
    }

    #[test]
    fn write_overwrites_read_cache() {
        let (_world, tvar, mut tx) = fixture();
        tx.read(tvar.core()).unwrap();
        tx.write(tvar.core(), Arc::new(42i64)).unwrap();

        assert_eq!(as_i64(&tx.read(tvar.core()).unwrap()), 42);
        assert!(tx.has_effects());
    }

    #[test]
    fn write_after_commute_rejected() {
        let (_world, tvar, mut tx) = fixture();
        let op: CommuteFn = Arc::new(|v| Arc::new(as_i64(v) + 1));
        tx.commute(tvar.core(), Arc::new(11i64), op).unwrap();

        let err = tx.write(tvar.core(), Arc::new(0i64)).unwrap_err();
        assert_eq!(err, TxError::WriteAfterCommute { tvar: tvar.id() });
    }

    #[test]
    fn commute_after_write_folds_into_write() {
        let (_world, tvar, mut tx) = fixture();
        tx.write(tvar.core(), Arc::new(5i64)).unwrap();
        let op: CommuteFn = Arc::new(|v| Arc::new(as_i64(v) * 2));
        tx.commute(tvar.core(), Arc::new(10i64), op).unwrap();

        // Slot stays write-staged: validated at commit, ops not queued.
        assert_eq!(as_i64(&tx.read(tvar.core()).unwrap()), 10);
        tx.reapply_commutes();
        assert_eq!(as_i64(&tx.staged_value(tvar.id()).unwrap()), 10);
    }

    #[test]
    fn ensure_does_not_stage_a_value() {
        let (_world, tvar, mut tx) = fixture();
        tx.ensure(tvar.core()).unwrap();
        assert!(tx.staged_value(tvar.id()).is_none());
        assert!(!tx.is_read_only());
        assert!(!tx.has_effects());
    }

    #[test]
    fn foreign_world_tvar_rejected() {
        let (_world, _tvar, mut tx) = fixture();
        let other = World::new();
        let foreign = TVar::new_in(&other, 0i64);

        assert_eq!(
            tx.write(foreign.core(), Arc::new(1i64)),
            Err(TxError::WorldMismatch { op: "write" })
        );
        assert_eq!(
            tx.ensure(foreign.core()),
            Err(TxError::WorldMismatch { op: "ensure" })
        );
        assert!(tx.is_read_only());
    }

    #[test]
    fn validate_detects_advanced_head() {
        let (world, tvar, mut tx) = fixture();
        tx.write(tvar.core(), Arc::new(1i64)).unwrap();

        // Another committer moves the head past our read point.
        world.run(|| tvar.write(99)).unwrap();

        assert_eq!(tx.validate(), Err(TxError::Retry));
    }

    #[test]
    fn commuted_refs_skip_validation() {
        let (world, tvar, mut tx) = fixture();
        let op: CommuteFn = Arc::new(|v| Arc::new(as_i64(v) + 1));
        tx.commute(tvar.core(), Arc::new(11i64), op).unwrap();

        world.run(|| tvar.write(100)).unwrap();

        assert_eq!(tx.validate(), Ok(()));
        tx.reapply_commutes();
        assert_eq!(as_i64(&tx.staged_value(tvar.id()).unwrap()), 101);
    }
}
