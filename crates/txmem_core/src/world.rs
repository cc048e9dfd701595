//! The runtime driver.
//!
//! A [`World`] owns the shared state of one STM universe: the global
//! write-point counter, the single commit lock, the configuration, and
//! the statistics. [`World::run`] drives a transaction body to
//! commit: it installs a fresh transaction in the thread's
//! active-transaction slot, executes the body, and performs the
//! validate / re-commute / publish protocol under the commit lock,
//! retrying from a fresh snapshot whenever the attempt conflicts.
//!
//! Worlds are independent: commits in one world never conflict with
//! another. Most programs use the lazily-created process-wide default
//! world via [`TVar::new`](crate::TVar::new) and the free [`run`];
//! separate worlds are mainly useful to isolate tests.

use crate::config::Config;
use crate::error::{TxError, TxResult};
use crate::stats::WorldStats;
use crate::transaction::Transaction;
use crate::types::WritePoint;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared state of one world.
pub(crate) struct WorldState {
    /// The global write-point counter. Bumped under the commit lock by
    /// every commit that publishes at least one ref.
    pub(crate) write_point: AtomicU64,
    /// Ref id allocator.
    pub(crate) next_ref_id: AtomicU64,
    pub(crate) config: Config,
    pub(crate) stats: WorldStats,
    /// Serializes the validate / re-commute / publish sequence across
    /// all committers of this world.
    commit_lock: Mutex<()>,
}

thread_local! {
    /// The calling thread's active transaction, if any. Consulted by
    /// every ref operation to decide between transactional and bare
    /// semantics. The driver keeps its own handle to the transaction,
    /// so the slot is a shared view, not the owner.
    static ACTIVE: RefCell<Option<Rc<RefCell<Transaction>>>> = const { RefCell::new(None) };
}

/// Runs `f` with the thread's active transaction, if any.
pub(crate) fn with_active<R>(f: impl FnOnce(Option<&mut Transaction>) -> R) -> R {
    ACTIVE.with(|slot| match slot.borrow().as_ref() {
        Some(tx) => f(Some(&mut *tx.borrow_mut())),
        None => f(None),
    })
}

/// Returns `true` if the calling thread's active transaction belongs
/// to `state`. False when there is no active transaction.
fn active_belongs_to(state: &Arc<WorldState>) -> bool {
    with_active(|tx| tx.is_some_and(|tx| Arc::ptr_eq(tx.world(), state)))
}

/// Returns `true` if the calling thread has an active transaction.
pub(crate) fn has_active() -> bool {
    ACTIVE.with(|slot| slot.borrow().is_some())
}

/// Scope guard for the active-transaction slot. Dropping it clears the
/// slot, so a panic in the body cannot leave a stale transaction
/// installed on the thread.
struct TxScope;

impl TxScope {
    fn install(tx: Rc<RefCell<Transaction>>) -> Self {
        ACTIVE.with(|slot| *slot.borrow_mut() = Some(tx));
        Self
    }
}

impl Drop for TxScope {
    fn drop(&mut self) {
        ACTIVE.with(|slot| slot.borrow_mut().take());
    }
}

/// An STM universe: write-point counter, commit lock, configuration,
/// statistics.
///
/// `World` is a cheap cloneable handle; clones share the same state.
#[derive(Clone)]
pub struct World {
    state: Arc<WorldState>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates a world with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a world with the given configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            state: Arc::new(WorldState {
                write_point: AtomicU64::new(0),
                next_ref_id: AtomicU64::new(0),
                config,
                stats: WorldStats::new(),
                commit_lock: Mutex::new(()),
            }),
        }
    }

    /// Returns the process-wide default world.
    pub fn global() -> &'static World {
        static GLOBAL: OnceLock<World> = OnceLock::new();
        GLOBAL.get_or_init(World::new)
    }

    /// Returns the current global write point.
    #[must_use]
    pub fn write_point(&self) -> WritePoint {
        WritePoint::new(self.state.write_point.load(Ordering::SeqCst))
    }

    /// Returns this world's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Returns this world's statistics.
    #[must_use]
    pub fn stats(&self) -> &WorldStats {
        &self.state.stats
    }

    pub(crate) fn state(&self) -> &Arc<WorldState> {
        &self.state
    }

    /// Runs `body` as a transaction and returns its value.
    ///
    /// The body is re-run from a fresh snapshot whenever the attempt
    /// must retry: a snapshot read aged out of a ref's history, or
    /// commit validation found a written-or-ensured ref moved past the
    /// read point. It must therefore be free of side effects other
    /// than tvar operations. There is no bounded retry count.
    ///
    /// Any non-retry error from the body aborts the transaction and
    /// propagates unchanged; nothing is published.
    ///
    /// If the calling thread already has an active transaction of this
    /// world, the body joins it: it runs directly against the enclosing
    /// working set and no separate commit happens. Entering a `run` of
    /// a *different* world inside a transaction fails with
    /// [`TxError::WorldMismatch`].
    pub fn run<T, F>(&self, mut body: F) -> TxResult<T>
    where
        F: FnMut() -> TxResult<T>,
    {
        if has_active() {
            if !active_belongs_to(&self.state) {
                return Err(TxError::WorldMismatch { op: "run" });
            }
            return body();
        }

        loop {
            let read_point = self.write_point();
            self.state.stats.record_attempt_start();
            tracing::trace!(read_point = read_point.as_u64(), "transaction attempt");

            // The driver keeps its own handle; the thread-local slot
            // only lends the transaction to ref operations and is
            // cleared by the guard on every exit path.
            let tx = Rc::new(RefCell::new(Transaction::new(
                Arc::clone(&self.state),
                read_point,
            )));
            let scope = TxScope::install(Rc::clone(&tx));
            let outcome = body();
            drop(scope);

            let err = match outcome {
                Ok(value) => match self.commit(&mut *tx.borrow_mut()) {
                    Ok(()) => {
                        self.state.stats.record_commit();
                        return Ok(value);
                    }
                    Err(err) => err,
                },
                Err(err) => err,
            };

            if err.is_retry() {
                self.state.stats.record_retry();
                continue;
            }
            self.state.stats.record_abort();
            return Err(err);
        }
    }

    /// The commit protocol. Everything between validation and the
    /// write-point bump happens under the commit lock and is therefore
    /// atomic with respect to every other commit in this world.
    fn commit(&self, tx: &mut Transaction) -> TxResult<()> {
        // Read-only fast path: nothing to validate, nothing to publish.
        if tx.is_read_only() {
            return Ok(());
        }

        let _guard = self.state.commit_lock.lock();
        tx.validate()?;
        tx.reapply_commutes();

        if tx.has_effects() {
            let next = self.write_point().next();
            tx.publish(next);
            // Heads are published before the bump, so a transaction
            // beginning at the post-bump point finds every new head
            // stamped with exactly that point. An ensure-only commit
            // never reaches here: it validates but publishes nothing.
            self.state.write_point.store(next.as_u64(), Ordering::SeqCst);
            tracing::trace!(write_point = next.as_u64(), "transaction published");
        }
        Ok(())
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("write_point", &self.write_point())
            .field("max_history", &self.state.config.max_history)
            .finish_non_exhaustive()
    }
}

/// Runs `body` as a transaction in the process-wide default world.
///
/// See [`World::run`].
pub fn run<T, F>(body: F) -> TxResult<T>
where
    F: FnMut() -> TxResult<T>,
{
    World::global().run(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TVar, TxError};
    use std::thread;

    #[test]
    fn run_commits_a_write() {
        let world = World::new();
        let tvar = TVar::new_in(&world, 1i64);

        world.run(|| tvar.write(2)).unwrap();

        assert_eq!(tvar.read().unwrap(), 2);
        assert_eq!(world.write_point(), WritePoint::new(1));
        assert_eq!(world.stats().transactions_committed(), 1);
    }

    #[test]
    fn read_only_run_does_not_bump_write_point() {
        let world = World::new();
        let tvar = TVar::new_in(&world, 1i64);

        let value = world.run(|| tvar.read()).unwrap();

        assert_eq!(value, 1);
        assert_eq!(world.write_point(), WritePoint::new(0));
    }

    #[test]
    fn ensure_only_run_does_not_bump_write_point() {
        let world = World::new();
        let tvar = TVar::new_in(&world, 1i64);

        world.run(|| tvar.ensure()).unwrap();

        assert_eq!(world.write_point(), WritePoint::new(0));
        assert_eq!(world.stats().transactions_committed(), 1);
    }

    #[test]
    fn user_error_aborts_without_publishing() {
        let world = World::new();
        let tvar = TVar::new_in(&world, 1i64);

        let result: TxResult<()> = world.run(|| {
            tvar.write(99)?;
            Err(TxError::aborted("nope"))
        });

        assert_eq!(result, Err(TxError::aborted("nope")));
        assert_eq!(tvar.read().unwrap(), 1);
        assert_eq!(world.write_point(), WritePoint::new(0));
        assert_eq!(world.stats().transactions_aborted(), 1);
    }

    #[test]
    fn nested_run_shares_the_outer_transaction() {
        let world = World::new();
        let tvar = TVar::new_in(&world, 0i64);

        world
            .run(|| {
                tvar.write(7)?;
                // The inner body sees the outer working set.
                let inner = world.run(|| tvar.read())?;
                assert_eq!(inner, 7);
                Ok(())
            })
            .unwrap();

        // One commit for the whole nest.
        assert_eq!(world.write_point(), WritePoint::new(1));
        assert_eq!(world.stats().transactions_committed(), 1);
    }

    #[test]
    fn nested_run_rejects_a_different_world() {
        let world_a = World::new();
        let world_b = World::new();

        let result: TxResult<()> = world_a.run(|| world_b.run(|| Ok(())));

        assert_eq!(result, Err(TxError::WorldMismatch { op: "run" }));
        // Nothing was published anywhere.
        assert_eq!(world_a.write_point(), WritePoint::new(0));
        assert_eq!(world_b.write_point(), WritePoint::new(0));
    }

    #[test]
    fn conflicting_writers_serialize() {
        let world = World::new();
        let tvar = TVar::new_in(&world, 0i64);
        let threads: i64 = 8;
        let increments: i64 = 50;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let world = world.clone();
                let tvar = tvar.clone();
                thread::spawn(move || {
                    for _ in 0..increments {
                        world.run(|| tvar.modify(|v| v + 1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tvar.read().unwrap(), threads * increments);
        assert_eq!(
            world.write_point().as_u64(),
            (threads * increments) as u64
        );
    }

    #[test]
    fn panic_in_body_clears_the_active_slot() {
        let world = World::new();
        let tvar = TVar::new_in(&world, 1i64);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: TxResult<()> = world.run(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!has_active());

        // The thread can run transactions again.
        world.run(|| tvar.write(2)).unwrap();
        assert_eq!(tvar.read().unwrap(), 2);
    }

    #[test]
    fn global_world_run() {
        let tvar = TVar::new(0i64);
        run(|| tvar.modify(|v| v + 1)).unwrap();
        assert_eq!(tvar.read().unwrap(), 1);
    }
}
