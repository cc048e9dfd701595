//! Stress workloads for the STM runtime.
//!
//! These drivers hammer a world from multiple threads and report how
//! many transactions committed, retried, and aborted, so tests can
//! assert both the workload invariant and the conflict behavior.

use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};
use txmem_core::{StatsSnapshot, TVar, World};

/// Configuration for stress workloads.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Operations performed by each thread.
    pub ops_per_thread: usize,
    /// Number of distinct accounts (bank workloads).
    pub accounts: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            ops_per_thread: 1_000,
            accounts: 16,
        }
    }
}

/// Result of a stress workload run.
#[derive(Debug, Clone)]
pub struct StressOutcome {
    /// Transactions committed in the world during the run.
    pub committed: u64,
    /// Attempts abandoned for retry.
    pub retried: u64,
    /// Transactions aborted by a user error.
    pub aborted: u64,
    /// Workload checksum: final counter value or summed balances.
    pub total: i64,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Committed transactions per second.
    pub commits_per_second: f64,
}

impl StressOutcome {
    fn new(before: StatsSnapshot, after: StatsSnapshot, total: i64, duration: Duration) -> Self {
        let committed = after.transactions_committed - before.transactions_committed;
        let commits_per_second = if duration.as_secs_f64() > 0.0 {
            committed as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            committed,
            retried: after.transactions_retried - before.transactions_retried,
            aborted: after.transactions_aborted - before.transactions_aborted,
            total,
            duration,
            commits_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Committed: {}", self.committed);
        println!("Retried: {}", self.retried);
        println!("Aborted: {}", self.aborted);
        println!("Checksum: {}", self.total);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} commits/sec", self.commits_per_second);
    }
}

/// Concurrent counter increments via `commute`.
///
/// Every thread commutes `+1` on a shared counter. Commute-only
/// transactions are exempt from conflict validation, so the outcome
/// should show zero retries and a total of `threads * ops_per_thread`.
pub fn stress_commute_counter(world: &World, config: &StressConfig) -> StressOutcome {
    let counter = TVar::new_in(world, 0i64);
    let before = world.stats().snapshot();
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            let counter = &counter;
            scope.spawn(move || {
                for _ in 0..config.ops_per_thread {
                    world.run(|| counter.commute(|v| v + 1)).unwrap();
                }
            });
        }
    });

    let total = counter.read().unwrap();
    StressOutcome::new(before, world.stats().snapshot(), total, start.elapsed())
}

/// Concurrent counter increments via `modify`.
///
/// All threads read-modify-write the same counter, so attempts
/// conflict and retry, but no increment may be lost: the total is
/// still `threads * ops_per_thread`.
pub fn stress_modify_counter(world: &World, config: &StressConfig) -> StressOutcome {
    let counter = TVar::new_in(world, 0i64);
    let before = world.stats().snapshot();
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            let counter = &counter;
            scope.spawn(move || {
                for _ in 0..config.ops_per_thread {
                    world.run(|| counter.modify(|v| v + 1)).unwrap();
                }
            });
        }
    });

    let total = counter.read().unwrap();
    StressOutcome::new(before, world.stats().snapshot(), total, start.elapsed())
}

/// Randomized transfers between accounts.
///
/// Each operation moves a random amount between two random accounts
/// when the source can cover it. Whatever the interleaving, the summed
/// balance must equal `accounts * 100`.
pub fn stress_bank_transfers(world: &World, config: &StressConfig) -> StressOutcome {
    let accounts: Vec<TVar<i64>> = (0..config.accounts)
        .map(|_| TVar::new_in(world, 100i64))
        .collect();
    let before = world.stats().snapshot();
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            let accounts = &accounts;
            scope.spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..config.ops_per_thread {
                    let from = rng.gen_range(0..accounts.len());
                    let mut to = rng.gen_range(0..accounts.len());
                    if to == from {
                        to = (to + 1) % accounts.len();
                    }
                    let amount = rng.gen_range(1..=10i64);

                    world
                        .run(|| {
                            let balance = accounts[from].read()?;
                            if balance >= amount {
                                accounts[from].write(balance - amount)?;
                                accounts[to].modify(|v| v + amount)?;
                            }
                            Ok(())
                        })
                        .unwrap();
                }
            });
        }
    });

    let total = accounts.iter().map(|a| a.read().unwrap()).sum();
    StressOutcome::new(before, world.stats().snapshot(), total, start.elapsed())
}

/// Mixed read/increment workload.
///
/// Every fifth operation increments a shared counter via `commute`;
/// the rest are read-only transactions that check the counter never
/// moves backwards from the reader's point of view.
pub fn stress_read_write_mix(world: &World, config: &StressConfig) -> StressOutcome {
    let counter = TVar::new_in(world, 0i64);
    let before = world.stats().snapshot();
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            let counter = &counter;
            scope.spawn(move || {
                let mut last_seen = 0i64;
                for op in 0..config.ops_per_thread {
                    if op % 5 == 0 {
                        world.run(|| counter.commute(|v| v + 1)).unwrap();
                    } else {
                        let seen = world.run(|| counter.read()).unwrap();
                        assert!(seen >= last_seen, "counter moved backwards");
                        last_seen = seen;
                    }
                }
            });
        }
    });

    let total = counter.read().unwrap();
    StressOutcome::new(before, world.stats().snapshot(), total, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> StressConfig {
        StressConfig {
            threads: 4,
            ops_per_thread: 250,
            accounts: 8,
        }
    }

    #[test]
    fn commute_counter_is_exact_and_conflict_free() {
        let world = World::new();
        let config = quick_config();

        let outcome = stress_commute_counter(&world, &config);

        assert_eq!(outcome.total, (config.threads * config.ops_per_thread) as i64);
        assert_eq!(outcome.retried, 0);
        assert_eq!(outcome.aborted, 0);
    }

    #[test]
    fn modify_counter_loses_no_increments() {
        let world = World::new();
        let config = quick_config();

        let outcome = stress_modify_counter(&world, &config);

        assert_eq!(outcome.total, (config.threads * config.ops_per_thread) as i64);
        assert_eq!(outcome.aborted, 0);
        assert_eq!(
            outcome.committed,
            (config.threads * config.ops_per_thread) as u64
        );
    }

    #[test]
    fn bank_transfers_conserve_balance() {
        let world = World::new();
        let config = quick_config();

        let outcome = stress_bank_transfers(&world, &config);

        assert_eq!(outcome.total, (config.accounts * 100) as i64);
        assert_eq!(outcome.aborted, 0);
    }

    #[test]
    fn read_write_mix_counts_every_increment() {
        let world = World::new();
        let config = quick_config();

        let outcome = stress_read_write_mix(&world, &config);

        let increments_per_thread = config.ops_per_thread.div_ceil(5);
        assert_eq!(
            outcome.total,
            (config.threads * increments_per_thread) as i64
        );
        assert_eq!(outcome.aborted, 0);
    }
}
