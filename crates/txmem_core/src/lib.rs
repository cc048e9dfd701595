//! # txmem
//!
//! Software transactional memory built on multi-version refs.
//!
//! Application code groups reads and writes of [`TVar`]s into atomic
//! transactions driven by [`run`] (or [`World::run`]): a transaction
//! either commits all of its effects at a single point on the global
//! commit timeline or is retried from a fresh snapshot, and readers
//! never observe partial effects of other transactions.
//!
//! Each tvar keeps a bounded history of committed versions so that a
//! transaction reads a consistent snapshot as of the write point it
//! started at. Commits are serialized by a single per-world lock:
//! simple to reason about, at the cost of commit throughput.
//!
//! ```
//! use txmem_core::{run, TVar};
//!
//! let from = TVar::new(100i64);
//! let to = TVar::new(0i64);
//!
//! run(|| {
//!     from.modify(|v| v - 10)?;
//!     to.modify(|v| v + 10)?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert_eq!(from.read().unwrap(), 90);
//! assert_eq!(to.read().unwrap(), 10);
//! ```
//!
//! Contention-tolerant counters and accumulators can use
//! [`TVar::commute`], which concurrent committers re-apply in commit
//! order instead of conflicting; [`TVar::ensure`] pulls a read-only
//! dependency into conflict validation to rule out write skew.
//!
//! Transaction bodies may be re-run, so they must not have side
//! effects beyond tvar operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod history;
mod stats;
mod transaction;
mod tvar;
mod types;
mod world;

pub use config::{Config, DEFAULT_MAX_HISTORY};
pub use error::{TxError, TxResult};
pub use stats::{StatsSnapshot, WorldStats};
pub use tvar::TVar;
pub use types::{RefId, WritePoint};
pub use world::{run, World};
