//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random counter programs and a
//! sequential model to execute them against.

use proptest::prelude::*;
use txmem_core::{TVar, TxResult};

/// One operation of a counter program.
#[derive(Debug, Clone, Copy)]
pub enum CounterOp {
    /// Replace the counter.
    Write(i64),
    /// Read-modify-write add.
    Add(i64),
    /// Commutative add.
    CommuteAdd(i64),
}

/// Strategy for a single counter operation.
pub fn counter_op_strategy() -> impl Strategy<Value = CounterOp> {
    prop_oneof![
        (-1_000i64..=1_000).prop_map(CounterOp::Write),
        (-100i64..=100).prop_map(CounterOp::Add),
        (-100i64..=100).prop_map(CounterOp::CommuteAdd),
    ]
}

/// Strategy for a counter program of up to `max_len` operations.
pub fn counter_program_strategy(max_len: usize) -> impl Strategy<Value = Vec<CounterOp>> {
    prop::collection::vec(counter_op_strategy(), 0..max_len)
}

/// Strategy for small history capacities.
pub fn history_capacity_strategy() -> impl Strategy<Value = usize> {
    1usize..8
}

/// Applies one operation to a model value.
#[must_use]
pub fn apply_to_model(op: CounterOp, value: i64) -> i64 {
    match op {
        CounterOp::Write(n) => n,
        CounterOp::Add(n) | CounterOp::CommuteAdd(n) => value + n,
    }
}

/// Runs one operation against a tvar inside the active transaction.
pub fn apply_to_tvar(op: CounterOp, tvar: &TVar<i64>) -> TxResult<()> {
    match op {
        CounterOp::Write(n) => tvar.write(n),
        CounterOp::Add(n) => tvar.modify(|v| v + n).map(|_| ()),
        CounterOp::CommuteAdd(n) => tvar.commute(move |v| v + n).map(|_| ()),
    }
}
