//! Bounded version history for a single ref.

use crate::types::WritePoint;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Type-erased ref value. Typed access is recovered at the `TVar<T>`
/// surface; within a ref the concrete type is fixed at construction.
pub(crate) type DynVal = Arc<dyn Any + Send + Sync>;

/// One committed version of a ref.
#[derive(Clone)]
pub(crate) struct Version {
    /// The committed value.
    pub value: DynVal,
    /// The commit that produced it.
    pub write_point: WritePoint,
}

/// Versions of a single ref, newest first, capped at a fixed capacity.
///
/// The head is the current globally-visible value; older entries exist
/// only to serve in-flight readers with earlier read points. Entry
/// write points strictly decrease from head to tail.
pub(crate) struct VersionHistory {
    entries: VecDeque<Version>,
    capacity: usize,
}

impl VersionHistory {
    /// Creates a history with a single initial entry.
    pub fn new(value: DynVal, write_point: WritePoint, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries = VecDeque::with_capacity(capacity);
        entries.push_front(Version { value, write_point });
        Self { entries, capacity }
    }

    /// Returns the newest entry. A history is never empty.
    pub fn latest(&self) -> &Version {
        &self.entries[0]
    }

    /// Returns the newest entry visible at `read_point`, or `None` if
    /// every retained entry is newer (the snapshot has fallen off the
    /// back of the window).
    pub fn visible_at(&self, read_point: WritePoint) -> Option<&Version> {
        self.entries
            .iter()
            .find(|entry| entry.write_point <= read_point)
    }

    /// Prepends a new entry, dropping the oldest when at capacity.
    /// Called only under the world's commit lock.
    pub fn append(&mut self, value: DynVal, write_point: WritePoint) {
        debug_assert!(write_point > self.latest().write_point);
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(Version { value, write_point });
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Configured capacity.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for VersionHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionHistory")
            .field("capacity", &self.capacity)
            .field(
                "write_points",
                &self
                    .entries
                    .iter()
                    .map(|e| e.write_point.as_u64())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(n: i64) -> DynVal {
        Arc::new(n)
    }

    fn as_i64(version: &Version) -> i64 {
        *version.value.downcast_ref::<i64>().unwrap()
    }

    #[test]
    fn new_has_single_entry() {
        let history = VersionHistory::new(val(7), WritePoint::new(0), 10);
        assert_eq!(history.len(), 1);
        assert_eq!(as_i64(history.latest()), 7);
        assert_eq!(history.latest().write_point, WritePoint::new(0));
    }

    #[test]
    fn append_prepends() {
        let mut history = VersionHistory::new(val(1), WritePoint::new(0), 10);
        history.append(val(2), WritePoint::new(1));
        history.append(val(3), WritePoint::new(2));

        assert_eq!(history.len(), 3);
        assert_eq!(as_i64(history.latest()), 3);
    }

    #[test]
    fn append_drops_oldest_at_capacity() {
        let mut history = VersionHistory::new(val(0), WritePoint::new(0), 3);
        for i in 1..=5u64 {
            history.append(val(i as i64), WritePoint::new(i));
        }

        assert_eq!(history.len(), 3);
        assert_eq!(as_i64(history.latest()), 5);
        // Entries 0..=2 have been dropped.
        assert!(history.visible_at(WritePoint::new(2)).is_none());
    }

    #[test]
    fn visible_at_returns_newest_not_after() {
        let mut history = VersionHistory::new(val(0), WritePoint::new(0), 10);
        history.append(val(10), WritePoint::new(3));
        history.append(val(20), WritePoint::new(6));

        assert_eq!(as_i64(history.visible_at(WritePoint::new(0)).unwrap()), 0);
        assert_eq!(as_i64(history.visible_at(WritePoint::new(4)).unwrap()), 10);
        assert_eq!(as_i64(history.visible_at(WritePoint::new(6)).unwrap()), 20);
        assert_eq!(as_i64(history.visible_at(WritePoint::new(99)).unwrap()), 20);
    }

    #[test]
    fn capacity_clamped_to_one() {
        let history = VersionHistory::new(val(1), WritePoint::new(0), 0);
        assert_eq!(history.capacity(), 1);
    }
}
