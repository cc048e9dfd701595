//! Error types for the txmem runtime.

use crate::types::RefId;
use thiserror::Error;

/// Result type for transactional operations.
pub type TxResult<T> = Result<T, TxError>;

/// Errors that can occur in transactional operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// The current attempt must be abandoned and the body re-run
    /// against a fresh snapshot.
    ///
    /// Raised by a transactional read whose snapshot has aged out of a
    /// ref's bounded history, and by commit validation when a
    /// written-or-ensured ref has advanced past the transaction's read
    /// point. This is control flow, not a failure: [`crate::World::run`]
    /// consumes it and starts a new attempt, so it never escapes `run`.
    /// Propagate it with `?` inside a transaction body.
    #[error("transaction conflict, retry required")]
    Retry,

    /// A mutating ref operation was attempted with no active
    /// transaction on the calling thread.
    #[error("{op} requires an active transaction")]
    NotInTransaction {
        /// The operation that was attempted.
        op: &'static str,
    },

    /// A ref operation or a nested `run` crossed into a different
    /// world than the thread's active transaction.
    ///
    /// Worlds are independent universes: a transaction may only touch
    /// tvars created in its own world. Fatal to the transaction; it
    /// propagates to the caller of `run` and nothing is published.
    #[error("{op} crossed into a different world than the active transaction")]
    WorldMismatch {
        /// The operation that crossed worlds.
        op: &'static str,
    },

    /// `write` or `modify` was attempted on a ref already commuted in
    /// the same transaction.
    ///
    /// Fatal to the transaction: it propagates to the caller of `run`
    /// and nothing is published.
    #[error("cannot write {tvar} after commuting it in the same transaction")]
    WriteAfterCommute {
        /// The ref that was commuted.
        tvar: RefId,
    },

    /// The transaction body requested an abort.
    ///
    /// Propagates out of `run` unchanged, with no partial publication.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason for the abort.
        reason: String,
    },
}

impl TxError {
    /// Creates an abort error with the given reason.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this is the internal retry signal.
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }

    pub(crate) const fn not_in_transaction(op: &'static str) -> Self {
        Self::NotInTransaction { op }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_is_retry() {
        assert!(TxError::Retry.is_retry());
        assert!(!TxError::aborted("nope").is_retry());
    }

    #[test]
    fn display_messages() {
        let err = TxError::not_in_transaction("write");
        assert_eq!(err.to_string(), "write requires an active transaction");

        let err = TxError::WriteAfterCommute {
            tvar: RefId::new(7),
        };
        assert!(err.to_string().contains("tvar:7"));

        let err = TxError::WorldMismatch { op: "write" };
        assert!(err.to_string().starts_with("write crossed"));
    }
}
