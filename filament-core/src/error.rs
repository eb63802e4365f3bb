//! Error types for the reactive runtime.

use std::fmt;

use thiserror::Error;

use crate::graph::NodeId;

/// Which side of a borrow conflicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

/// Errors raised by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A handle was used after its node (or the node's owner) was disposed.
    #[error("reactive node {id:?} used after it was disposed")]
    UseAfterDispose { id: NodeId },

    /// A read and a write borrow of the same value overlapped.
    #[error("cannot {access} reactive node {id:?}: it is already borrowed")]
    BorrowConflict { id: NodeId, access: Access },

    /// A computation body panicked during a scheduled run.
    #[error("computation {id:?} panicked: {message}")]
    ComputationPanic { id: NodeId, message: String },

    /// An async task finished after a newer task for the same resource had
    /// started. Its result was dropped.
    #[error("resource {id:?} discarded result of task {task}, latest is {latest}")]
    AsyncTaskStale { id: NodeId, task: u64, latest: u64 },

    /// A memo was read while its own value was still being computed.
    #[error("memo {id:?} read while computing its own value")]
    CircularRead { id: NodeId },

    /// Propagation did not settle; the graph contains a write cycle.
    #[error("propagation did not settle after {rounds} rounds")]
    Unstable { rounds: usize },

    /// The runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ReactiveError {
    fn from(err: serde_json::Error) -> Self {
        ReactiveError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Panic with the error's message. Used by the non-`try_` accessors, which
/// fail loudly by contract.
#[track_caller]
pub(crate) fn throw(err: ReactiveError) -> ! {
    panic!("{err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    #[test]
    fn messages_name_the_access() {
        let id = NodeId::from(KeyData::from_ffi(1));
        let err = ReactiveError::BorrowConflict {
            id,
            access: Access::Write,
        };
        assert!(err.to_string().starts_with("cannot write reactive node"));
    }

    #[test]
    fn json_errors_become_config_errors() {
        let err: ReactiveError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ReactiveError::Config(_)));
    }
}
