//! Error Taxonomy
//!
//! Every fallible operation in the crate returns [`TetherResult`]. The
//! variants split into two groups:
//!
//! - Programmer errors ([`TetherError::BorrowConflict`],
//!   [`TetherError::UseAfterFree`]) surface immediately and are never retried.
//! - Expected outcomes ([`TetherError::AcquireCancelled`],
//!   [`TetherError::CycleDetected`]) that callers handle explicitly. A cycle is
//!   fatal only to the evaluation that observed it.

use thiserror::Error;

use crate::graph::NodeId;
use crate::ownership::{BorrowKind, BorrowState};

/// Root error type for all tether failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TetherError {
    /// A `RefCell` borrow would break the shared-xor-exclusive rule.
    #[error("borrow conflict: {requested:?} borrow requested while cell is {state:?}")]
    BorrowConflict {
        requested: BorrowKind,
        state: BorrowState,
    },

    /// A handle or node was used after it was released.
    #[error("use after free: {what}")]
    UseAfterFree { what: &'static str },

    /// A queued lock request was cancelled before it was granted.
    #[error("lock acquisition cancelled while queued")]
    AcquireCancelled,

    /// A reactive node read itself during its own evaluation.
    #[error("dependency cycle detected at node {node:?}")]
    CycleDetected { node: NodeId },

    /// The evaluation stack grew past the configured limit.
    #[error("evaluation depth exceeded limit of {limit}")]
    DepthExceeded { limit: usize },

    /// Deferred writes kept scheduling new propagation passes.
    #[error("propagation did not settle after {passes} passes")]
    PropagationLimit { passes: usize },

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl TetherError {
    /// True for errors that indicate a defect in the calling code.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            TetherError::BorrowConflict { .. } | TetherError::UseAfterFree { .. }
        )
    }
}

pub type TetherResult<T> = Result<T, TetherError>;
