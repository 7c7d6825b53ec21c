//! Error types for the reactive graph.
//!
//! Resource errors are caller-defined and flow through the cache untouched;
//! the variants here describe misuse of the graph itself. They are surfaced
//! through `try_*` methods and otherwise raised as panics, since none of
//! them can be recovered from by retrying.

use thiserror::Error;

use crate::graph::NodeId;

/// Illegal use of a reactive node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A derived signal was read after `dispose()`.
    #[error("derived signal {0} has been disposed")]
    Disposed(NodeId),

    /// A trigger was enqueued while no batch was running.
    #[error("expected to be in an active batch")]
    NoActiveBatch,

    /// `mutate()` was re-entered on the signal it is already mutating.
    #[error("mutable signal {0} is already being mutated")]
    ReentrantMutation(NodeId),
}
