//! Dependency Graph
//!
//! This module holds the bookkeeping shared by every reactive node and the
//! scheduler that decides when nodes fire.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are signals (sources) or derived signals (computations)
//! - Edges point from a source to the derived nodes that read it ("sinks")
//!
//! Each node keeps two distinct collections:
//!
//! 1. Its sinks, used only for dirty propagation and trigger fan-out.
//! 2. Its subscriber callbacks, which are user code.
//!
//! Keeping them apart lets an unwatched derived node stay lazy: a source
//! change only flips its dirty flag, and the recomputation waits for the
//! next read.
//!
//! # Batching
//!
//! Every write happens inside a batch. Writes apply immediately, but the
//! notifications are queued and flushed once, in order, when the outermost
//! batch ends. See [`batch`].

mod node;
mod scheduler;

pub use node::{NodeId, NodeKind};
pub(crate) use node::{AnyNode, NodeCore};
pub use scheduler::{batch, is_batching};
pub(crate) use scheduler::{current_batch, enqueue, try_enqueue};
