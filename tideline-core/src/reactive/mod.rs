//! Reactive Primitives
//!
//! This module implements the reactive signal graph: plain signals, mutable
//! signals, patchable records and derived signals. These primitives back
//! every store the client keeps in memory.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] holds a value. Writes are compared with the current value
//! and dropped when equal. A [`MutableSignal`] owns an object that is
//! changed in place; each reported mutation counts as a change. A
//! [`PatchableSignal`] holds a record merged from partial updates.
//!
//! ## Derived Signals
//!
//! A [`DerivedSignal`] is a cached computation over other signals. It
//! recomputes only when one of the signals it read last time has changed,
//! and only eagerly when somebody is watching it.
//!
//! ## Batches
//!
//! Every write runs inside a [`batch`]. Notifications are deferred to the
//! end of the outermost batch, so a subscriber hears about a burst of writes
//! exactly once.
//!
//! # Implementation Notes
//!
//! The graph uses a thread-local tracking context to detect dependencies
//! automatically. When a signal is read, we check whether a derived signal
//! is evaluating and, if so, record the read. Handles are `Rc`-based and
//! stay on the thread that created them.

mod context;
mod derived;
mod mutable;
mod patchable;
mod readable;
mod signal;
mod subscriber;

pub use context::{is_tracking, untracked};
pub use derived::DerivedSignal;
pub use mutable::{MutableSignal, MutationOutcome, ReadHandle};
pub use patchable::{PatchableSignal, Record};
pub use readable::{Readable, SourceTuple};
pub use signal::Signal;
pub use subscriber::{SubscriberId, Subscription};

pub use crate::graph::batch;
