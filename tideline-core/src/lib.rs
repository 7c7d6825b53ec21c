//! Tideline Core
//!
//! This crate provides the local-state engine behind a realtime collaboration
//! client. Data arrives asynchronously from a remote service; the engine keeps
//! in-memory views over it consistent while application code applies
//! optimistic changes of its own.
//!
//! It implements:
//!
//! - Reactive primitives (signals, mutable signals, patchable records,
//!   derived signals) with batched notification
//! - An ordered container for keeping derived views sorted
//! - An asynchronous per-key resource cache with stale-while-revalidate,
//!   optimistic mutation and in-flight de-duplication
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node bookkeeping (sinks, subscribers) and the batch scheduler
//! - `reactive`: Public signal types and dependency tracking
//! - `collections`: The comparator-ordered `OrderedView`
//! - `cache`: The async `ResourceCache`
//!
//! # Example
//!
//! ```rust
//! use tideline_core::reactive::{batch, DerivedSignal, Signal};
//!
//! let first = Signal::new(1);
//! let second = Signal::new(2);
//!
//! let sum = DerivedSignal::from((first.clone(), second.clone()), |(a, b)| a + b);
//! assert_eq!(sum.get(), 3);
//!
//! // Both writes are applied before anyone is notified.
//! batch(|| {
//!     first.set(10);
//!     second.set(20);
//! });
//! assert_eq!(sum.get(), 30);
//! ```

pub mod cache;
pub mod collections;
pub mod error;
pub mod graph;
pub mod reactive;

pub use cache::{CacheOptions, CacheState, CacheSubscription, ResourceCache, UpdateOptions};
pub use collections::OrderedView;
pub use error::GraphError;
pub use graph::batch;
pub use reactive::{DerivedSignal, MutableSignal, PatchableSignal, Signal, Subscription};
