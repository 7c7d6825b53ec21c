//! Graph Nodes
//!
//! This module defines the state every reactive node carries: its identity,
//! its sinks and its subscriber callbacks.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::scheduler;
use crate::reactive::SubscriberId;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A value cell compared on every write (`Signal`, `PatchableSignal`).
    Source,

    /// An in-place mutation cell (`MutableSignal`). Every mutation counts as
    /// a change.
    Mutable,

    /// A memoized computation (`DerivedSignal`).
    Derived,
}

/// Behaviour the scheduler and the tracking context need from a node.
///
/// Sources only need `core()`; derived nodes override the rest.
pub(crate) trait AnyNode {
    fn core(&self) -> &NodeCore;

    /// Flag this node as stale and propagate to its sinks.
    fn mark_dirty(&self) {}

    /// Bring a lazily computed node up to date without tracking the read.
    fn refresh(&self) {}

    /// Called once per batch flush for every enqueued node.
    fn trigger(&self) {
        self.core().notify();
        self.core().enqueue_sinks();
    }

    /// Whether anything observes this node, directly or through sinks.
    fn has_watchers(&self) -> bool {
        self.core().has_watchers()
    }
}

type Callback = Rc<dyn Fn()>;

/// Identity, sinks and subscribers of a node.
pub(crate) struct NodeCore {
    id: NodeId,
    kind: NodeKind,

    /// Bumped on every change of the node's value.
    version: Cell<u64>,

    /// Derived nodes that read this node during their last evaluation.
    sinks: RefCell<IndexMap<NodeId, Weak<dyn AnyNode>>>,

    /// User callbacks, in subscription order.
    subscribers: RefCell<IndexMap<SubscriberId, Callback>>,
}

impl NodeCore {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            version: Cell::new(0),
            sinks: RefCell::new(IndexMap::new()),
            subscribers: RefCell::new(IndexMap::new()),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.get()
    }

    pub(crate) fn bump_version(&self) {
        self.version.set(self.version.get().wrapping_add(1));
    }

    /// Record that the value changed: bump the version and mark every sink
    /// dirty.
    pub(crate) fn record_change(&self) {
        self.bump_version();
        self.mark_sinks_dirty();
    }

    pub(crate) fn add_sink(&self, id: NodeId, sink: Weak<dyn AnyNode>) {
        self.sinks.borrow_mut().insert(id, sink);
    }

    pub(crate) fn remove_sink(&self, id: NodeId) {
        self.sinks.borrow_mut().shift_remove(&id);
    }

    pub(crate) fn sink_count(&self) -> usize {
        self.sinks.borrow().len()
    }

    /// Snapshot of live sinks, so callers never hold the borrow while
    /// running sink code.
    fn live_sinks(&self) -> Vec<Rc<dyn AnyNode>> {
        self.sinks
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn mark_sinks_dirty(&self) {
        for sink in self.live_sinks() {
            sink.mark_dirty();
        }
    }

    pub(crate) fn enqueue_sinks(&self) {
        for sink in self.live_sinks() {
            scheduler::enqueue(sink);
        }
    }

    pub(crate) fn add_subscriber(&self, id: SubscriberId, callback: Callback) {
        self.subscribers.borrow_mut().insert(id, callback);
    }

    pub(crate) fn remove_subscriber(&self, id: SubscriberId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Invoke every subscriber. Callbacks may subscribe or unsubscribe
    /// while this runs; they see the list as it was when notify started.
    pub(crate) fn notify(&self) {
        let callbacks: Vec<Callback> = self.subscribers.borrow().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }

    pub(crate) fn has_watchers(&self) -> bool {
        self.subscriber_count() > 0 || self.live_sinks().iter().any(|sink| sink.has_watchers())
    }
}

impl fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCore")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("version", &self.version())
            .field("sink_count", &self.sink_count())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
