//! Subscriber types for the reactive system.
//!
//! A subscriber is a user callback attached to a signal.
//! Subscribing hands back a [`Subscription`]; dropping it, or calling
//! [`Subscription::unsubscribe`], detaches the callback.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::graph::AnyNode;

/// Unique identifier for a subscriber.
///
/// Each callback gets a unique ID when registered, which is what the
/// subscription uses to find and remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered callback.
///
/// Dropping this handle unsubscribes the callback. Use [`detach`] to keep
/// the callback registered for as long as its source lives.
///
/// [`detach`]: Subscription::detach
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    unsubscribe: Cell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub(crate) fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Cell::new(Some(Box::new(unsubscribe))),
        }
    }

    /// Remove the callback. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Check whether the callback is still registered through this handle.
    pub fn is_active(&self) -> bool {
        let unsubscribe = self.unsubscribe.take();
        let active = unsubscribe.is_some();
        self.unsubscribe.set(unsubscribe);
        active
    }

    /// Give up the handle without unsubscribing.
    pub fn detach(self) {
        drop(self.unsubscribe.take());
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Attach `callback` to `node`.
///
/// The first subscriber forces a lazily computed node to evaluate, so that
/// it is attached to its sources and will hear about their changes.
pub(crate) fn subscribe_node(node: Rc<dyn AnyNode>, callback: impl Fn() + 'static) -> Subscription {
    let id = SubscriberId::new();
    register(node, id, Rc::new(callback))
}

/// Attach a callback that runs on the next notification only.
pub(crate) fn subscribe_node_once(node: Rc<dyn AnyNode>, callback: impl FnOnce() + 'static) -> Subscription {
    let id = SubscriberId::new();
    let weak = Rc::downgrade(&node);
    let slot = Cell::new(Some(callback));
    let once = move || {
        if let Some(callback) = slot.take() {
            if let Some(node) = weak.upgrade() {
                node.core().remove_subscriber(id);
            }
            callback();
        }
    };
    register(node, id, Rc::new(once))
}

fn register(node: Rc<dyn AnyNode>, id: SubscriberId, callback: Rc<dyn Fn()>) -> Subscription {
    if node.core().subscriber_count() == 0 {
        node.refresh();
    }
    node.core().add_subscriber(id, callback);

    let weak = Rc::downgrade(&node);
    Subscription::new(move || {
        if let Some(node) = weak.upgrade() {
            node.core().remove_subscriber(id);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeCore, NodeKind};

    struct Plain(NodeCore);

    impl AnyNode for Plain {
        fn core(&self) -> &NodeCore {
            &self.0
        }
    }

    fn plain() -> Rc<dyn AnyNode> {
        Rc::new(Plain(NodeCore::new(NodeKind::Source)))
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let subscription = Subscription::new(move || calls_clone.set(calls_clone.get() + 1));

        assert!(subscription.is_active());
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());
        drop(subscription);

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn dropping_subscription_removes_callback() {
        let node = plain();
        let subscription = subscribe_node(node.clone(), || {});
        assert_eq!(node.core().subscriber_count(), 1);

        drop(subscription);
        assert_eq!(node.core().subscriber_count(), 0);
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let node = plain();
        subscribe_node(node.clone(), || {}).detach();
        assert_eq!(node.core().subscriber_count(), 1);
    }

    #[test]
    fn once_callback_fires_a_single_time() {
        let node = plain();
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let _subscription = subscribe_node_once(node.clone(), move || calls_clone.set(calls_clone.get() + 1));

        node.core().notify();
        node.core().notify();

        assert_eq!(calls.get(), 1);
        assert_eq!(node.core().subscriber_count(), 0);
    }
}
