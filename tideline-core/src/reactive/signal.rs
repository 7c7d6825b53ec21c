//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a derived signal is evaluating, the signal
//!    records the read; the derived signal becomes one of its sinks.
//!
//! 2. When a signal is written, the candidate value is compared with the
//!    current one. Equal writes are dropped without a trace.
//!
//! 3. A changing write marks every sink dirty at once and queues the signal
//!    for the end of the current batch, where subscribers are notified and
//!    watched sinks re-evaluate.
//!
//! # Ownership
//!
//! Values are stored by value and `get()` hands out clones, so nobody can
//! modify the stored value behind the signal's back. Use [`Signal::with`] to
//! inspect a large value without cloning it.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::context::ReactiveContext;
use super::readable::Readable;
use super::subscriber::{subscribe_node, subscribe_node_once, Subscription};
use crate::graph::{self, AnyNode, NodeCore, NodeId, NodeKind};

/// Equality used to decide whether a write is a change.
pub(crate) type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

pub(crate) struct SignalInner<T: 'static> {
    core: NodeCore,
    value: RefCell<T>,
    equals: Equality<T>,
}

impl<T: 'static> AnyNode for SignalInner<T> {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

/// A reactive signal holding a value of type T.
///
/// Cloning a signal produces another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use tideline_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal compared with `PartialEq`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(value, |a: &T, b: &T| a == b)
    }

    /// Create a new signal with a custom equality.
    ///
    /// The function must be pure and reflexive. A write is dropped when it
    /// returns `true` for the old and new value.
    pub fn with_equality<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            inner: Rc::new(SignalInner {
                core: NodeCore::new(NodeKind::Source),
                value: RefCell::new(value),
                equals: Box::new(equals),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.core.id()
    }

    /// Get the current value.
    ///
    /// If called while a derived signal is evaluating, this also registers
    /// the read as a dependency.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Set a new value.
    ///
    /// Does nothing if the new value equals the current one.
    pub fn set(&self, value: T) {
        self.update(move |_| value);
    }

    /// Compute a new value from the current one.
    ///
    /// The updater runs inside a batch, so any writes it performs are
    /// flushed together with this one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        graph::batch(|| {
            let candidate = {
                let current = self.inner.value.borrow();
                f(&current)
            };

            let unchanged = (self.inner.equals)(&self.inner.value.borrow(), &candidate);
            if unchanged {
                return;
            }

            *self.inner.value.borrow_mut() = candidate;
            self.inner.core.record_change();
            graph::enqueue(self.inner.clone());
        });
    }

    /// Register a callback invoked once per batch in which the value changed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + 'static,
    {
        subscribe_node(self.inner.clone(), callback)
    }

    /// Register a callback for the next change only.
    pub fn subscribe_once<F>(&self, callback: F) -> Subscription
    where
        F: FnOnce() + 'static,
    {
        subscribe_node_once(self.inner.clone(), callback)
    }

    /// Get the number of subscriber callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    /// Get the number of derived signals that read this one.
    pub fn sink_count(&self) -> usize {
        self.inner.core.sink_count()
    }

    fn track(&self) {
        if ReactiveContext::is_active() {
            ReactiveContext::track_read(self.inner.clone());
        }
    }
}

impl<T: Clone + 'static> Readable for Signal<T> {
    type Value = T;

    fn get(&self) -> T {
        Signal::get(self)
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("kind", &self.inner.core.kind())
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::batch;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<i32>>, impl Fn() + 'static) {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        (calls, move || calls_clone.set(calls_clone.get() + 1))
    }

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_notifies_subscribers() {
        let signal = Signal::new(0);
        let (calls, callback) = counter();
        let _subscription = signal.subscribe(callback);

        assert_eq!(calls.get(), 0);

        signal.set(1);
        assert_eq!(calls.get(), 1);

        signal.set(2);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn equal_writes_do_not_notify() {
        let signal = Signal::new("same".to_string());
        let (calls, callback) = counter();
        let _subscription = signal.subscribe(callback);

        signal.set("same".to_string());
        signal.update(|v| v.clone());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn custom_equality_decides_changes() {
        // Case-insensitive comparison
        let signal = Signal::with_equality("Hello".to_string(), |a: &String, b: &String| {
            a.eq_ignore_ascii_case(b)
        });
        let (calls, callback) = counter();
        let _subscription = signal.subscribe(callback);

        signal.set("HELLO".to_string());
        assert_eq!(calls.get(), 0);
        assert_eq!(signal.get(), "Hello");

        signal.set("world".to_string());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn signal_unsubscribe() {
        let signal = Signal::new(0);
        let (calls, callback) = counter();
        let subscription = signal.subscribe(callback);

        signal.set(1);
        assert_eq!(calls.get(), 1);

        subscription.unsubscribe();
        signal.set(2);
        // Should not have been called again
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn subscribe_once_fires_on_next_change_only() {
        let signal = Signal::new(0);
        let (calls, callback) = counter();
        let _subscription = signal.subscribe_once(callback);

        signal.set(1);
        signal.set(2);
        assert_eq!(calls.get(), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn batched_writes_notify_once() {
        let signal = Signal::new(0);
        let (calls, callback) = counter();
        let _subscription = signal.subscribe(callback);

        batch(|| {
            for i in 1..=10 {
                signal.set(i);
            }
            assert_eq!(calls.get(), 0);
        });

        assert_eq!(calls.get(), 1);
        assert_eq!(signal.get(), 10);
    }

    #[test]
    fn write_from_subscriber_is_flushed_in_same_batch() {
        let source = Signal::new(0);
        let mirror = Signal::new(0);
        let (mirror_calls, callback) = counter();
        let _mirror_sub = mirror.subscribe(callback);

        let source_clone = source.clone();
        let mirror_clone = mirror.clone();
        let _source_sub = source.subscribe(move || mirror_clone.set(source_clone.get() * 10));

        source.set(4);
        assert_eq!(mirror.get(), 40);
        assert_eq!(mirror_calls.get(), 1);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);

        signal2.set(100);
        assert_eq!(signal1.get(), 100);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn with_borrows_without_cloning() {
        let signal = Signal::new(vec![1, 2, 3]);
        let total: i32 = signal.with(|values| values.iter().sum());
        assert_eq!(total, 6);
    }
}
