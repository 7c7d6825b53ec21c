//! Mutable Signal Implementation
//!
//! A MutableSignal owns one object for its whole life and lets callers change
//! it in place. It is the building block for richer stores: a message table
//! or a thread index wraps its collections in a MutableSignal and exposes
//! domain operations that call [`MutableSignal::mutate`].
//!
//! # Differences from Signal
//!
//! - `get()` always hands back a handle to the same object, so there is no
//!   old value to compare with. Every mutation that reports a change
//!   notifies, unconditionally.
//! - The mutator decides whether anything changed by returning `false`
//!   (nothing changed) or `true` / `()` (something did).
//!
//! # Synchronous Mutators Only
//!
//! The mutator must finish before the batch closes, or its writes would land
//! after the notifications they should have caused. The return type of the
//! mutator must implement [`MutationOutcome`], which only `()` and `bool`
//! do; handing in an `async` closure is a type error.

use std::cell::{Ref, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use super::context::ReactiveContext;
use super::readable::Readable;
use super::subscriber::{subscribe_node, subscribe_node_once, Subscription};
use crate::error::GraphError;
use crate::graph::{self, AnyNode, NodeCore, NodeId, NodeKind};

/// What a mutator returns to say whether it changed anything.
pub trait MutationOutcome {
    /// `true` if dependents must be notified.
    fn is_change(self) -> bool;
}

impl MutationOutcome for () {
    fn is_change(self) -> bool {
        true
    }
}

impl MutationOutcome for bool {
    fn is_change(self) -> bool {
        self
    }
}

/// Read-only handle to the object owned by a [`MutableSignal`].
///
/// Every `get()` returns a handle to the same object; [`ptr_eq`] holds
/// between any two of them.
///
/// [`ptr_eq`]: ReadHandle::ptr_eq
pub struct ReadHandle<T> {
    value: Rc<RefCell<T>>,
}

impl<T> ReadHandle<T> {
    /// Borrow the object.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a `mutate()` of the same signal.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.value.borrow()
    }

    /// Whether two handles point at the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> Clone for ReadHandle<T> {
    fn clone(&self) -> Self {
        Self {
            value: Rc::clone(&self.value),
        }
    }
}

impl<T: Debug> Debug for ReadHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value.try_borrow() {
            Ok(value) => f.debug_tuple("ReadHandle").field(&*value).finish(),
            Err(_) => f.write_str("ReadHandle(<mutating>)"),
        }
    }
}

pub(crate) struct MutableInner<T: 'static> {
    core: NodeCore,
    value: Rc<RefCell<T>>,
}

impl<T: 'static> AnyNode for MutableInner<T> {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

/// A signal whose object is changed in place.
///
/// # Example
///
/// ```rust
/// use tideline_core::reactive::MutableSignal;
///
/// let names = MutableSignal::new(Vec::<String>::new());
///
/// names.mutate(|list| list.push("ada".into()));
///
/// // Returning `false` reports that nothing changed.
/// names.mutate(|list| {
///     let before = list.len();
///     list.retain(|name| name != "nobody");
///     list.len() != before
/// });
///
/// assert_eq!(names.with(|list| list.len()), 1);
/// ```
pub struct MutableSignal<T: 'static> {
    inner: Rc<MutableInner<T>>,
}

impl<T: 'static> MutableSignal<T> {
    /// Create a new mutable signal owning `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Rc::new(MutableInner {
                core: NodeCore::new(NodeKind::Mutable),
                value: Rc::new(RefCell::new(initial)),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.core.id()
    }

    /// Get a handle to the owned object, tracking the read.
    pub fn get(&self) -> ReadHandle<T> {
        self.track();
        ReadHandle {
            value: Rc::clone(&self.inner.value),
        }
    }

    /// Borrow the owned object, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Change the object in place.
    ///
    /// Dependents are notified at the end of the outermost batch unless the
    /// mutator returns `false`. Mutations of several signals nested inside
    /// each other produce a single notification pass.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a mutator of the same signal. See
    /// [`try_mutate`](Self::try_mutate).
    pub fn mutate<R, F>(&self, mutator: F)
    where
        F: FnOnce(&mut T) -> R,
        R: MutationOutcome,
    {
        if let Err(err) = self.try_mutate(mutator) {
            panic!("{err}");
        }
    }

    /// Like [`mutate`](Self::mutate), reporting re-entrant use as an error.
    pub fn try_mutate<R, F>(&self, mutator: F) -> Result<(), GraphError>
    where
        F: FnOnce(&mut T) -> R,
        R: MutationOutcome,
    {
        graph::batch(|| {
            let changed = {
                let mut value = self
                    .inner
                    .value
                    .try_borrow_mut()
                    .map_err(|_| GraphError::ReentrantMutation(self.id()))?;
                mutator(&mut value).is_change()
            };

            if changed {
                self.inner.core.record_change();
                graph::enqueue(self.inner.clone());
            }
            Ok(())
        })
    }

    /// Notify dependents as if the object had changed.
    pub fn invalidate(&self) {
        self.mutate(|_| true);
    }

    /// Register a callback invoked once per batch in which a mutation
    /// reported a change.
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

impl<T: 'static> Readable for MutableSignal<T> {
    type Value = ReadHandle<T>;

    fn get(&self) -> ReadHandle<T> {
        MutableSignal::get(self)
    }
}

impl<T: 'static> Clone for MutableSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for MutableSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableSignal")
            .field("id", &self.id())
            .field("kind", &self.inner.core.kind())
            .field("value", &ReadHandle { value: Rc::clone(&self.inner.value) })
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
    use crate::reactive::DerivedSignal;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counting_subscriber<T: 'static>(signal: &MutableSignal<T>) -> (Arc<AtomicI32>, Subscription) {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let subscription = signal.subscribe(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (count, subscription)
    }

    #[test]
    fn get_returns_same_object() {
        let signal = MutableSignal::new(vec![1]);
        let first = signal.get();
        signal.mutate(|v| v.push(2));
        let second = signal.get();

        assert!(first.ptr_eq(&second));
        assert_eq!(*first.borrow(), vec![1, 2]);
    }

    #[test]
    fn every_mutation_notifies() {
        let signal = MutableSignal::new(0);
        let (count, _subscription) = counting_subscriber(&signal);

        signal.mutate(|n| *n += 1);
        // Same content as before, still a change.
        signal.mutate(|n| *n += 0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn returning_false_skips_notification() {
        let signal = MutableSignal::new(vec![1, 2, 3]);
        let (count, _subscription) = counting_subscriber(&signal);

        signal.mutate(|v| {
            let before = v.len();
            v.retain(|n| *n != 42);
            v.len() != before
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);

        signal.mutate(|v| v.pop().is_some());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_mutations_coalesce() {
        let left = MutableSignal::new(0);
        let right = MutableSignal::new(0);

        let evaluations = Arc::new(AtomicI32::new(0));
        let evaluations_clone = evaluations.clone();
        let total = DerivedSignal::from((left.clone(), right.clone()), move |(l, r)| {
            evaluations_clone.fetch_add(1, Ordering::SeqCst);
            *l.borrow() + *r.borrow()
        });
        let notified = Arc::new(AtomicI32::new(0));
        let notified_clone = notified.clone();
        let _subscription = total.subscribe(move || {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);

        let right_clone = right.clone();
        left.mutate(move |l| {
            *l = 1;
            right_clone.mutate(|r| *r = 2);
        });

        assert_eq!(total.get(), 3);
        assert_eq!(evaluations.load(Ordering::SeqCst), 2);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_mutation_is_rejected() {
        let signal = MutableSignal::new(0);
        let signal_clone = signal.clone();

        let mut inner_result = None;
        signal.mutate(|n| {
            *n = 1;
            inner_result = Some(signal_clone.try_mutate(|m| *m = 2));
        });

        assert_eq!(inner_result, Some(Err(GraphError::ReentrantMutation(signal.id()))));
        assert_eq!(*signal.get().borrow(), 1);
    }

    #[test]
    fn invalidate_notifies_without_changes() {
        let signal = MutableSignal::new(String::from("x"));
        let (count, _subscription) = counting_subscriber(&signal);

        signal.invalidate();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
