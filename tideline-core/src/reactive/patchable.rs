//! Patchable Signal Implementation
//!
//! A PatchableSignal holds a flat record (field name to value) and is only
//! ever changed through [`PatchableSignal::patch`]. It suits state that the
//! server sends as partial updates, such as a user's presence.
//!
//! Patches merge field by field. A `None` in the patch deletes the field.
//! If every field in the patch already matches, the record is left alone
//! and `get()` keeps returning the same `Rc`, so downstream equality checks
//! stay cheap.

use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use super::readable::Readable;
use super::signal::Signal;
use super::subscriber::Subscription;
use crate::graph::NodeId;

/// The record type stored by a [`PatchableSignal`].
pub type Record<K, V> = IndexMap<K, V>;

/// A signal over a record that only changes through patches.
///
/// There is no `set()`: replacing the whole record would
/// bypass the merge rules.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
/// use tideline_core::reactive::PatchableSignal;
///
/// let presence = PatchableSignal::new([("cursor", 10), ("selection", 3)]);
/// let before = presence.get();
///
/// presence.patch([("cursor", Some(10))]);
/// assert!(Rc::ptr_eq(&before, &presence.get()));
///
/// presence.patch([("selection", None)]);
/// assert_eq!(presence.get().len(), 1);
/// ```
pub struct PatchableSignal<K: 'static, V: 'static> {
    signal: Signal<Rc<Record<K, V>>>,
}

impl<K, V> PatchableSignal<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: PartialEq + Clone + 'static,
{
    /// Create a new signal from the initial fields.
    pub fn new<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let record: Record<K, V> = fields.into_iter().collect();
        Self {
            signal: Signal::with_equality(Rc::new(record), Rc::ptr_eq),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.signal.id()
    }

    /// Get the current record, tracking the read.
    pub fn get(&self) -> Rc<Record<K, V>> {
        self.signal.get()
    }

    /// Get a single field, tracking the read.
    pub fn field(&self, key: &K) -> Option<V> {
        self.signal.with(|record| record.get(key).cloned())
    }

    /// Merge `patch` into the record.
    ///
    /// `Some(value)` sets a field, `None` deletes it. Nothing is recorded
    /// if the merge leaves the record unchanged.
    pub fn patch<I>(&self, patch: I)
    where
        I: IntoIterator<Item = (K, Option<V>)>,
    {
        self.signal.update(|current| merge(current, patch));
    }

    /// Register a callback invoked once per batch in which the record
    /// changed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + 'static,
    {
        self.signal.subscribe(callback)
    }

    /// Register a callback for the next change only.
    pub fn subscribe_once<F>(&self, callback: F) -> Subscription
    where
        F: FnOnce() + 'static,
    {
        self.signal.subscribe_once(callback)
    }

    /// Get the number of subscriber callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.signal.subscriber_count()
    }
}

/// Apply `patch` to `current`, copying the record only on the first real
/// difference.
fn merge<K, V, I>(current: &Rc<Record<K, V>>, patch: I) -> Rc<Record<K, V>>
where
    K: Hash + Eq + Clone,
    V: PartialEq + Clone,
    I: IntoIterator<Item = (K, Option<V>)>,
{
    let mut next: Option<Record<K, V>> = None;

    for (key, value) in patch {
        let existing = next.as_ref().unwrap_or(&**current).get(&key);
        match value {
            None if existing.is_some() => {
                next.get_or_insert_with(|| (**current).clone())
                    .shift_remove(&key);
            }
            Some(value) if existing != Some(&value) => {
                next.get_or_insert_with(|| (**current).clone())
                    .insert(key, value);
            }
            _ => {}
        }
    }

    // Edits that cancel out leave the old record in place.
    match next {
        Some(record) if record != **current => Rc::new(record),
        _ => Rc::clone(current),
    }
}

impl<K, V> Readable for PatchableSignal<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: PartialEq + Clone + 'static,
{
    type Value = Rc<Record<K, V>>;

    fn get(&self) -> Self::Value {
        PatchableSignal::get(self)
    }
}

impl<K: 'static, V: 'static> Clone for PatchableSignal<K, V> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<K: Debug + 'static, V: Debug + 'static> Debug for PatchableSignal<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchableSignal")
            .field("signal", &self.signal)
            .finish()
    }
}
