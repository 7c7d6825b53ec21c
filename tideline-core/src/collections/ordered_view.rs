//! Ordered View
//!
//! An `OrderedView` is a `Vec` that stays sorted under a caller-supplied
//! "strictly precedes" predicate. Inserting is a binary search plus a shift,
//! which is cheap for the sizes a message list or inbox reaches; removal and
//! search are linear.
//!
//! Equal elements keep arrival order: a new element lands after every
//! element it ties with.
//!
//! The view is usually owned by a store and wrapped in a
//! [`MutableSignal`](crate::reactive::MutableSignal), so that every insert
//! or removal becomes one notification.

use std::fmt;
use std::sync::Arc;

type LessThan<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A sequence kept sorted by a strict ordering predicate.
///
/// # Example
///
/// ```rust
/// use tideline_core::collections::OrderedView;
///
/// let mut view = OrderedView::descending();
/// view.add(13).add(13).add(42);
/// assert_eq!(view.as_slice(), &[42, 13, 13]);
/// ```
pub struct OrderedView<T> {
    items: Vec<T>,
    lt: LessThan<T>,
}

impl<T> OrderedView<T> {
    /// Create an empty view ordered by `lt`.
    ///
    /// `lt(a, b)` must return `true` exactly when `a` sorts strictly before
    /// `b`, and must describe a consistent order.
    pub fn new<F>(lt: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            items: Vec::new(),
            lt: Arc::new(lt),
        }
    }

    /// Build a view from items in any order. Ties keep their input order.
    pub fn from_unsorted<F>(mut items: Vec<T>, lt: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        items.sort_by(|a, b| {
            if lt(a, b) {
                std::cmp::Ordering::Less
            } else if lt(b, a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        Self {
            items,
            lt: Arc::new(lt),
        }
    }

    /// Build a view from items already sorted by `lt`.
    ///
    /// The order is trusted, not checked.
    pub fn from_sorted<F>(items: Vec<T>, lt: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            items,
            lt: Arc::new(lt),
        }
    }

    /// Insert `value` after every element that does not sort after it.
    pub fn add(&mut self, value: T) -> &mut Self {
        let lt = &self.lt;
        let index = self.items.partition_point(|existing| !lt(&value, existing));
        self.items.insert(index, value);
        self
    }

    /// Remove the first element equal to `value`.
    ///
    /// Returns whether an element was removed.
    pub fn remove(&mut self, value: &T) -> bool
    where
        T: PartialEq,
    {
        match self.items.iter().position(|item| item == value) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove up to `limit` elements matching `predicate`, front to back.
    /// `None` removes every match.
    ///
    /// Returns the number of elements removed.
    pub fn remove_by<P>(&mut self, mut predicate: P, limit: Option<usize>) -> usize
    where
        P: FnMut(&T) -> bool,
    {
        let limit = limit.unwrap_or(usize::MAX);
        let mut removed = 0;
        self.items.retain(|item| {
            if removed < limit && predicate(item) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Find the first match at or after `from_index`.
    ///
    /// The start index is clamped to the length of the view.
    pub fn find<P>(&self, mut predicate: P, from_index: Option<usize>) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        let start = from_index.unwrap_or(0).min(self.items.len());
        self.items[start..].iter().find(|&item| predicate(item))
    }

    /// Find the last match at or before `from_index`, scanning backwards.
    ///
    /// The start index is clamped to the last element.
    pub fn find_right<P>(&self, mut predicate: P, from_index: Option<usize>) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        let end = match from_index {
            Some(index) => index.saturating_add(1).min(self.items.len()),
            None => self.items.len(),
        };
        self.items[..end].iter().rev().find(|&item| predicate(item))
    }

    /// Lazily iterate over the elements matching `predicate`, in order.
    ///
    /// The iterator borrows the view, so the view cannot change while it
    /// is alive.
    pub fn filter<P>(&self, predicate: P) -> Filter<'_, T, P>
    where
        P: FnMut(&T) -> bool,
    {
        Filter {
            inner: self.items.iter(),
            predicate,
        }
    }

    /// Get the element at `index`.
    pub fn at(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Get the first element in order.
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// Get the last element in order.
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Get the number of elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the elements in order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Borrow the elements as a sorted slice.
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Remove every element, keeping the ordering.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Take the elements out, in order.
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Ord> OrderedView<T> {
    /// An empty view sorted smallest first.
    pub fn ascending() -> Self {
        Self::new(|a: &T, b: &T| a < b)
    }

    /// An empty view sorted largest first.
    pub fn descending() -> Self {
        Self::new(|a: &T, b: &T| a > b)
    }
}

impl<T: Clone> Clone for OrderedView<T> {
    /// Copies the elements; the ordering predicate is shared.
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            lt: Arc::clone(&self.lt),
        }
    }
}

impl<'a, T> IntoIterator for &'a OrderedView<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for OrderedView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

/// Iterator returned by [`OrderedView::filter`].
pub struct Filter<'a, T, P> {
    inner: std::slice::Iter<'a, T>,
    predicate: P,
}

impl<'a, T, P> Iterator for Filter<'a, T, P>
where
    P: FnMut(&T) -> bool,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let predicate = &mut self.predicate;
        self.inner.by_ref().find(|&item| predicate(item))
    }
}
