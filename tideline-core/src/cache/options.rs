//! Cache Options
//!
//! Construction-time configuration for a [`ResourceCache`](super::ResourceCache)
//! and per-call options for `revalidate` and `mutate`.

use std::fmt;
use std::sync::Arc;

use super::CacheState;

pub(crate) type StateEquality<T, E> =
    Arc<dyn Fn(&CacheState<T, E>, &CacheState<T, E>) -> bool + Send + Sync>;

/// Options for building a [`ResourceCache`](super::ResourceCache).
pub struct CacheOptions<T, E> {
    pub(crate) state_equality: StateEquality<T, E>,
}

impl<T, E> CacheOptions<T, E> {
    /// Decide which state transitions notify subscribers.
    ///
    /// The function returns `true` when two states should be treated as
    /// equal, in which case the transition is silent.
    pub fn with_state_equality<F>(mut self, equals: F) -> Self
    where
        F: Fn(&CacheState<T, E>, &CacheState<T, E>) -> bool + Send + Sync + 'static,
    {
        self.state_equality = Arc::new(equals);
        self
    }
}

impl<T, E> Default for CacheOptions<T, E>
where
    T: PartialEq,
    E: PartialEq,
{
    fn default() -> Self {
        Self {
            state_equality: Arc::new(|a, b| a.shallow_eq(b)),
        }
    }
}

impl<T, E> Clone for CacheOptions<T, E> {
    fn clone(&self) -> Self {
        Self {
            state_equality: Arc::clone(&self.state_equality),
        }
    }
}

impl<T, E> fmt::Debug for CacheOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions").finish_non_exhaustive()
    }
}

/// Data shown while a request is outstanding, before it is confirmed.
pub enum OptimisticData<T> {
    /// Show this value.
    Value(T),
    /// Compute the value from the data currently shown.
    Update(Box<dyn FnOnce(Option<&T>) -> T + Send>),
}

impl<T> OptimisticData<T> {
    pub(crate) fn resolve(self, current: Option<&T>) -> T {
        match self {
            OptimisticData::Value(value) => value,
            OptimisticData::Update(update) => update(current),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for OptimisticData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimisticData::Value(value) => f.debug_tuple("Value").field(value).finish(),
            OptimisticData::Update(_) => f.write_str("Update(..)"),
        }
    }
}

/// Options for [`revalidate`](super::ResourceCache::revalidate) and
/// [`mutate`](super::ResourceCache::mutate).
pub struct UpdateOptions<T> {
    /// Data to show while the request is in flight.
    pub optimistic_data: Option<OptimisticData<T>>,
}

impl<T> UpdateOptions<T> {
    /// No optimistic data.
    pub fn new() -> Self {
        Self {
            optimistic_data: None,
        }
    }

    /// Show `value` until the request settles.
    pub fn optimistic(value: T) -> Self {
        Self {
            optimistic_data: Some(OptimisticData::Value(value)),
        }
    }

    /// Show `update(current)` until the request settles.
    pub fn optimistic_with<F>(update: F) -> Self
    where
        F: FnOnce(Option<&T>) -> T + Send + 'static,
    {
        Self {
            optimistic_data: Some(OptimisticData::Update(Box::new(update))),
        }
    }
}

impl<T> Default for UpdateOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for UpdateOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("optimistic_data", &self.optimistic_data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimistic_update_sees_current_data() {
        let options = UpdateOptions::optimistic_with(|current: Option<&Vec<i32>>| {
            let mut next = current.cloned().unwrap_or_default();
            next.push(4);
            next
        });
        let data = options.optimistic_data.map(|d| d.resolve(Some(&vec![1, 2, 3])));
        assert_eq!(data, Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn custom_equality_replaces_default() {
        let options: CacheOptions<i32, String> =
            CacheOptions::default().with_state_equality(|a, b| a.data() == b.data());
        let loading = CacheState::Loading { data: Some(1) };
        let done = CacheState::Success { data: 1 };

        assert!((options.state_equality)(&loading, &done));
        let shallow: CacheOptions<i32, String> = CacheOptions::default();
        assert!(!(shallow.state_equality)(&loading, &done));
    }
}
