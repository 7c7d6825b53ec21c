//! Cache State
//!
//! The observable state of one cache key. Serializes with a `status` tag
//! so snapshots read naturally in devtools:
//!
//! ```json
//! { "status": "error", "data": "last good value", "error": "timeout" }
//! ```

use serde::{Deserialize, Serialize};

/// State of a single key in a [`ResourceCache`](super::ResourceCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CacheState<T, E> {
    /// Nothing has been requested yet.
    Initial,
    /// A request is outstanding. `data` is the value shown meanwhile:
    /// previously known data or an optimistic guess.
    Loading { data: Option<T> },
    /// The last request succeeded.
    Success { data: T },
    /// The last request failed. `data` is whatever was kept or restored.
    Error { data: Option<T>, error: E },
}

impl<T, E> CacheState<T, E> {
    /// Check if a request is outstanding.
    pub fn is_loading(&self) -> bool {
        matches!(self, CacheState::Loading { .. })
    }

    /// Check if the last request delivered data.
    pub fn is_success(&self) -> bool {
        matches!(self, CacheState::Success { .. })
    }

    /// Check if the last request failed.
    pub fn is_error(&self) -> bool {
        matches!(self, CacheState::Error { .. })
    }

    /// The data currently shown for this key, if any.
    pub fn data(&self) -> Option<&T> {
        match self {
            CacheState::Initial => None,
            CacheState::Loading { data } | CacheState::Error { data, .. } => data.as_ref(),
            CacheState::Success { data } => Some(data),
        }
    }

    /// The error from the last failed request, if the key is in the error state.
    pub fn error(&self) -> Option<&E> {
        match self {
            CacheState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Compare the fields a subscriber sees: loading flag, data and error.
    ///
    /// `Initial` and `Loading { data: None }` differ only in the loading
    /// flag; `Success { data }` and `Error { data, .. }` differ in the error.
    pub fn shallow_eq(&self, other: &Self) -> bool
    where
        T: PartialEq,
        E: PartialEq,
    {
        self.is_loading() == other.is_loading()
            && self.data() == other.data()
            && self.error() == other.error()
    }
}

impl<T, E> Default for CacheState<T, E> {
    fn default() -> Self {
        CacheState::Initial
    }
}

// ---- Tests ----
