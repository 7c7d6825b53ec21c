use std::fmt;

use parking_lot::Mutex;

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handle to a cache subscription.
///
/// Dropping the handle unsubscribes. Unlike the signal graph's
/// [`Subscription`](crate::reactive::Subscription) this handle is `Send`,
/// so it can live inside a spawned task.
#[must_use = "dropping a CacheSubscription unsubscribes immediately"]
pub struct CacheSubscription {
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl CacheSubscription {
    pub(crate) fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Mutex::new(Some(Box::new(unsubscribe))),
        }
    }

    /// Stop receiving notifications. Calling this again does nothing.
    pub fn unsubscribe(&self) {
        let unsubscribe = self.unsubscribe.lock().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribe.lock().is_some()
    }

    /// Keep the callback registered for as long as the cache key lives.
    pub fn detach(self) {
        self.unsubscribe.lock().take();
    }
}

impl Drop for CacheSubscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.get_mut().take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for CacheSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSubscription")
            .field("active", &self.is_active())
            .finish()
    }
}
