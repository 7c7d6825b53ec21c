//! Resource Cache
//!
//! A keyed stale-while-revalidate cache for async resources.
//!
//! # How Requests Work
//!
//! Each key owns an entry holding its [`CacheState`], whether the cached
//! value is still trusted, the last confirmed data, and at most one request
//! in flight. A request is a shared future: every `get`, `revalidate` or
//! `mutate` issued while it is outstanding awaits the same future, so a key
//! never has two fetches running at once.
//!
//! The fetch (or mutation) function is called the first time the shared
//! future is polled, never while the cache lock is held. When the future
//! completes it settles the entry once, and every awaiting caller receives
//! the same settled state.
//!
//! ```text
//! get("abc")  ──► entry invalid, nothing in flight ──► start generation 7
//! get("abc")  ──► generation 7 in flight ──────────► join
//!                                 fetch resolves ──► settle(7) ──► both callers
//! ```
//!
//! # Generations
//!
//! Every request takes a number from a cache-wide counter. A request that
//! completes after its entry was cleared or replaced finds a different
//! generation in flight and leaves the entry alone.
//!
//! # Notifications
//!
//! Subscribers are told about every transition the configured state
//! equality considers a change. No user code runs under the cache lock:
//! optimistic updaters, the state equality and subscriber callbacks may all
//! call back into the cache.
//!
//! Watch channels always receive the entry's latest state, so a watcher
//! never ends up behind even when two transitions are published out of
//! order.

mod entry;
mod options;
mod state;
mod subscription;

pub use options::{CacheOptions, OptimisticData, UpdateOptions};
pub use state::CacheState;
pub use subscription::CacheSubscription;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use entry::{Entry, Fetcher, Flight, InFlight, Outcome, Request, Settled};
use options::StateEquality;

type Listener<T, E> = Arc<dyn Fn(&CacheState<T, E>) + Send + Sync>;

/// Everything guarded by the cache lock.
struct Registry<T, E> {
    entries: HashMap<String, Entry<T, E>>,
    listeners: HashMap<String, IndexMap<u64, Listener<T, E>>>,
    watchers: HashMap<String, watch::Sender<CacheState<T, E>>>,
    next_listener: u64,
}

impl<T, E> Registry<T, E> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            listeners: HashMap::new(),
            watchers: HashMap::new(),
            next_listener: 0,
        }
    }
}

/// A state change recorded under the lock, published after it is released.
struct Transition<T, E> {
    before: CacheState<T, E>,
    after: CacheState<T, E>,
}

/// What a caller waits on after registering interest in a key.
enum Acquired<T, E> {
    Ready(CacheState<T, E>),
    Pending(Flight<T, E>),
}

impl<T, E> Acquired<T, E>
where
    T: Clone,
    E: Clone,
{
    async fn settle(self) -> Settled<T, E> {
        match self {
            Acquired::Ready(state) => Settled {
                state,
                mutation_error: None,
            },
            Acquired::Pending(flight) => flight.await,
        }
    }
}

struct CacheInner<T, E> {
    fetch: Fetcher<T, E>,
    equality: StateEquality<T, E>,
    next_generation: AtomicU64,
    registry: Mutex<Registry<T, E>>,
}

impl<T, E> CacheInner<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Register a caller for `key`: optionally invalidate and apply
    /// optimistic data, then join the request in flight or start a new one
    /// if the entry is invalid.
    fn acquire(
        self: &Arc<Self>,
        key: &str,
        request: Request<T, E>,
        invalidate: bool,
        options: UpdateOptions<T>,
    ) -> Acquired<T, E> {
        // The updater sees the data shown when it is called.
        let optimistic = options.optimistic_data.map(|optimistic| {
            let current = self
                .registry
                .lock()
                .entries
                .get(key)
                .and_then(|entry| entry.state.data().cloned());
            optimistic.resolve(current.as_ref())
        });

        let (acquired, transition) = {
            let mut registry = self.registry.lock();
            let entry = registry.entries.entry(key.to_owned()).or_insert_with(Entry::new);
            let before = entry.state.clone();

            if invalidate {
                entry.is_invalid = true;
            }

            if let Some(data) = optimistic {
                entry.state = CacheState::Loading { data: Some(data) };
                entry.rollback_on_error = true;
                trace!(key, "applied optimistic data");
            }

            let acquired = if let Some(flight) = &entry.in_flight {
                trace!(key, generation = flight.generation, "joining request in flight");
                Acquired::Pending(flight.future.clone())
            } else if entry.is_invalid {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                let restore = request.is_mutation().then(|| before.clone());
                let flight = self.start(key, generation, request, entry.confirmed.clone());

                entry.state = CacheState::Loading {
                    data: entry.state.data().cloned(),
                };
                entry.in_flight = Some(InFlight {
                    generation,
                    future: flight.clone(),
                    restore,
                });
                debug!(key, generation, "request started");
                Acquired::Pending(flight)
            } else {
                Acquired::Ready(entry.state.clone())
            };

            let after = entry.state.clone();
            (acquired, Transition { before, after })
        };

        self.publish(key, transition);
        acquired
    }

    /// Build the shared future for a new request. Nothing runs until it is
    /// first polled.
    fn start(
        self: &Arc<Self>,
        key: &str,
        generation: u64,
        request: Request<T, E>,
        confirmed: Option<T>,
    ) -> Flight<T, E> {
        let cache = Arc::downgrade(self);
        let fetch = Arc::clone(&self.fetch);
        let key = key.to_owned();

        async move {
            let outcome = request.run(fetch, key.clone(), confirmed).await;
            settle(&cache, &key, generation, outcome)
        }
        .boxed()
        .shared()
    }

    /// Apply a finished request to its entry, unless a newer request or a
    /// `clear()` has taken the entry over.
    fn settle(&self, key: &str, generation: u64, outcome: Outcome<T, E>) -> Settled<T, E> {
        let (settled, transition) = {
            let mut registry = self.registry.lock();
            let entry = match registry.entries.get_mut(key) {
                Some(entry) if entry.generation() == Some(generation) => entry,
                _ => {
                    debug!(key, generation, "ignoring stale resolution");
                    return outcome.detached();
                }
            };

            let restore = entry.in_flight.take().and_then(|flight| flight.restore);
            let before = entry.state.clone();
            let rollback = std::mem::take(&mut entry.rollback_on_error);

            let mutation_error = match outcome {
                Outcome::Data(data) => {
                    entry.confirmed = Some(data.clone());
                    entry.state = CacheState::Success { data };
                    entry.is_invalid = false;
                    None
                }
                Outcome::FetchFailed(error) => {
                    let data = if rollback {
                        debug!(key, generation, "rolling back optimistic data");
                        entry.confirmed.clone()
                    } else {
                        entry.state.data().cloned()
                    };
                    entry.state = CacheState::Error { data, error };
                    None
                }
                Outcome::MutationFailed(error) => {
                    if rollback {
                        debug!(key, generation, "rolling back optimistic data");
                    }
                    entry.state = restore.unwrap_or(CacheState::Initial);
                    Some(error)
                }
            };
            debug!(
                key,
                generation,
                failed = entry.state.is_error() || mutation_error.is_some(),
                "request settled"
            );

            let after = entry.state.clone();
            (
                Settled {
                    state: after.clone(),
                    mutation_error,
                },
                Transition { before, after },
            )
        };

        self.publish(key, transition);
        settled
    }

    /// Tell watchers and subscribers about a transition, unless the
    /// configured equality calls the states equal. Runs without the lock
    /// held while user code is called.
    fn publish(&self, key: &str, transition: Transition<T, E>) {
        let Transition { before, after } = transition;
        if (self.equality)(&before, &after) {
            return;
        }

        let listeners: Vec<Listener<T, E>> = {
            let registry = self.registry.lock();
            if let (Some(sender), Some(entry)) = (registry.watchers.get(key), registry.entries.get(key)) {
                sender.send_replace(entry.state.clone());
            }
            registry
                .listeners
                .get(key)
                .map(|map| map.values().cloned().collect())
                .unwrap_or_default()
        };

        for listener in &listeners {
            listener(&after);
        }
    }
}

fn settle<T, E>(
    cache: &Weak<CacheInner<T, E>>,
    key: &str,
    generation: u64,
    outcome: Outcome<T, E>,
) -> Settled<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    match cache.upgrade() {
        Some(cache) => cache.settle(key, generation, outcome),
        None => outcome.detached(),
    }
}

/// A keyed cache of async resources with request deduplication and
/// optimistic updates.
///
/// Cloning is cheap and clones share the same entries.
///
/// # Example
///
/// ```rust
/// use tideline_core::{CacheState, ResourceCache, UpdateOptions};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache: ResourceCache<String, String> =
///     ResourceCache::new(|key: String| async move { Ok(key.to_uppercase()) });
///
/// let state = cache.get("abc").await;
/// assert_eq!(state, CacheState::Success { data: "ABC".to_string() });
///
/// let state = cache
///     .mutate("abc", |_, _| async { Ok(Some("xyz".to_string())) }, UpdateOptions::new())
///     .await;
/// assert_eq!(state, Ok(CacheState::Success { data: "xyz".to_string() }));
/// # }
/// ```
pub struct ResourceCache<T, E> {
    inner: Arc<CacheInner<T, E>>,
}

impl<T, E> ResourceCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a cache that loads missing keys with `fetch` and notifies on
    /// shallow state changes.
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: PartialEq,
        E: PartialEq,
    {
        Self::with_options(fetch, CacheOptions::default())
    }

    /// Create a cache with custom [`CacheOptions`].
    pub fn with_options<F, Fut>(fetch: F, options: CacheOptions<T, E>) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            inner: Arc::new(CacheInner {
                fetch: Arc::new(move |key| fetch(key).boxed()),
                equality: options.state_equality,
                next_generation: AtomicU64::new(0),
                registry: Mutex::new(Registry::new()),
            }),
        }
    }

    /// Get the state for `key`, fetching it if it is missing or invalid.
    ///
    /// The caller is registered when `get` is called, not when the returned
    /// future is first polled. Fetch failures are stored in the returned
    /// state rather than returned as errors.
    ///
    /// The fetch itself only runs while some caller polls the request. An
    /// entry whose callers all drop their futures stays `Loading` until the
    /// next caller awaits it.
    pub fn get(&self, key: &str) -> impl Future<Output = CacheState<T, E>> + Send + 'static {
        let acquired = self
            .inner
            .acquire(key, Request::Fetch, false, UpdateOptions::new());
        async move { acquired.settle().await.state }
    }

    /// Mark `key` invalid and fetch it again.
    ///
    /// Optimistic data is shown before this returns. If the fetch fails the
    /// entry rolls back to the last confirmed data. A request already in
    /// flight is joined instead of started again.
    ///
    /// Like [`get`](Self::get), the returned future drives the fetch and must
    /// be awaited. Callers that only rely on subscribers or watchers should
    /// use [`spawn_revalidate`](Self::spawn_revalidate).
    pub fn revalidate(
        &self,
        key: &str,
        options: UpdateOptions<T>,
    ) -> impl Future<Output = CacheState<T, E>> + Send + 'static {
        let acquired = self.inner.acquire(key, Request::Fetch, true, options);
        async move { acquired.settle().await.state }
    }

    /// Revalidate `key` on a Tokio task, so the fetch runs whether or not
    /// anyone awaits the handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_revalidate(&self, key: &str, options: UpdateOptions<T>) -> JoinHandle<CacheState<T, E>> {
        let pending = self.revalidate(key, options);
        trace!(key, "revalidating in background");
        tokio::spawn(pending)
    }

    /// Mark `key` invalid and replace its data with the result of
    /// `mutation(confirmed_data, key)`.
    ///
    /// `Ok(Some(data))` confirms `data`. `Ok(None)` refetches the key.
    /// `Err(error)` restores the state from before the mutation and is
    /// returned to the caller instead of being stored.
    ///
    /// If a request is already in flight for `key`, `mutation` is not
    /// called and the caller receives that request's result. The mutation
    /// runs only once the returned future is awaited.
    pub fn mutate<F, Fut>(
        &self,
        key: &str,
        mutation: F,
        options: UpdateOptions<T>,
    ) -> impl Future<Output = Result<CacheState<T, E>, E>> + Send + 'static
    where
        F: FnOnce(Option<T>, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
    {
        let request = Request::Mutate(Box::new(move |data, key| mutation(data, key).boxed()));
        let acquired = self.inner.acquire(key, request, true, options);
        async move {
            let settled = acquired.settle().await;
            match settled.mutation_error {
                Some(error) => Err(error),
                None => Ok(settled.state),
            }
        }
    }

    /// Call `callback` with the new state whenever `key` changes.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> CacheSubscription
    where
        F: Fn(&CacheState<T, E>) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.inner.registry.lock();
            let id = registry.next_listener;
            registry.next_listener += 1;
            registry
                .listeners
                .entry(key.to_owned())
                .or_default()
                .insert(id, Arc::new(callback));
            id
        };

        let cache = Arc::downgrade(&self.inner);
        let key = key.to_owned();
        CacheSubscription::new(move || {
            if let Some(cache) = cache.upgrade() {
                let mut registry = cache.registry.lock();
                if let Some(listeners) = registry.listeners.get_mut(&key) {
                    listeners.shift_remove(&id);
                    if listeners.is_empty() {
                        registry.listeners.remove(&key);
                    }
                }
            }
        })
    }

    /// Watch `key` through a channel that always holds its latest state.
    ///
    /// The channel closes when the cache is cleared or dropped.
    pub fn watch(&self, key: &str) -> watch::Receiver<CacheState<T, E>> {
        let mut registry = self.inner.registry.lock();
        let current = registry
            .entries
            .get(key)
            .map(|entry| entry.state.clone())
            .unwrap_or_default();
        registry
            .watchers
            .entry(key.to_owned())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    /// Check if an entry exists for `key`.
    pub fn has(&self, key: &str) -> bool {
        self.inner.registry.lock().entries.contains_key(key)
    }

    /// Current state of `key` without starting a request.
    pub fn get_state(&self, key: &str) -> Option<CacheState<T, E>> {
        self.inner
            .registry
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.state.clone())
    }

    /// Copy of every entry's state, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, CacheState<T, E>> {
        self.inner
            .registry
            .lock()
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.state.clone()))
            .collect()
    }

    /// Number of entries, including ones still loading.
    pub fn len(&self) -> usize {
        self.inner.registry.lock().entries.len()
    }

    /// Check if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, subscriber and watcher.
    ///
    /// Requests in flight keep running; when they finish they find no
    /// entry and change nothing.
    pub fn clear(&self) {
        let cleared = {
            let mut registry = self.inner.registry.lock();
            let cleared = registry.entries.len();
            registry.entries.clear();
            registry.listeners.clear();
            registry.watchers.clear();
            cleared
        };
        debug!(entries = cleared, "cache cleared");
    }
}

impl<T, E> Clone for ResourceCache<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for ResourceCache<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("ResourceCache")
            .field("entries", &registry.entries.len())
            .field("subscribed_keys", &registry.listeners.len())
            .finish()
    }
}

// ---- Tests ----
