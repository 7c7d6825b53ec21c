//! Cache entries and the requests that fill them.

use std::sync::Arc;

use futures_util::future::{BoxFuture, Shared};

use super::CacheState;

pub(crate) type Fetcher<T, E> =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

pub(crate) type Mutation<T, E> =
    Box<dyn FnOnce(Option<T>, String) -> BoxFuture<'static, Result<Option<T>, E>> + Send>;

/// A request every concurrent caller for a key awaits together.
pub(crate) type Flight<T, E> = Shared<BoxFuture<'static, Settled<T, E>>>;

/// What each caller of a settled request receives.
#[derive(Debug, Clone)]
pub(crate) struct Settled<T, E> {
    pub state: CacheState<T, E>,
    /// Set when the request was a mutation and the mutation failed.
    pub mutation_error: Option<E>,
}

pub(crate) enum Request<T, E> {
    Fetch,
    Mutate(Mutation<T, E>),
}

impl<T, E> Request<T, E> {
    pub(crate) fn is_mutation(&self) -> bool {
        matches!(self, Request::Mutate(_))
    }

    /// Run the request to completion. A mutation that returns no data
    /// falls back to a fetch.
    pub(crate) async fn run(
        self,
        fetch: Fetcher<T, E>,
        key: String,
        confirmed: Option<T>,
    ) -> Outcome<T, E> {
        match self {
            Request::Fetch => Outcome::fetched(fetch(key).await),
            Request::Mutate(mutation) => match mutation(confirmed, key.clone()).await {
                Ok(Some(data)) => Outcome::Data(data),
                Ok(None) => Outcome::fetched(fetch(key).await),
                Err(error) => Outcome::MutationFailed(error),
            },
        }
    }
}

pub(crate) enum Outcome<T, E> {
    Data(T),
    FetchFailed(E),
    MutationFailed(E),
}

impl<T, E> Outcome<T, E> {
    fn fetched(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Outcome::Data(data),
            Err(error) => Outcome::FetchFailed(error),
        }
    }

    /// The result for a caller whose request no longer owns the entry.
    pub(crate) fn detached(self) -> Settled<T, E> {
        match self {
            Outcome::Data(data) => Settled {
                state: CacheState::Success { data },
                mutation_error: None,
            },
            Outcome::FetchFailed(error) => Settled {
                state: CacheState::Error { data: None, error },
                mutation_error: None,
            },
            Outcome::MutationFailed(error) => Settled {
                state: CacheState::Initial,
                mutation_error: Some(error),
            },
        }
    }
}

pub(crate) struct InFlight<T, E> {
    pub generation: u64,
    pub future: Flight<T, E>,
    /// State to restore if this request is a mutation and it fails.
    pub restore: Option<CacheState<T, E>>,
}

pub(crate) struct Entry<T, E> {
    pub state: CacheState<T, E>,
    pub in_flight: Option<InFlight<T, E>>,
    /// Cached data or error must not be served without a fresh request.
    pub is_invalid: bool,
    /// Last data a request confirmed. Never optimistic.
    pub confirmed: Option<T>,
    /// Optimistic data is showing and must be rolled back on failure.
    pub rollback_on_error: bool,
}

impl<T, E> Entry<T, E> {
    pub(crate) fn new() -> Self {
        Self {
            state: CacheState::Initial,
            in_flight: None,
            is_invalid: true,
            confirmed: None,
            rollback_on_error: false,
        }
    }

    pub(crate) fn generation(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|flight| flight.generation)
    }
}
