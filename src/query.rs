use std::{future::Future, rc::Rc, time::Duration, time::Instant};

use derive_ex::derive_ex;
use futures::future::LocalBoxFuture;
use serde::Serialize;

use crate::{
    cache::{CacheValue, QueryCache},
    core::{Runtime, Scheduler},
    Clock, QueryKey, Subscription, SystemClock,
};

pub use optimistic::OptimisticUpdate;

mod optimistic;

#[cfg(test)]
mod tests;

/// Settings shared by the keys of one query.
#[derive(Clone, Debug, PartialEq, Eq)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct QueryConfig {
    /// How long fetched data is considered fresh. Defaults to zero: data is stale as soon as it arrives.
    pub stale_time: Duration,

    /// Number of entries above which entries without listeners are evicted. Defaults to 100.
    pub max_cache_size: usize,
}

impl QueryConfig {
    pub const fn new() -> Self {
        Self {
            stale_time: Duration::ZERO,
            max_cache_size: 100,
        }
    }
    pub fn with_stale_time(self, stale_time: Duration) -> Self {
        Self { stale_time, ..self }
    }
    pub fn with_max_cache_size(self, max_cache_size: usize) -> Self {
        Self {
            max_cache_size,
            ..self
        }
    }
}

/// Factory of queries, infinite queries and mutations that run on one [`Runtime`].
#[derive(Clone)]
pub struct QueryClient {
    scheduler: Scheduler,
    clock: Rc<dyn Clock>,
    config: QueryConfig,
}

impl QueryClient {
    pub fn new(rt: &Runtime) -> Self {
        Self::with_config(rt, QueryConfig::new())
    }
    pub fn with_config(rt: &Runtime, config: QueryConfig) -> Self {
        Self {
            scheduler: rt.scheduler().clone(),
            clock: Rc::new(SystemClock),
            config,
        }
    }

    /// Replaces the time source used for staleness windows.
    pub fn with_clock(self, clock: impl Clock + 'static) -> Self {
        Self {
            clock: Rc::new(clock),
            ..self
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Creates a query whose entries are filled by `fetch`.
    pub fn query<A, T, E, Fut>(&self, fetch: impl Fn(A) -> Fut + 'static) -> Query<A, T, E>
    where
        A: Serialize + Clone + 'static,
        T: 'static,
        E: Clone + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        self.query_with(self.config.clone(), fetch)
    }

    /// Creates a query with its own settings.
    pub fn query_with<A, T, E, Fut>(
        &self,
        config: QueryConfig,
        fetch: impl Fn(A) -> Fut + 'static,
    ) -> Query<A, T, E>
    where
        A: Serialize + Clone + 'static,
        T: 'static,
        E: Clone + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        Query(Rc::new(QueryNode {
            cache: self.cache(config),
            fetch: Box::new(move |args: A| -> LocalBoxFuture<'static, Result<T, E>> {
                Box::pin(fetch(args))
            }),
        }))
    }

    pub(crate) fn cache<V: CacheValue>(&self, config: QueryConfig) -> QueryCache<V> {
        QueryCache::new(self.scheduler.clone(), self.clock.clone(), config)
    }
}

/// Cached result of one query key.
#[derive(Debug)]
#[derive_ex(Clone, Default)]
pub struct QueryState<T, E> {
    pub data: Option<Rc<T>>,
    pub loading: bool,
    pub error: Option<E>,

    /// Time of the last successful fetch or write. `None` if never fetched or invalidated.
    pub fetched_at: Option<Instant>,
}

impl<T: 'static, E: Clone + 'static> CacheValue for QueryState<T, E> {
    fn is_loading(&self) -> bool {
        self.loading
    }
    fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }
}

type FetchFn<A, T, E> = dyn Fn(A) -> LocalBoxFuture<'static, Result<T, E>>;

/// Keyed asynchronous query.
///
/// Each argument value addresses its own cache entry.
/// For every key, only the result of the most recently issued fetch is applied.
#[derive_ex(Clone, bound())]
pub struct Query<A, T, E>(Rc<QueryNode<A, T, E>>);

struct QueryNode<A, T, E> {
    cache: QueryCache<QueryState<T, E>>,
    fetch: Box<FetchFn<A, T, E>>,
}

impl<A, T, E> Query<A, T, E>
where
    A: Serialize + Clone + 'static,
    T: 'static,
    E: Clone + 'static,
{
    /// Fetches `args` unless its data is fresh or a fetch is already in flight.
    pub fn ensure(&self, args: &A) {
        self.ensure_with(args, false)
    }

    /// Fetches `args` even if its data is fresh or a fetch is in flight.
    ///
    /// The fetch in flight is superseded and its result discarded.
    pub fn refetch(&self, args: &A) {
        self.ensure_with(args, true)
    }

    /// Warms the entry of `args` without subscribing to it.
    pub fn prefetch(&self, args: &A) {
        self.ensure(args)
    }

    fn ensure_with(&self, args: &A, force: bool) {
        let Some(key) = QueryKey::of(args) else {
            return;
        };
        let cache = &self.0.cache;
        if !force {
            if let Some(s) = cache.get(&key) {
                if s.loading {
                    return;
                }
                if s.data.is_some() && cache.is_fresh(&key) {
                    return;
                }
            }
        }
        let id = cache.issue(&key, |s| s.loading = true);
        tracing::debug!(key = %key, id, "fetching query");
        let fut = (self.0.fetch)(args.clone());
        let cache = cache.clone();
        self.0.cache.scheduler().spawn(async move {
            let result = fut.await;
            let now = cache.now();
            let is_applied = cache.commit(&key, id, |s| {
                s.loading = false;
                match result {
                    Ok(data) => {
                        s.data = Some(Rc::new(data));
                        s.error = None;
                        s.fetched_at = Some(now);
                    }
                    Err(e) => s.error = Some(e),
                }
            });
            if is_applied {
                tracing::debug!(key = %key, id, "query settled");
            } else {
                tracing::debug!(key = %key, id, "discarding superseded query result");
            }
        });
    }

    /// Marks the entry of `args` as stale. Its data is kept.
    pub fn invalidate(&self, args: &A) {
        if let Some(key) = QueryKey::of(args) {
            self.0
                .cache
                .update_existing(&key, |s, _| s.fetched_at = None);
        }
    }

    /// Marks every entry as stale.
    pub fn invalidate_all(&self) {
        self.0.cache.update_all(|s| s.fetched_at = None);
    }

    /// Writes `data` to the entry of `args` without fetching.
    pub fn set_query_data(&self, args: &A, data: T) {
        self.update_query_data(args, |_| data)
    }

    /// Writes the value returned by `f` for the current data of `args` without fetching.
    pub fn update_query_data(&self, args: &A, f: impl FnOnce(Option<&T>) -> T) {
        let Some(key) = QueryKey::of(args) else {
            return;
        };
        let prev = self.0.cache.get(&key).and_then(|s| s.data);
        let data = Rc::new(f(prev.as_deref()));
        let now = self.0.cache.now();
        self.0.cache.write(&key, |s| {
            s.data = Some(data);
            s.fetched_at = Some(now);
        });
    }

    pub fn get_query_data(&self, args: &A) -> Option<Rc<T>> {
        self.0.cache.get(&QueryKey::of(args)?)?.data
    }

    /// Returns the state of `args`. An entry that was never created reads as the empty state.
    pub fn get(&self, args: &A) -> QueryState<T, E> {
        QueryKey::of(args)
            .and_then(|key| self.0.cache.get(&key))
            .unwrap_or_default()
    }

    pub fn is_stale(&self, args: &A) -> bool {
        QueryKey::of(args).map_or(true, |key| !self.0.cache.is_fresh(&key))
    }

    /// Registers `listener` for the entry of `args` and ensures it is fetched.
    ///
    /// While the subscription is alive, the entry is never evicted.
    pub fn subscribe(
        &self,
        args: &A,
        listener: impl Fn(&QueryState<T, E>) + 'static,
    ) -> Subscription {
        let Some(key) = QueryKey::of(args) else {
            return Subscription::empty();
        };
        let s = self.0.cache.subscribe(&key, listener);
        self.ensure(args);
        s
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.0.cache.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
