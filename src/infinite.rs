use std::{future::Future, rc::Rc, time::Instant};

use derive_ex::derive_ex;
use futures::future::LocalBoxFuture;
use serde::Serialize;

use crate::{
    cache::{CacheValue, QueryCache},
    QueryClient, QueryConfig, QueryKey, Subscription,
};


/// Cached pages of one infinite query key.
///
/// `pages` and `page_params` always have the same length.
/// The parameter of the first page fetched by [`InfiniteQuery::ensure`] is `None`.
#[derive(Debug)]
#[derive_ex(Clone, Default)]
pub struct InfiniteState<T, P, E> {
    pub pages: Vec<Rc<T>>,
    pub page_params: Vec<Option<P>>,
    pub loading: bool,
    pub error: Option<E>,
    pub fetched_at: Option<Instant>,
    pub is_fetching_next: bool,
    pub is_fetching_prev: bool,
}

impl<T, P, E> InfiniteState<T, P, E> {
    /// Returns `true` if any page request is in flight.
    pub fn is_fetching(&self) -> bool {
        self.loading || self.is_fetching_next || self.is_fetching_prev
    }
}

impl<T: 'static, P: Clone + 'static, E: Clone + 'static> CacheValue for InfiniteState<T, P, E> {
    fn is_loading(&self) -> bool {
        self.is_fetching()
    }
    fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }
}

type FetchPageFn<A, T, P, E> = dyn Fn(A, Option<P>) -> LocalBoxFuture<'static, Result<T, E>>;
type PageParamFn<T, P> = dyn Fn(&T, &[Rc<T>]) -> Option<P>;

/// Builder of an [`InfiniteQuery`], created by [`QueryClient::infinite_query`].
pub struct InfiniteQueryBuilder<A, T, P, E> {
    client: QueryClient,
    config: QueryConfig,
    fetch: Box<FetchPageFn<A, T, P, E>>,
    next_page_param: Box<PageParamFn<T, P>>,
    previous_page_param: Option<Box<PageParamFn<T, P>>>,
}

impl QueryClient {
    /// Creates a paginated query.
    ///
    /// `fetch` receives the arguments and the cursor of the requested page, `None` for the first page.
    /// `next_page_param` receives the last page and all pages, and returns the cursor of the next page
    /// or `None` if there is no next page.
    pub fn infinite_query<A, T, P, E, Fut>(
        &self,
        fetch: impl Fn(A, Option<P>) -> Fut + 'static,
        next_page_param: impl Fn(&T, &[Rc<T>]) -> Option<P> + 'static,
    ) -> InfiniteQueryBuilder<A, T, P, E>
    where
        A: Serialize + Clone + 'static,
        T: 'static,
        P: Clone + 'static,
        E: Clone + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        InfiniteQueryBuilder {
            client: self.clone(),
            config: self.config().clone(),
            fetch: Box::new(
                move |args: A, param: Option<P>| -> LocalBoxFuture<'static, Result<T, E>> {
                    Box::pin(fetch(args, param))
                },
            ),
            next_page_param: Box::new(next_page_param),
            previous_page_param: None,
        }
    }
}

impl<A, T, P, E> InfiniteQueryBuilder<A, T, P, E>
where
    A: Serialize + Clone + 'static,
    T: 'static,
    P: Clone + 'static,
    E: Clone + 'static,
{
    /// Enables [`InfiniteQuery::fetch_previous_page`].
    ///
    /// `f` receives the first page and all pages.
    pub fn previous_page_param(mut self, f: impl Fn(&T, &[Rc<T>]) -> Option<P> + 'static) -> Self {
        self.previous_page_param = Some(Box::new(f));
        self
    }
    pub fn config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }
    pub fn build(self) -> InfiniteQuery<A, T, P, E> {
        InfiniteQuery(Rc::new(InfiniteQueryNode {
            cache: self.client.cache(self.config),
            fetch: self.fetch,
            next_page_param: self.next_page_param,
            previous_page_param: self.previous_page_param,
        }))
    }
}

/// Keyed paginated query.
#[derive_ex(Clone, bound())]
pub struct InfiniteQuery<A, T, P, E>(Rc<InfiniteQueryNode<A, T, P, E>>);

struct InfiniteQueryNode<A, T, P, E> {
    cache: QueryCache<InfiniteState<T, P, E>>,
    fetch: Box<FetchPageFn<A, T, P, E>>,
    next_page_param: Box<PageParamFn<T, P>>,
    previous_page_param: Option<Box<PageParamFn<T, P>>>,
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Next,
    Previous,
}

impl<A, T, P, E> InfiniteQuery<A, T, P, E>
where
    A: Serialize + Clone + 'static,
    T: 'static,
    P: Clone + 'static,
    E: Clone + 'static,
{
    /// Fetches the first page of `args` unless it is fresh or already loading.
    pub fn ensure(&self, args: &A) {
        self.ensure_with(args, false)
    }

    /// Discards the accumulated pages of `args` and fetches the first page again.
    ///
    /// Page fetches in flight are superseded.
    pub fn refetch(&self, args: &A) {
        self.ensure_with(args, true)
    }

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
                if !s.pages.is_empty() && cache.is_fresh(&key) {
                    return;
                }
            }
        }
        let id = cache.issue(&key, |s| s.loading = true);
        tracing::debug!(key = %key, id, "fetching first page");
        let fut = (self.0.fetch)(args.clone(), None);
        let cache = cache.clone();
        self.0.cache.scheduler().spawn(async move {
            let result = fut.await;
            let now = cache.now();
            let is_applied = cache.commit(&key, id, |s| {
                s.loading = false;
                match result {
                    Ok(page) => {
                        s.pages = vec![Rc::new(page)];
                        s.page_params = vec![None];
                        s.error = None;
                        s.fetched_at = Some(now);
                    }
                    Err(e) => s.error = Some(e),
                }
            });
            if !is_applied {
                tracing::debug!(key = %key, id, "discarding superseded first page");
            }
        });
    }

    /// Fetches the page after the last page of `args` and appends it.
    ///
    /// Does nothing while the first page is loading, if there is no page yet,
    /// if a next page is already being fetched or if there is no next page.
    pub fn fetch_next_page(&self, args: &A) {
        self.fetch_page(args, Direction::Next)
    }

    /// Fetches the page before the first page of `args` and prepends it.
    ///
    /// Does nothing while the first page is loading or if no previous page parameter function is configured.
    pub fn fetch_previous_page(&self, args: &A) {
        self.fetch_page(args, Direction::Previous)
    }

    fn fetch_page(&self, args: &A, direction: Direction) {
        let Some(key) = QueryKey::of(args) else {
            return;
        };
        let cache = &self.0.cache;
        let Some(s) = cache.get(&key) else {
            return;
        };
        let is_fetching = match direction {
            Direction::Next => s.is_fetching_next,
            Direction::Previous => s.is_fetching_prev,
        };
        if is_fetching || s.loading {
            return;
        }
        let Some(param) = self.page_param(&s.pages, direction) else {
            return;
        };
        let Some(id) = cache.request_id(&key) else {
            return;
        };
        cache.write(&key, |s| set_fetching(s, direction, true));
        tracing::debug!(key = %key, ?direction, "fetching page");
        let fut = (self.0.fetch)(args.clone(), Some(param.clone()));
        let cache = cache.clone();
        self.0.cache.scheduler().spawn(async move {
            let result = fut.await;
            let now = cache.now();
            cache.update_existing(&key, |s, latest| {
                set_fetching(s, direction, false);
                if latest != id {
                    tracing::debug!(key = %key, ?direction, "discarding page fetched before refetch");
                    return;
                }
                match result {
                    Ok(page) => {
                        let page = Rc::new(page);
                        match direction {
                            Direction::Next => {
                                s.pages.push(page);
                                s.page_params.push(Some(param));
                            }
                            Direction::Previous => {
                                s.pages.insert(0, page);
                                s.page_params.insert(0, Some(param));
                            }
                        }
                        s.error = None;
                        s.fetched_at = Some(now);
                    }
                    Err(e) => s.error = Some(e),
                }
            });
        });
    }

    fn page_param(&self, pages: &[Rc<T>], direction: Direction) -> Option<P> {
        match direction {
            Direction::Next => (self.0.next_page_param)(pages.last()?, pages),
            Direction::Previous => (self.0.previous_page_param.as_ref()?)(pages.first()?, pages),
        }
    }

    /// Returns `true` if the last page of `args` has a next page.
    pub fn has_next_page(&self, args: &A) -> bool {
        self.page_param(&self.get(args).pages, Direction::Next)
            .is_some()
    }

    /// Returns `true` if the first page of `args` has a previous page.
    pub fn has_previous_page(&self, args: &A) -> bool {
        self.page_param(&self.get(args).pages, Direction::Previous)
            .is_some()
    }

    /// Marks the pages of `args` as stale. The pages are kept.
    pub fn invalidate(&self, args: &A) {
        if let Some(key) = QueryKey::of(args) {
            self.0
                .cache
                .update_existing(&key, |s, _| s.fetched_at = None);
        }
    }
    pub fn invalidate_all(&self) {
        self.0.cache.update_all(|s| s.fetched_at = None);
    }

    pub fn get(&self, args: &A) -> InfiniteState<T, P, E> {
        QueryKey::of(args)
            .and_then(|key| self.0.cache.get(&key))
            .unwrap_or_default()
    }

    /// Registers `listener` for the pages of `args` and ensures the first page is fetched.
    pub fn subscribe(
        &self,
        args: &A,
        listener: impl Fn(&InfiniteState<T, P, E>) + 'static,
    ) -> Subscription {
        let Some(key) = QueryKey::of(args) else {
            return Subscription::empty();
        };
        let s = self.0.cache.subscribe(&key, listener);
        self.ensure(args);
        s
    }

    pub fn len(&self) -> usize {
        self.0.cache.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn set_fetching<T, P, E>(s: &mut InfiniteState<T, P, E>, direction: Direction, value: bool) {
    match direction {
        Direction::Next => s.is_fetching_next = value,
        Direction::Previous => s.is_fetching_prev = value,
    }
}
