use std::{future::Future, rc::Rc};

use futures::future::LocalBoxFuture;
use serde::Serialize;

use super::Query;
use crate::QueryKey;

/// Cache write applied before a remote operation and rolled back if it fails.
///
/// ```ignore
/// let update = OptimisticUpdate::new(
///     |todos: Option<&Vec<String>>| {
///         let mut todos = todos.cloned().unwrap_or_default();
///         todos.push("new".into());
///         todos
///     },
///     move || api.add_todo("new"),
/// )
/// .on_error(|e, _| eprintln!("{e}"));
/// query.optimistic_update(&(), update).await?;
/// ```
pub struct OptimisticUpdate<T, R, E> {
    updater: Box<dyn FnOnce(Option<&T>) -> T>,
    remote: Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<R, E>>>,
    on_success: Option<Box<dyn FnOnce(&R)>>,
    on_error: Option<Box<dyn FnOnce(&E, Option<&Rc<T>>)>>,
    on_settled: Option<Box<dyn FnOnce()>>,
}

impl<T: 'static, R: 'static, E: 'static> OptimisticUpdate<T, R, E> {
    pub fn new<Fut>(
        updater: impl FnOnce(Option<&T>) -> T + 'static,
        remote: impl FnOnce() -> Fut + 'static,
    ) -> Self
    where
        Fut: Future<Output = Result<R, E>> + 'static,
    {
        Self {
            updater: Box::new(updater),
            remote: Box::new(move || -> LocalBoxFuture<'static, Result<R, E>> {
                Box::pin(remote())
            }),
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }

    pub fn on_success(mut self, f: impl FnOnce(&R) + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Sets the function called after the rollback with the error and the data restored by it.
    pub fn on_error(mut self, f: impl FnOnce(&E, Option<&Rc<T>>) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Sets the function called last, whatever the outcome.
    pub fn on_settled(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_settled = Some(Box::new(f));
        self
    }
}

impl<A, T, QE> Query<A, T, QE>
where
    A: Serialize + Clone + 'static,
    T: 'static,
    QE: Clone + 'static,
{
    /// Applies `update.updater` to the data of `args` now, then runs the remote operation.
    ///
    /// A fetch of `args` in flight is superseded and its result discarded.
    /// If the remote operation fails, the data and fetch time of `args` are restored
    /// to what they were before the update and the error is returned.
    /// The rollback is skipped if `args` was fetched again in the meantime.
    pub fn optimistic_update<R: 'static, E: 'static>(
        &self,
        args: &A,
        update: OptimisticUpdate<T, R, E>,
    ) -> impl Future<Output = Result<R, E>> + 'static {
        let OptimisticUpdate {
            updater,
            remote,
            on_success,
            on_error,
            on_settled,
        } = update;
        let cache = self.0.cache.clone();
        let key = QueryKey::of(args);
        let snapshot = key.as_ref().map(|key| {
            let prev = cache.get(key).unwrap_or_default();
            let data = Rc::new(updater(prev.data.as_deref()));
            let now = cache.now();
            let id = cache.issue(key, |s| {
                s.data = Some(data);
                s.loading = false;
                s.fetched_at = Some(now);
            });
            (id, prev.data, prev.fetched_at)
        });
        let fut = remote();
        async move {
            let result = fut.await;
            match &result {
                Ok(value) => {
                    if let Some(f) = on_success {
                        f(value);
                    }
                }
                Err(e) => {
                    let mut restored = None;
                    if let (Some(key), Some((id, data, fetched_at))) = (&key, snapshot) {
                        let is_applied = cache.commit(key, id, |s| {
                            restored = data.clone();
                            s.data = data;
                            s.fetched_at = fetched_at;
                        });
                        if is_applied {
                            tracing::debug!(key = %key, "rolled back optimistic update");
                        } else {
                            tracing::debug!(key = %key, "keeping data fetched after optimistic update");
                        }
                    }
                    if let Some(f) = on_error {
                        f(e, restored.as_ref());
                    }
                }
            }
            if let Some(f) = on_settled {
                f();
            }
            result
        }
    }
}
