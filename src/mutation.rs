use std::{cell::RefCell, future::Future, rc::Rc};

use derive_ex::derive_ex;
use futures::future::LocalBoxFuture;
use slabmap::SlabMap;

use crate::{core::Scheduler, QueryClient, Subscription};


/// State of one [`Mutation`] instance.
#[derive(Debug)]
#[derive_ex(Clone, Default)]
pub struct MutationState<T, E> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<E>,
}

type MutateFn<A, T, E> = dyn Fn(A) -> LocalBoxFuture<'static, Result<T, E>>;

/// Definition of an asynchronous command with lifecycle callbacks.
///
/// The definition holds no state. Each [`Mutation`] created by [`instance`](Self::instance) has its own.
#[derive_ex(Clone, bound())]
pub struct MutationDef<A, T, E> {
    scheduler: Scheduler,
    f: Rc<MutateFn<A, T, E>>,
    on_success: Option<Rc<dyn Fn(&T)>>,
    on_error: Option<Rc<dyn Fn(&E)>>,
    on_settled: Option<Rc<dyn Fn(Option<&T>, Option<&E>)>>,
}

impl QueryClient {
    pub fn mutation<A, T, E, Fut>(&self, f: impl Fn(A) -> Fut + 'static) -> MutationDef<A, T, E>
    where
        A: 'static,
        T: Clone + 'static,
        E: Clone + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        MutationDef {
            scheduler: self.scheduler().clone(),
            f: Rc::new(move |args: A| -> LocalBoxFuture<'static, Result<T, E>> {
                Box::pin(f(args))
            }),
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

impl<A: 'static, T: Clone + 'static, E: Clone + 'static> MutationDef<A, T, E> {
    pub fn on_success(mut self, f: impl Fn(&T) + 'static) -> Self {
        self.on_success = Some(Rc::new(f));
        self
    }
    pub fn on_error(mut self, f: impl Fn(&E) + 'static) -> Self {
        self.on_error = Some(Rc::new(f));
        self
    }

    /// Sets the function called after `on_success` or `on_error`
    /// with the result data or the error.
    pub fn on_settled(mut self, f: impl Fn(Option<&T>, Option<&E>) + 'static) -> Self {
        self.on_settled = Some(Rc::new(f));
        self
    }

    pub fn instance(&self) -> Mutation<A, T, E> {
        Mutation(Rc::new(MutationNode {
            def: self.clone(),
            state: RefCell::new(MutationState::default()),
            listeners: RefCell::new(SlabMap::new()),
        }))
    }
}

/// Instance of a [`MutationDef`] owning its own [`MutationState`].
#[derive_ex(Clone, bound())]
pub struct Mutation<A, T, E>(Rc<MutationNode<A, T, E>>);

type Listener<T, E> = Rc<dyn Fn(&MutationState<T, E>)>;

struct MutationNode<A, T, E> {
    def: MutationDef<A, T, E>,
    state: RefCell<MutationState<T, E>>,
    listeners: RefCell<SlabMap<Listener<T, E>>>,
}

impl<A, T, E> MutationNode<A, T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn set_state(&self, f: impl FnOnce(&mut MutationState<T, E>)) {
        let state = {
            let mut state = self.state.borrow_mut();
            f(&mut state);
            state.clone()
        };
        let listeners: Vec<_> = self.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(&state);
        }
    }
}

impl<A, T, E> Mutation<A, T, E>
where
    A: 'static,
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Runs the mutation and returns its result.
    ///
    /// `loading` is set before this returns. The state and the callbacks are updated before the future completes.
    ///
    /// Overlapping calls on one instance are not coordinated: the first to settle clears `loading`
    /// and the last to settle determines `data` and `error`.
    pub fn mutate_async(&self, args: A) -> impl Future<Output = Result<T, E>> + 'static {
        let node = self.0.clone();
        node.set_state(|s| s.loading = true);
        let fut = (node.def.f)(args);
        async move {
            let result = fut.await;
            let def = &node.def;
            match &result {
                Ok(data) => {
                    node.set_state(|s| {
                        s.data = Some(data.clone());
                        s.loading = false;
                        s.error = None;
                    });
                    if let Some(f) = &def.on_success {
                        f(data);
                    }
                    if let Some(f) = &def.on_settled {
                        f(Some(data), None);
                    }
                }
                Err(e) => {
                    node.set_state(|s| {
                        s.loading = false;
                        s.error = Some(e.clone());
                    });
                    if let Some(f) = &def.on_error {
                        f(e);
                    }
                    if let Some(f) = &def.on_settled {
                        f(None, Some(e));
                    }
                }
            }
            result
        }
    }

    /// Runs the mutation on the scheduler. A failure is observable only through [`state`](Self::state).
    pub fn mutate(&self, args: A) {
        let fut = self.mutate_async(args);
        self.0.def.scheduler.spawn(async move {
            let _ = fut.await;
        });
    }

    /// Clears the state to its initial value.
    pub fn reset(&self) {
        self.0.set_state(|s| *s = MutationState::default());
    }

    pub fn state(&self) -> MutationState<T, E> {
        self.0.state.borrow().clone()
    }

    pub fn subscribe(&self, listener: impl Fn(&MutationState<T, E>) + 'static) -> Subscription {
        let key = self.0.listeners.borrow_mut().insert(Rc::new(listener));
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.listeners.borrow_mut().remove(key);
        })
    }
}
