use std::{
    cell::{Cell, RefCell},
    convert::Infallible,
    ops::Deref,
    rc::Rc,
};

use derive_ex::derive_ex;
use serde::{de::DeserializeOwned, Serialize};
use slabmap::SlabMap;

use crate::{
    persist::Persister, produce, Computed, ComputedValues, Draft, PersistOptions, StateFields,
    Subscription,
};


/// Immutable view of a committed state and the derivations computed from it.
#[derive_ex(Clone, bound())]
pub struct Snapshot<S> {
    state: Rc<S>,
    computed: Rc<ComputedValues>,
}

impl<S: StateFields> Snapshot<S> {
    pub fn state(&self) -> &Rc<S> {
        &self.state
    }
    pub fn computed(&self) -> &ComputedValues {
        &self.computed
    }

    /// Reads `name` from the merged view of the state and its derivations.
    ///
    /// A derivation shadows a state field of the same name.
    pub fn get<T: 'static>(&self, name: &str) -> Option<&T> {
        if let Some(value) = self.computed.get_any(name) {
            return value.downcast_ref();
        }
        self.state.field(S::field_index(name)?)?.downcast_ref()
    }

    /// Returns `true` if both snapshots hold the same state value.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.state, &other.state)
    }
}
impl<S> Deref for Snapshot<S> {
    type Target = S;
    fn deref(&self) -> &Self::Target {
        &self.state
    }
}
impl<S: std::fmt::Debug> std::fmt::Debug for Snapshot<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("state", &self.state)
            .field("computed", &self.computed)
            .finish()
    }
}

type Listener<S> = Rc<dyn Fn(&Snapshot<S>, &Snapshot<S>)>;

/// Reactive container of a single state value.
///
/// Every write produces a new snapshot, recomputes the derivations that depend on the changed fields,
/// and notifies the listeners with the new and the previous snapshot.
#[derive_ex(Clone, bound())]
pub struct Store<S>(Rc<StoreNode<S>>);

struct StoreNode<S> {
    snapshot: RefCell<Snapshot<S>>,
    computed: RefCell<Computed<S>>,
    listeners: RefCell<SlabMap<Listener<S>>>,
    persister: Option<Persister<S>>,
    has_hydrated: Cell<bool>,
}

impl<S: StateFields> Store<S> {
    pub fn new(initial: S) -> Self {
        Self::builder(initial).build()
    }
    pub fn with_computed(initial: S, computed: Computed<S>) -> Self {
        Self::builder(initial).computed(computed).build()
    }
    pub fn builder(initial: S) -> StoreBuilder<S> {
        StoreBuilder {
            initial,
            computed: Computed::new(),
            persister: None,
        }
    }

    /// Returns the current snapshot.
    pub fn get(&self) -> Snapshot<S> {
        self.0.snapshot.borrow().clone()
    }

    /// Replaces the whole state.
    pub fn set(&self, state: S) {
        self.commit(Rc::new(state));
    }

    /// Overwrites the fields present in `patch`.
    pub fn merge(&self, patch: S::Patch) {
        self.update(|draft| draft.apply_patch(patch));
    }

    /// Writes through a [`Draft`] of the current state.
    ///
    /// If the draft is never mutably accessed, nothing is committed.
    pub fn update(&self, f: impl FnOnce(&mut Draft<S>)) {
        let ret = self.try_update(|draft| {
            f(draft);
            Ok::<_, Infallible>(())
        });
        match ret {
            Ok(()) => {}
            Err(e) => match e {},
        }
    }

    /// Fallible version of [`update`](Self::update).
    ///
    /// If `f` fails, the error is returned and the current state stays as it was.
    pub fn try_update<R, E>(&self, f: impl FnOnce(&mut Draft<S>) -> Result<R, E>) -> Result<R, E> {
        let base = self.0.snapshot.borrow().state.clone();
        let (next, ret) = produce(&base, f)?;
        self.commit(next);
        Ok(ret)
    }

    /// Registers `listener` called with the new and the previous snapshot after each commit.
    pub fn subscribe(&self, listener: impl Fn(&Snapshot<S>, &Snapshot<S>) + 'static) -> Subscription {
        let key = self.0.listeners.borrow_mut().insert(Rc::new(listener));
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.listeners.borrow_mut().remove(key);
        })
    }

    /// Registers `callback` called when the value chosen by `selector` changes.
    ///
    /// The selector runs against the new and the previous snapshot of each commit,
    /// and `callback` is called with both selected values if they are not equal by `options.equality_fn`.
    pub fn subscribe_with_selector<T: 'static>(
        &self,
        selector: impl Fn(&Snapshot<S>) -> T + 'static,
        callback: impl Fn(&T, &T) + 'static,
        options: SubscribeOptions<T>,
    ) -> Subscription {
        if options.fire_immediately {
            let value = selector(&self.get());
            callback(&value, &value);
        }
        let equality_fn = options.equality_fn;
        self.subscribe(move |next, prev| {
            let next = selector(next);
            let prev = selector(prev);
            if !equality_fn(&next, &prev) {
                callback(&next, &prev);
            }
        })
    }

    /// Reads the persisted state again and merges it into the current state.
    ///
    /// Does nothing if the store is not persisted or nothing is stored.
    pub fn rehydrate(&self) {
        let Some(persister) = &self.0.persister else {
            return;
        };
        let state = S::clone(&self.0.snapshot.borrow().state);
        let (state, applied) = persister.hydrate(state);
        if applied {
            self.0.has_hydrated.set(true);
            self.commit(Rc::new(state));
        }
    }

    /// Returns `true` if a persisted state has been applied to this store.
    pub fn has_hydrated(&self) -> bool {
        self.0.has_hydrated.get()
    }

    /// Removes the persisted state. The in-memory state is unaffected.
    pub fn clear_storage(&self) {
        if let Some(persister) = &self.0.persister {
            persister.clear();
        }
    }

    fn commit(&self, next: Rc<S>) {
        let prev = self.get();
        if Rc::ptr_eq(&prev.state, &next) {
            return;
        }
        let computed = self
            .0
            .computed
            .borrow_mut()
            .recompute(Some(&prev.state), &next);
        let next = Snapshot {
            state: next,
            computed: Rc::new(computed),
        };
        *self.0.snapshot.borrow_mut() = next.clone();
        if let Some(persister) = &self.0.persister {
            persister.save(&next.state);
        }
        let listeners: Vec<_> = self.0.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(&next, &prev);
        }
    }
}

/// Builder for a [`Store`] with derivations or persistence.
pub struct StoreBuilder<S> {
    initial: S,
    computed: Computed<S>,
    persister: Option<Persister<S>>,
}

impl<S: StateFields> StoreBuilder<S> {
    pub fn computed(mut self, computed: Computed<S>) -> Self {
        self.computed = computed;
        self
    }
    pub fn persist<P: Serialize + DeserializeOwned + 'static>(
        mut self,
        options: PersistOptions<S, P>,
    ) -> Self {
        self.persister = Some(options.into_persister());
        self
    }

    pub fn build(self) -> Store<S> {
        let Self {
            initial,
            mut computed,
            persister,
        } = self;
        computed.warn_collisions();
        let (initial, has_hydrated) = match &persister {
            Some(persister) => persister.hydrate(initial),
            None => (initial, false),
        };
        let state = Rc::new(initial);
        let values = computed.recompute(None, &state);
        Store(Rc::new(StoreNode {
            snapshot: RefCell::new(Snapshot {
                state,
                computed: Rc::new(values),
            }),
            computed: RefCell::new(computed),
            listeners: RefCell::new(SlabMap::new()),
            persister,
            has_hydrated: Cell::new(has_hydrated),
        }))
    }
}

/// Options of [`Store::subscribe_with_selector`].
pub struct SubscribeOptions<T> {
    pub equality_fn: Rc<dyn Fn(&T, &T) -> bool>,

    /// Calls the callback once with the current selected value on subscription.
    pub fire_immediately: bool,
}

impl<T: PartialEq + 'static> Default for SubscribeOptions<T> {
    fn default() -> Self {
        Self::with_equality(|a: &T, b: &T| a == b)
    }
}

impl<T> SubscribeOptions<T> {
    pub fn with_equality(equality_fn: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            equality_fn: Rc::new(equality_fn),
            fire_immediately: false,
        }
    }
    pub fn fire_immediately(mut self, value: bool) -> Self {
        self.fire_immediately = value;
        self
    }
}
