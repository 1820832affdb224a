use std::{any::Any, rc::Rc};

use crate::{changed_fields, FieldSet, StateFields, Tracked};


/// Values produced by one pass of a [`Computed`] engine, in declaration order.
#[derive(Default, Clone)]
pub struct ComputedValues(Vec<(&'static str, Rc<dyn Any>)>);

impl ComputedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the derivation `name`.
    ///
    /// Returns `None` if there is no such derivation or its value is not a `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<&T> {
        self.get_any(name)?.downcast_ref()
    }
    pub fn get_any(&self, name: &str) -> Option<&dyn Any> {
        self.get_rc(name).map(|value| &**value)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.get_rc(name).is_some()
    }
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|(name, _)| *name)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn get_rc(&self, name: &str) -> Option<&Rc<dyn Any>> {
        self.0
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, value)| value)
    }
    fn push(&mut self, name: &'static str, value: Rc<dyn Any>) {
        self.0.push((name, value));
    }
}
impl std::fmt::Debug for ComputedValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

struct Derivation<S> {
    name: &'static str,
    f: Box<dyn Fn(&Tracked<S>) -> Rc<dyn Any>>,
    eq: fn(&dyn Any, &dyn Any) -> bool,
    deps: Option<FieldSet>,
    cached: Option<Rc<dyn Any>>,
}

impl<S: StateFields> Derivation<S> {
    fn is_reusable(&self, changed: &FieldSet) -> bool {
        match (&self.deps, &self.cached) {
            (Some(deps), Some(_)) => !deps.is_empty() && deps.is_disjoint(changed),
            _ => false,
        }
    }

    /// Returns the value and whether it differs from the previous one.
    fn eval(&mut self, state: &S, resolved: &ComputedValues) -> (Rc<dyn Any>, bool) {
        let tracked = Tracked::new(state, resolved);
        let value = (self.f)(&tracked);
        self.deps = Some(tracked.into_reads());
        match &self.cached {
            Some(old) if (self.eq)(&**old, &*value) => (old.clone(), false),
            _ => {
                self.cached = Some(value.clone());
                (value, true)
            }
        }
    }
}

/// Incremental engine for values derived from a state snapshot.
///
/// Each derivation remembers the names it read on its last evaluation
/// and is skipped while none of them change.
/// A derivation can read the derivations declared before it.
pub struct Computed<S> {
    derivations: Vec<Derivation<S>>,
}
impl<S: StateFields> Default for Computed<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StateFields> Computed<S> {
    pub fn new() -> Self {
        Self {
            derivations: Vec::new(),
        }
    }

    /// Adds a derivation named `name`.
    ///
    /// A new value equal to the cached one keeps the cached value,
    /// and derivations reading `name` are not invalidated by it.
    pub fn derive<T: PartialEq + 'static>(
        mut self,
        name: &'static str,
        f: impl Fn(&Tracked<S>) -> T + 'static,
    ) -> Self {
        self.derivations.push(Derivation {
            name,
            f: Box::new(move |tracked: &Tracked<S>| -> Rc<dyn Any> { Rc::new(f(tracked)) }),
            eq: eq_any::<T>,
            deps: None,
            cached: None,
        });
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.derivations.iter().map(|d| d.name)
    }
    pub fn len(&self) -> usize {
        self.derivations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.derivations.is_empty()
    }

    /// Names of derivations that are also names of state fields.
    pub fn collisions(&self) -> Vec<&'static str> {
        self.names()
            .filter(|name| S::FIELDS.contains(name))
            .collect()
    }
    pub(crate) fn warn_collisions(&self) {
        for name in self.collisions() {
            tracing::warn!(name, "computed value shadows the state field of the same name");
        }
    }

    /// Returns the names a derivation read on its last evaluation.
    pub fn dependencies(&self, name: &str) -> Option<&FieldSet> {
        self.derivations
            .iter()
            .find(|d| d.name == name)?
            .deps
            .as_ref()
    }

    /// Brings every derivation up to date with `next`.
    ///
    /// `prev` must be the snapshot passed as `next` to the previous call, or `None` on the first call.
    pub fn recompute(&mut self, prev: Option<&S>, next: &S) -> ComputedValues {
        let mut changed = changed_fields(prev, next);
        let mut values = ComputedValues::new();
        for d in &mut self.derivations {
            let value = if d.is_reusable(&changed) {
                d.cached.clone()
            } else {
                None
            };
            let value = match value {
                Some(value) => value,
                None => {
                    let (value, is_changed) = d.eval(next, &values);
                    if is_changed {
                        changed.insert(d.name);
                    }
                    value
                }
            };
            values.push(d.name, value);
        }
        values
    }
}

fn eq_any<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
