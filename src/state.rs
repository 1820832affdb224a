use std::{any::Any, cell::RefCell, collections::BTreeSet};

use crate::ComputedValues;

#[cfg(test)]
mod tests;

/// Field metadata of a state type.
///
/// Usually implemented with `#[derive(State)]`.
///
/// ```
/// use sigquery::State;
///
/// #[derive(Clone, State)]
/// struct Counter {
///     count: i32,
///     step: i32,
/// }
/// ```
pub trait StateFields: Clone + 'static {
    /// Names of the fields, in declaration order.
    const FIELDS: &'static [&'static str];

    /// Partial value used for shallow merges. Each field is optional.
    type Patch: Default;

    /// Returns `true` if the field at `index` differs between `self` and `other`.
    fn field_ne(&self, other: &Self, index: usize) -> bool;

    /// Returns the field at `index`.
    fn field(&self, index: usize) -> Option<&dyn Any>;

    /// Overwrites the fields present in `patch`.
    fn apply_patch(&mut self, patch: Self::Patch);

    fn field_index(name: &str) -> Option<usize> {
        Self::FIELDS.iter().position(|field| *field == name)
    }
}

/// Set of field or derivation names.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct FieldSet(BTreeSet<&'static str>);

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn all<S: StateFields>() -> Self {
        S::FIELDS.iter().copied().collect()
    }
    pub fn insert(&mut self, name: &'static str) -> bool {
        self.0.insert(name)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
    pub fn is_disjoint(&self, other: &FieldSet) -> bool {
        self.0.is_disjoint(&other.0)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().copied()
    }
}
impl FromIterator<&'static str> for FieldSet {
    fn from_iter<I: IntoIterator<Item = &'static str>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
impl<const N: usize> From<[&'static str; N]> for FieldSet {
    fn from(names: [&'static str; N]) -> Self {
        names.into_iter().collect()
    }
}

/// Returns the names of the fields whose value differs between `prev` and `next`.
///
/// If `prev` is `None`, every field counts as changed.
pub fn changed_fields<S: StateFields>(prev: Option<&S>, next: &S) -> FieldSet {
    let Some(prev) = prev else {
        return FieldSet::all::<S>();
    };
    if std::ptr::eq(prev, next) {
        return FieldSet::new();
    }
    (0..S::FIELDS.len())
        .filter(|&index| prev.field_ne(next, index))
        .map(|index| S::FIELDS[index])
        .collect()
}

/// Read-tracking view over a state snapshot and the derivations resolved before the current one.
///
/// Every named read is recorded. The recorded names become the dependency set of the derivation that received the view.
pub struct Tracked<'a, S> {
    state: &'a S,
    computed: &'a ComputedValues,
    reads: RefCell<FieldSet>,
}

impl<'a, S: StateFields> Tracked<'a, S> {
    pub fn new(state: &'a S, computed: &'a ComputedValues) -> Self {
        Self {
            state,
            computed,
            reads: RefCell::new(FieldSet::new()),
        }
    }

    /// Records a read of `name` and returns the part of the state selected by `project`.
    pub fn read<T: ?Sized>(&self, name: &'static str, project: impl FnOnce(&'a S) -> &'a T) -> &'a T {
        self.track(name);
        project(self.state)
    }

    /// Records a read of `name` without reading anything.
    pub fn track(&self, name: &'static str) {
        self.reads.borrow_mut().insert(name);
    }

    /// Reads a derivation resolved earlier in this pass, or a raw field if there is no such derivation.
    pub fn get<T: 'static>(&self, name: &'static str) -> Option<&'a T> {
        if let Some(value) = self.computed.get_any(name) {
            self.track(name);
            return value.downcast_ref();
        }
        let index = S::field_index(name)?;
        self.track(name);
        self.state.field(index)?.downcast_ref()
    }

    /// Reads a derivation resolved earlier in this pass.
    pub fn computed<T: 'static>(&self, name: &'static str) -> Option<&'a T> {
        self.track(name);
        self.computed.get(name)
    }

    /// Returns the whole state without recording any read.
    pub fn untracked(&self) -> &'a S {
        self.state
    }

    /// Returns the names read so far.
    pub fn reads(&self) -> FieldSet {
        self.reads.borrow().clone()
    }

    pub(crate) fn into_reads(self) -> FieldSet {
        self.reads.into_inner()
    }
}
