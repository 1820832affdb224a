use std::{
    ops::{Deref, DerefMut},
    rc::Rc,
};


/// Mutable working copy of an immutable snapshot.
///
/// The base value is cloned on the first mutable access.
/// A draft that is never written to produces the base snapshot itself.
pub struct Draft<'a, S> {
    base: &'a Rc<S>,
    copy: Option<S>,
}

impl<'a, S: Clone> Draft<'a, S> {
    pub fn new(base: &'a Rc<S>) -> Self {
        Self { base, copy: None }
    }

    /// Returns `true` if the draft has been mutably accessed.
    pub fn is_modified(&self) -> bool {
        self.copy.is_some()
    }

    /// Replaces the whole working copy.
    pub fn set(&mut self, value: S) {
        self.copy = Some(value);
    }

    /// Returns the snapshot as it was before this draft was created.
    pub fn base(&self) -> &S {
        self.base
    }

    /// Finishes the draft, producing the next snapshot.
    pub fn finish(self) -> Rc<S> {
        match self.copy {
            Some(value) => Rc::new(value),
            None => self.base.clone(),
        }
    }
}
impl<S> Deref for Draft<'_, S> {
    type Target = S;
    fn deref(&self) -> &Self::Target {
        self.copy.as_ref().unwrap_or(self.base)
    }
}
impl<S: Clone> DerefMut for Draft<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let base = self.base;
        self.copy.get_or_insert_with(|| S::clone(base))
    }
}

/// Applies `f` to a draft of `base` and returns the produced snapshot.
///
/// If `f` fails, the draft is discarded and `base` is left untouched.
pub fn produce<S: Clone, R, E>(
    base: &Rc<S>,
    f: impl FnOnce(&mut Draft<S>) -> Result<R, E>,
) -> Result<(Rc<S>, R), E> {
    let mut draft = Draft::new(base);
    let ret = f(&mut draft)?;
    Ok((draft.finish(), ret))
}
