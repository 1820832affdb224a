use std::rc::{Rc, Weak};


/// Handle to a registered listener.
///
/// The listener is removed when the `Subscription` is dropped.
#[derive(Default)]
#[must_use]
pub struct Subscription(Option<Box<dyn FnOnce()>>);

impl Subscription {
    pub fn empty() -> Self {
        Subscription(None)
    }
    pub fn from_fn(unsubscribe: impl FnOnce() + 'static) -> Self {
        Subscription(Some(Box::new(unsubscribe)))
    }

    /// Creates a `Subscription` that calls `unsubscribe` on drop if `this` is still alive.
    pub fn from_weak_fn<T: 'static>(this: Weak<T>, unsubscribe: impl FnOnce(Rc<T>) + 'static) -> Self {
        Self::from_fn(move || {
            if let Some(this) = this.upgrade() {
                unsubscribe(this)
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Removes the listener now. Equivalent to dropping the `Subscription`.
    pub fn unsubscribe(self) {}
}
impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.0.take() {
            unsubscribe()
        }
    }
}
impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("is_empty", &self.is_empty())
            .finish()
    }
}
