//! Reactive state container with an incremental computed-value engine
//! and an asynchronous query cache.
//!
//! - [`Store`] holds a state snapshot, recomputes [`Computed`] derivations on write and notifies listeners.
//! - [`QueryClient`] caches the results of asynchronous fetches keyed by their arguments.
//! - Asynchronous work runs on a [`core::Runtime`] driven by the application.

extern crate self as sigquery;

pub mod core;

mod cache;
mod clock;
mod computed;
mod draft;
mod error;
mod infinite;
mod mutation;
mod persist;
mod query;
mod state;
mod store;
mod subscription;

#[cfg(doctest)]
mod tests_readme;

pub use cache::QueryKey;
pub use clock::*;
pub use computed::*;
pub use draft::*;
pub use error::*;
pub use infinite::*;
pub use mutation::*;
pub use persist::{MemoryStorage, PersistOptions, Storage};
pub use query::*;
pub use state::*;
pub use store::*;
pub use subscription::*;

pub use sigquery_macros::State;

#[doc(hidden)]
pub mod exports {
    pub use serde;
}
