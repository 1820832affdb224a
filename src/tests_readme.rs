// #![include_doc("../README.md", start)]
//! # sigquery
//!
//! [![Crates.io](https://img.shields.io/crates/v/sigquery.svg)](https://crates.io/crates/sigquery)
//! [![Docs.rs](https://docs.rs/sigquery/badge.svg)](https://docs.rs/sigquery/)
//!
//! `sigquery` is a single-threaded reactive state container with an incremental computed-value engine and an asynchronous query cache.
//!
//! > [!WARNING]
//! > Warning: This crate is still in the very early stages of development. APIs will change.
//!
//! ## Features
//!
//! - Immutable snapshots with listeners and selector subscriptions
//! - Derived values that are recomputed only when the fields they read change
//! - Draft-based updates that never expose a partial write
//! - Optional persistence of a part of the state
//! - Keyed query cache with staleness windows, deduplication and last-issued-wins requests
//! - LRU eviction of entries nobody listens to
//! - Infinite pagination, mutations and optimistic updates with rollback
//!
//! ### Store and derived values
//!
//! ```rust
//! use sigquery::{Computed, State, Store, Tracked};
//!
//! #[derive(Clone, State)]
//! struct Counter {
//!     count: i32,
//!     step: i32,
//! }
//!
//! let store = Store::with_computed(
//!     Counter { count: 0, step: 2 },
//!     Computed::new().derive("double", |t: &Tracked<Counter>| t.count() * 2),
//! );
//! let _s = store.subscribe(|next, _prev| println!("{}", next.count));
//!
//! store.update(|d| {
//!     let step = d.step;
//!     d.count += step;
//! }); // prints "2"
//!
//! assert_eq!(store.get().get::<i32>("double"), Some(&4));
//! ```
//!
//! `double` reads only `count`, so writes to `step` do not recompute it.
//!
//! ### Query cache
//!
//! Asynchronous work runs on a `Runtime` owned by the application.
//!
//! ```rust
//! use sigquery::{core::Runtime, QueryClient};
//!
//! let mut rt = Runtime::new();
//! let client = QueryClient::new(&rt);
//! let users = client.query(|id: u32| async move { Ok::<_, String>(format!("user {id}")) });
//!
//! users.ensure(&1);
//! rt.update();
//!
//! assert_eq!(
//!     users.get_query_data(&1).as_deref().map(String::as_str),
//!     Some("user 1")
//! );
//! ```
//!
//! ## License
//!
//! This project is dual licensed under Apache-2.0/MIT. See the two LICENSE-\* files for details.
//!
//! ## Contribution
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted for inclusion in the work by you, as defined in the Apache-2.0 license, shall be dual licensed as above, without any additional terms or conditions.
// #![include_doc("../README.md", end)]
