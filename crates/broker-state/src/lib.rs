//! broker-state: embedded state store for the cluster resource broker.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for organizations, clusters, and deployments.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by their opaque id. A small `meta` table carries the deployment
//! creation sequence used for deterministic ordering.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads and async tasks. Multi-record updates go
//! through [`StateStore::transact`], which hands the caller a [`StateTxn`]
//! over a single redb write transaction. redb admits one writer at a time, so
//! everything done inside `transact` is serialized against every other
//! mutation of the store.

pub mod error;
pub mod store;
pub mod tables;
pub mod txn;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use txn::StateTxn;
pub use types::*;
