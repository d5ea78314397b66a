//! # Hookline Counter Store
//!
//! Shared counter store abstraction for the Hookline upload-event pipeline.
//!
//! The pipeline keeps all of its shared mutable state (rate-limit windows,
//! usage counters, queue structures, idempotency locks) in a single
//! key-value store with atomic primitives. This crate defines the
//! [`CounterStore`] trait over those primitives and ships two providers:
//!
//! - [`RedisCounterStore`]: production provider backed by a Redis
//!   connection manager.
//! - [`InMemoryCounterStore`]: fully functional in-process provider for
//!   unit tests and local development.
//!
//! ## Architecture
//!
//! Consumers depend only on the trait; providers are injected at runtime.
//! All operations are async and safe for concurrent use through a shared
//! handle.

pub mod error;
pub mod providers;
pub mod store;

pub use error::CounterStoreError;
pub use providers::{InMemoryCounterStore, RedisCounterStore};
pub use store::{CounterStore, ScoredMember};
