//! # Hookline Store
//!
//! Durable store implementations for the Hookline pipeline.
//!
//! The Postgres implementations back the trait seams defined in
//! `hookline_core::storage`; the in-memory implementation mirrors their
//! semantics for unit tests and local development. Both enforce the same
//! record state machine: tenant-scoped reads, sticky terminal statuses,
//! and the expiry guard on completion.

pub mod dead_letter;
pub mod memory;
pub mod rollup;
pub mod tenants;
pub mod webhook_store;

pub use dead_letter::PgDeadLetterStore;
pub use memory::MemoryStores;
pub use rollup::PgRollupStore;
pub use tenants::PgQuotaSource;
pub use webhook_store::PgWebhookStore;

use hookline_core::StoreError;

/// Run the bundled migrations against a pool.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(StoreError::backend)
}

pub(crate) fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound {
            id: "unknown".to_string(),
        },
        other => StoreError::backend(other),
    }
}
