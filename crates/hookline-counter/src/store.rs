//! The counter store trait.
//!
//! Operations are deliberately close to the primitives the backing store
//! offers: atomic counters with expiry, hashes, TTL'd string keys, FIFO
//! lists, and sorted sets. Higher-level structures (rate-limit windows,
//! usage aggregates, the webhook queue) are built on top of these by the
//! pipeline crates.

use crate::error::CounterStoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// A sorted-set member with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// Interface for the shared counter store.
///
/// All operations are atomic with respect to concurrent callers. Handles
/// are cheap to clone and safe to share across tasks.
#[async_trait]
pub trait CounterStore: Send + Sync {
    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    /// Atomically increment `key` by `by` and return the new value.
    ///
    /// The TTL is applied when the increment creates the key, so a counter
    /// expires `ttl` after the first write of its window regardless of
    /// later increments.
    async fn incr_with_ttl(
        &self,
        key: &str,
        by: i64,
        ttl: Duration,
    ) -> Result<i64, CounterStoreError>;

    // ------------------------------------------------------------------
    // Hashes
    // ------------------------------------------------------------------

    /// Increment several fields of the hash at `key` in one atomic batch.
    ///
    /// The TTL is refreshed on every call; aggregate hashes stay alive as
    /// long as they keep receiving writes.
    async fn hash_incr(
        &self,
        key: &str,
        deltas: &[(String, i64)],
        ttl: Duration,
    ) -> Result<(), CounterStoreError>;

    /// Set a hash field unconditionally.
    async fn hash_set(&self, key: &str, field: &str, value: &str)
        -> Result<(), CounterStoreError>;

    /// Set a hash field only if it does not exist. Returns `true` when the
    /// field was written.
    async fn hash_set_nx(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, CounterStoreError>;

    /// Read all fields of the hash at `key`. Missing keys yield an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CounterStoreError>;

    // ------------------------------------------------------------------
    // String keys
    // ------------------------------------------------------------------

    /// Read a string key.
    async fn get(&self, key: &str) -> Result<Option<String>, CounterStoreError>;

    /// Write a string key with a TTL.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CounterStoreError>;

    /// Write a string key with a TTL only if it is absent. Returns `true`
    /// when the key was written; `false` when another holder beat us.
    async fn set_nx_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CounterStoreError>;

    /// Delete a key of any type. Returns `true` when a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, CounterStoreError>;

    /// Collect keys matching a glob `pattern`, walking the keyspace
    /// cursor-style in pages of `page_size`.
    async fn scan_keys(
        &self,
        pattern: &str,
        page_size: usize,
    ) -> Result<Vec<String>, CounterStoreError>;

    // ------------------------------------------------------------------
    // Lists (FIFO queue lane)
    // ------------------------------------------------------------------

    /// Push a value at the head of the list. Returns the new length.
    async fn list_push_front(&self, key: &str, value: &str) -> Result<i64, CounterStoreError>;

    /// Pop up to `count` values from the tail of the list, oldest first.
    async fn list_pop_back_batch(
        &self,
        key: &str,
        count: usize,
    ) -> Result<Vec<String>, CounterStoreError>;

    /// Read a range of the list without consuming it. Negative indices
    /// count from the tail, as in LRANGE.
    async fn list_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, CounterStoreError>;

    /// Remove all occurrences of `value` from the list. Returns how many
    /// entries were removed.
    async fn list_remove(&self, key: &str, value: &str) -> Result<i64, CounterStoreError>;

    /// Length of the list.
    async fn list_len(&self, key: &str) -> Result<i64, CounterStoreError>;

    // ------------------------------------------------------------------
    // Sorted sets (priority queue lane)
    // ------------------------------------------------------------------

    /// Add a member with a score.
    async fn zset_add(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), CounterStoreError>;

    /// Pop up to `count` members with the lowest scores.
    async fn zset_pop_min_batch(
        &self,
        key: &str,
        count: usize,
    ) -> Result<Vec<ScoredMember>, CounterStoreError>;

    /// Read a range of members by rank without consuming them.
    async fn zset_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<ScoredMember>, CounterStoreError>;

    /// Remove a member. Returns how many members were removed.
    async fn zset_remove(&self, key: &str, member: &str) -> Result<i64, CounterStoreError>;

    /// Cardinality of the sorted set.
    async fn zset_len(&self, key: &str) -> Result<i64, CounterStoreError>;
}
