//! Redis-backed counter store provider.
//!
//! Uses a multiplexed connection manager; handles are cheap clones and the
//! manager reconnects on its own after transient connection loss.

use crate::error::CounterStoreError;
use crate::store::{CounterStore, ScoredMember};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

/// Production counter store backed by Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to Redis at `url` and build a connection manager.
    pub async fn connect(url: &str) -> Result<Self, CounterStoreError> {
        let client = redis::Client::open(url).map_err(CounterStoreError::from)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(CounterStoreError::from)?;
        Ok(Self { manager })
    }

    /// Build a store from an existing connection manager.
    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    fn ttl_secs(ttl: Duration) -> i64 {
        // Zero TTLs would delete the key outright; clamp to one second.
        (ttl.as_secs() as i64).max(1)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_ttl(
        &self,
        key: &str,
        by: i64,
        ttl: Duration,
    ) -> Result<i64, CounterStoreError> {
        let mut conn = self.manager.clone();
        let current: i64 = conn.incr(key, by).await?;
        if current == by {
            // First write of the window; start the expiry clock.
            let _: i64 = redis::cmd("EXPIRE")
                .arg(key)
                .arg(Self::ttl_secs(ttl))
                .query_async(&mut conn)
                .await?;
        }
        Ok(current)
    }

    async fn hash_incr(
        &self,
        key: &str,
        deltas: &[(String, i64)],
        ttl: Duration,
    ) -> Result<(), CounterStoreError> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (field, delta) in deltas {
            pipe.hincr(key, field, *delta).ignore();
        }
        pipe.cmd("EXPIRE").arg(key).arg(Self::ttl_secs(ttl)).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), CounterStoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_set_nx(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, CounterStoreError> {
        let mut conn = self.manager.clone();
        let written: bool = conn.hset_nx(key, field, value).await?;
        Ok(written)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CounterStoreError> {
        let mut conn = self.manager.clone();
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(map)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CounterStoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CounterStoreError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CounterStoreError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CounterStoreError> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn scan_keys(
        &self,
        pattern: &str,
        page_size: usize,
    ) -> Result<Vec<String>, CounterStoreError> {
        if pattern.is_empty() {
            return Err(CounterStoreError::InvalidPattern {
                pattern: pattern.to_string(),
            });
        }
        let mut conn = self.manager.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(page_size.max(1))
                .query_async(&mut conn)
                .await?;
            keys.extend(page);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.manager.clone();
        let len: i64 = conn.lpush(key, value).await?;
        Ok(len)
    }

    async fn list_pop_back_batch(
        &self,
        key: &str,
        count: usize,
    ) -> Result<Vec<String>, CounterStoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        // RPOP with a count returns newest-of-the-tail first; the tail is
        // the oldest entry, so the reply is already oldest-first.
        let values: Option<Vec<String>> = redis::cmd("RPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(values.unwrap_or_default())
    }

    async fn list_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, CounterStoreError> {
        let mut conn = self.manager.clone();
        let values: Vec<String> = conn.lrange(key, start as isize, stop as isize).await?;
        Ok(values)
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.lrem(key, 0, value).await?;
        Ok(removed)
    }

    async fn list_len(&self, key: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.manager.clone();
        let len: i64 = conn.llen(key).await?;
        Ok(len)
    }

    async fn zset_add(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), CounterStoreError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zset_pop_min_batch(
        &self,
        key: &str,
        count: usize,
    ) -> Result<Vec<ScoredMember>, CounterStoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let raw: Vec<(String, f64)> = conn.zpopmin(key, count as isize).await?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }

    async fn zset_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<ScoredMember>, CounterStoreError> {
        let mut conn = self.manager.clone();
        let raw: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed)
    }

    async fn zset_len(&self, key: &str) -> Result<i64, CounterStoreError> {
        let mut conn = self.manager.clone();
        let len: i64 = conn.zcard(key).await?;
        Ok(len)
    }
}
