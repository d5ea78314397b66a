//! In-memory counter store provider for testing and development.
//!
//! Fully functional twin of the Redis provider: atomic counters with
//! expiry, hashes, TTL'd string keys, lists, and sorted sets. Expiry is
//! simulated lazily: expired entries are dropped when a key is next
//! touched, which is indistinguishable from real expiry for callers.

use crate::error::CounterStoreError;
use crate::store::{CounterStore, ScoredMember};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// A stored value of any of the supported shapes.
#[derive(Debug, Clone)]
enum Value {
    Counter(i64),
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    ZSet(Vec<(String, f64)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// In-process counter store.
///
/// Handles are cheap clones sharing one map behind a mutex.
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, for test assertions.
    pub fn key_count(&self) -> usize {
        let mut entries = self.entries.lock().expect("counter store mutex poisoned");
        entries.retain(|_, entry| !entry.is_expired());
        entries.len()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let mut entries = self.entries.lock().expect("counter store mutex poisoned");
        entries.retain(|_, entry| !entry.is_expired());
        f(&mut entries)
    }

    fn wrong_type(key: &str) -> CounterStoreError {
        CounterStoreError::WrongType {
            key: key.to_string(),
        }
    }

    /// Glob match supporting only the `*` wildcard, which is all the
    /// pipeline's key patterns use.
    fn glob_match(pattern: &str, key: &str) -> bool {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 1 {
            return pattern == key;
        }
        let mut rest = key;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            if i == 0 {
                match rest.strip_prefix(part) {
                    Some(r) => rest = r,
                    None => return false,
                }
            } else if i == parts.len() - 1 {
                return rest.ends_with(part);
            } else {
                match rest.find(part) {
                    Some(pos) => rest = &rest[pos + part.len()..],
                    None => return false,
                }
            }
        }
        true
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_with_ttl(
        &self,
        key: &str,
        by: i64,
        ttl: Duration,
    ) -> Result<i64, CounterStoreError> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(entry) => match &mut entry.value {
                Value::Counter(current) => {
                    *current += by;
                    Ok(*current)
                }
                _ => Err(Self::wrong_type(key)),
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Counter(by),
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
                Ok(by)
            }
        })
    }

    async fn hash_incr(
        &self,
        key: &str,
        deltas: &[(String, i64)],
        ttl: Duration,
    ) -> Result<(), CounterStoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            let hash = match &mut entry.value {
                Value::Hash(hash) => hash,
                _ => return Err(Self::wrong_type(key)),
            };
            for (field, delta) in deltas {
                let slot = hash.entry(field.clone()).or_insert_with(|| "0".to_string());
                let current: i64 = slot.parse().unwrap_or(0);
                *slot = (current + delta).to_string();
            }
            entry.expires_at = Some(Instant::now() + ttl);
            Ok(())
        })
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), CounterStoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Hash(hash) => {
                    hash.insert(field.to_string(), value.to_string());
                    Ok(())
                }
                _ => Err(Self::wrong_type(key)),
            }
        })
    }

    async fn hash_set_nx(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, CounterStoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Hash(hash) => {
                    if hash.contains_key(field) {
                        Ok(false)
                    } else {
                        hash.insert(field.to_string(), value.to_string());
                        Ok(true)
                    }
                }
                _ => Err(Self::wrong_type(key)),
            }
        })
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CounterStoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(HashMap::new()),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CounterStoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(Entry {
                value: Value::Counter(value),
                ..
            }) => Ok(Some(value.to_string())),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        })
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CounterStoreError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    async fn set_nx_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CounterStoreError> {
        self.with_entries(|entries| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(true)
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, CounterStoreError> {
        self.with_entries(|entries| Ok(entries.remove(key).is_some()))
    }

    async fn scan_keys(
        &self,
        pattern: &str,
        _page_size: usize,
    ) -> Result<Vec<String>, CounterStoreError> {
        if pattern.is_empty() {
            return Err(CounterStoreError::InvalidPattern {
                pattern: pattern.to_string(),
            });
        }
        self.with_entries(|entries| {
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|key| Self::glob_match(pattern, key))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<i64, CounterStoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::List(list) => {
                    list.push_front(value.to_string());
                    Ok(list.len() as i64)
                }
                _ => Err(Self::wrong_type(key)),
            }
        })
    }

    async fn list_pop_back_batch(
        &self,
        key: &str,
        count: usize,
    ) -> Result<Vec<String>, CounterStoreError> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let mut popped = Vec::with_capacity(count.min(list.len()));
                for _ in 0..count {
                    match list.pop_back() {
                        Some(value) => popped.push(value),
                        None => break,
                    }
                }
                Ok(popped)
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        })
    }

    async fn list_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, CounterStoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let len = list.len() as i64;
                let clamp = |index: i64| -> i64 {
                    let resolved = if index < 0 { len + index } else { index };
                    resolved.clamp(0, len.saturating_sub(1).max(0))
                };
                if len == 0 {
                    return Ok(Vec::new());
                }
                let (start, stop) = (clamp(start), clamp(stop));
                if start > stop {
                    return Ok(Vec::new());
                }
                Ok(list
                    .iter()
                    .skip(start as usize)
                    .take((stop - start + 1) as usize)
                    .cloned()
                    .collect())
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        })
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<i64, CounterStoreError> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let before = list.len();
                list.retain(|candidate| candidate != value);
                Ok((before - list.len()) as i64)
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(0),
        })
    }

    async fn list_len(&self, key: &str) -> Result<i64, CounterStoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len() as i64),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(0),
        })
    }

    async fn zset_add(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), CounterStoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::ZSet(Vec::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::ZSet(members) => {
                    match members.iter_mut().find(|(m, _)| m == member) {
                        Some(slot) => slot.1 = score,
                        None => members.push((member.to_string(), score)),
                    }
                    Ok(())
                }
                _ => Err(Self::wrong_type(key)),
            }
        })
    }

    async fn zset_pop_min_batch(
        &self,
        key: &str,
        count: usize,
    ) -> Result<Vec<ScoredMember>, CounterStoreError> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry {
                value: Value::ZSet(members),
                ..
            }) => {
                members.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                let take = count.min(members.len());
                Ok(members
                    .drain(..take)
                    .map(|(member, score)| ScoredMember { member, score })
                    .collect())
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        })
    }

    async fn zset_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<ScoredMember>, CounterStoreError> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry {
                value: Value::ZSet(members),
                ..
            }) => {
                members.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                let len = members.len() as i64;
                if len == 0 {
                    return Ok(Vec::new());
                }
                let clamp = |index: i64| -> i64 {
                    let resolved = if index < 0 { len + index } else { index };
                    resolved.clamp(0, len - 1)
                };
                let (start, stop) = (clamp(start), clamp(stop));
                if start > stop {
                    return Ok(Vec::new());
                }
                Ok(members[start as usize..=(stop as usize)]
                    .iter()
                    .map(|(member, score)| ScoredMember {
                        member: member.clone(),
                        score: *score,
                    })
                    .collect())
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        })
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<i64, CounterStoreError> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry {
                value: Value::ZSet(members),
                ..
            }) => {
                let before = members.len();
                members.retain(|(m, _)| m != member);
                Ok((before - members.len()) as i64)
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(0),
        })
    }

    async fn zset_len(&self, key: &str) -> Result<i64, CounterStoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: Value::ZSet(members),
                ..
            }) => Ok(members.len() as i64),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(0),
        })
    }
}
