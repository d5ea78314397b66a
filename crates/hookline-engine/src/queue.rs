//! # Webhook Queue
//!
//! The delivery queue, built on counter-store primitives at fixed keys:
//!
//! - `webhook:queue`: normal FIFO lane (list; push head, pop tail).
//! - `webhook:priority`: priority lane (sorted set scored by enqueue
//!   time), used when an item's priority exceeds the threshold. At most
//!   [`MAX_PRIORITY_PER_BATCH`] priority items are taken per batch so the
//!   FIFO lane cannot starve.
//! - `processing:<id>`: TTL'd marker for items that are in flight or
//!   scheduled for delayed re-queue. A background poller re-enqueues due
//!   entries; if a worker dies mid-batch, its items come back the same
//!   way.

use hookline_core::{Timestamp, WebhookId};
use hookline_counter::{CounterStore, CounterStoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Normal FIFO lane key.
pub const NORMAL_QUEUE_KEY: &str = "webhook:queue";

/// Priority lane key.
pub const PRIORITY_QUEUE_KEY: &str = "webhook:priority";

/// Prefix for in-flight / delayed re-queue markers.
pub const PROCESSING_KEY_PREFIX: &str = "processing:";

/// Priorities above this value route to the priority lane.
pub const PRIORITY_THRESHOLD: u8 = 5;

/// Priority items dequeued per batch cycle, to prevent FIFO starvation.
pub const MAX_PRIORITY_PER_BATCH: usize = 10;

/// Extra lifetime on processing markers beyond their due time, so the
/// poller wins the race against key expiry under normal operation.
const PROCESSING_GRACE: Duration = Duration::from_secs(600);

/// Errors produced by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("counter store error: {0}")]
    Store(#[from] CounterStoreError),

    #[error("queue entry could not be decoded: {message}")]
    Decode { message: String },
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(inner) => inner.is_transient(),
            Self::Decode { .. } => false,
        }
    }
}

/// One enqueued delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: WebhookId,
    /// Opaque payload carried for the consumer; preserved byte-for-byte
    /// across re-queues.
    pub payload: serde_json::Value,
    pub priority: u8,
    pub enqueued_at_millis: i64,
}

impl QueueItem {
    pub fn new(id: WebhookId, payload: serde_json::Value, priority: u8) -> Self {
        Self {
            id,
            payload,
            priority,
            enqueued_at_millis: Timestamp::now().epoch_millis(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProcessingEntry {
    item: QueueItem,
    requeue_at_millis: i64,
}

/// Queue depths per lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub normal: i64,
    pub priority: i64,
    pub processing: i64,
}

/// The webhook delivery queue.
#[derive(Clone)]
pub struct WebhookQueue {
    store: Arc<dyn CounterStore>,
    /// How long a dequeued item stays invisible before the poller hands
    /// it back. Must exceed the worker batch deadline.
    visibility_timeout: Duration,
}

impl WebhookQueue {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            visibility_timeout: Duration::from_secs(180),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    fn processing_key(id: &WebhookId) -> String {
        format!("{PROCESSING_KEY_PREFIX}{id}")
    }

    fn encode(item: &QueueItem) -> Result<String, QueueError> {
        serde_json::to_string(item).map_err(|e| QueueError::Decode {
            message: e.to_string(),
        })
    }

    fn decode(raw: &str) -> Result<QueueItem, QueueError> {
        serde_json::from_str(raw).map_err(|e| QueueError::Decode {
            message: e.to_string(),
        })
    }

    /// Enqueue an item. High-priority items (`priority > 5`) go to the
    /// priority lane; everything else to the FIFO.
    pub async fn enqueue(&self, item: &QueueItem) -> Result<(), QueueError> {
        let encoded = Self::encode(item)?;
        if item.priority > PRIORITY_THRESHOLD {
            self.store
                .zset_add(PRIORITY_QUEUE_KEY, &encoded, item.enqueued_at_millis as f64)
                .await?;
        } else {
            self.store.list_push_front(NORMAL_QUEUE_KEY, &encoded).await?;
        }
        Ok(())
    }

    /// Dequeue up to `n` items. Priority items come first, capped per
    /// batch; the remainder is filled from the FIFO, oldest first.
    ///
    /// Each dequeued item gets a processing marker so it returns via the
    /// poller if this worker never finishes it.
    pub async fn dequeue_batch(&self, n: usize) -> Result<Vec<QueueItem>, QueueError> {
        let mut items = Vec::with_capacity(n);

        let priority_take = n.min(MAX_PRIORITY_PER_BATCH);
        if priority_take > 0 {
            for member in self
                .store
                .zset_pop_min_batch(PRIORITY_QUEUE_KEY, priority_take)
                .await?
            {
                match Self::decode(&member.member) {
                    Ok(item) => items.push(item),
                    Err(err) => warn!(component = "queue", error = %err,
                        "dropping undecodable priority entry"),
                }
            }
        }

        let remaining = n.saturating_sub(items.len());
        if remaining > 0 {
            for raw in self
                .store
                .list_pop_back_batch(NORMAL_QUEUE_KEY, remaining)
                .await?
            {
                match Self::decode(&raw) {
                    Ok(item) => items.push(item),
                    Err(err) => warn!(component = "queue", error = %err,
                        "dropping undecodable queue entry"),
                }
            }
        }

        let visible_again = Timestamp::now()
            .add_duration(self.visibility_timeout)
            .epoch_millis();
        for item in &items {
            self.mark_processing(item, visible_again).await?;
        }

        Ok(items)
    }

    /// Schedule an item to re-enter the queue after `delay`.
    pub async fn requeue(&self, item: &QueueItem, delay: Duration) -> Result<(), QueueError> {
        let requeue_at = Timestamp::now().add_duration(delay).epoch_millis();
        self.mark_processing(item, requeue_at).await
    }

    async fn mark_processing(
        &self,
        item: &QueueItem,
        requeue_at_millis: i64,
    ) -> Result<(), QueueError> {
        let entry = ProcessingEntry {
            item: item.clone(),
            requeue_at_millis,
        };
        let encoded = serde_json::to_string(&entry).map_err(|e| QueueError::Decode {
            message: e.to_string(),
        })?;
        let now = Timestamp::now().epoch_millis();
        let until_due = Duration::from_millis(requeue_at_millis.saturating_sub(now).max(0) as u64);
        self.store
            .set_with_ttl(
                &Self::processing_key(&item.id),
                &encoded,
                until_due + PROCESSING_GRACE,
            )
            .await?;
        Ok(())
    }

    /// Drop the processing marker after an item reached a terminal
    /// outcome.
    pub async fn acknowledge(&self, id: &WebhookId) -> Result<(), QueueError> {
        self.store.delete(&Self::processing_key(id)).await?;
        Ok(())
    }

    /// Remove every trace of a webhook from the queue: its processing
    /// marker and any entries in either lane.
    pub async fn remove(&self, id: &WebhookId) -> Result<(), QueueError> {
        self.store.delete(&Self::processing_key(id)).await?;

        for raw in self.store.list_range(NORMAL_QUEUE_KEY, 0, -1).await? {
            if Self::decode(&raw).map(|item| item.id == *id).unwrap_or(false) {
                self.store.list_remove(NORMAL_QUEUE_KEY, &raw).await?;
            }
        }

        for member in self.store.zset_range(PRIORITY_QUEUE_KEY, 0, -1).await? {
            if Self::decode(&member.member)
                .map(|item| item.id == *id)
                .unwrap_or(false)
            {
                self.store.zset_remove(PRIORITY_QUEUE_KEY, &member.member).await?;
            }
        }

        Ok(())
    }

    /// Re-enqueue processing entries whose due time has passed. Returns
    /// how many items went back onto the queue.
    pub async fn poll_due(&self, page_size: usize) -> Result<usize, QueueError> {
        let pattern = format!("{PROCESSING_KEY_PREFIX}*");
        let now = Timestamp::now().epoch_millis();
        let mut requeued = 0;

        for key in self.store.scan_keys(&pattern, page_size).await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let entry: ProcessingEntry = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(component = "queue", key = %key, error = %err,
                        "dropping undecodable processing entry");
                    self.store.delete(&key).await?;
                    continue;
                }
            };
            if entry.requeue_at_millis > now {
                continue;
            }
            self.enqueue(&entry.item).await?;
            self.store.delete(&key).await?;
            requeued += 1;
            debug!(component = "queue", webhook_id = %entry.item.id, "re-enqueued due item");
        }

        Ok(requeued)
    }

    /// Total queued items across both lanes.
    pub async fn len(&self) -> Result<i64, QueueError> {
        let stats = self.stats().await?;
        Ok(stats.normal + stats.priority)
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Depths of all three structures.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let normal = self.store.list_len(NORMAL_QUEUE_KEY).await?;
        let priority = self.store.zset_len(PRIORITY_QUEUE_KEY).await?;
        let processing = self
            .store
            .scan_keys(&format!("{PROCESSING_KEY_PREFIX}*"), 100)
            .await?
            .len() as i64;
        Ok(QueueStats {
            normal,
            priority,
            processing,
        })
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
