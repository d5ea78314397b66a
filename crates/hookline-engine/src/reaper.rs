//! # Dead-letter Reaper
//!
//! Periodic job that resurrects dead-lettered webhooks once their
//! cool-off (`retry_after`) has passed: the record's attempts and error
//! are reset, the dead-letter row is removed, and the webhook re-enters
//! the queue at priority 1. Operators can instead mark an entry
//! resolved, which parks it permanently without re-queueing.

use crate::queue::{QueueItem, WebhookQueue};
use hookline_core::record::DeadLetterEntry;
use hookline_core::{
    DeadLetterStore, PipelineMetrics, StoreError, Timestamp, Uuid, WebhookStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Priority assigned to resurrected webhooks.
const RESURRECT_PRIORITY: u8 = 1;

/// Tuning for the reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often the reaper scans for due entries.
    pub interval: Duration,

    /// Maximum entries resurrected per run.
    pub batch_limit: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            batch_limit: 50,
        }
    }
}

/// The dead-letter reaper.
pub struct DeadLetterReaper {
    config: ReaperConfig,
    webhooks: Arc<dyn WebhookStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    queue: Arc<WebhookQueue>,
    metrics: Arc<dyn PipelineMetrics>,
}

impl DeadLetterReaper {
    pub fn new(
        config: ReaperConfig,
        webhooks: Arc<dyn WebhookStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        queue: Arc<WebhookQueue>,
        metrics: Arc<dyn PipelineMetrics>,
    ) -> Self {
        Self {
            config,
            webhooks,
            dead_letters,
            queue,
            metrics,
        }
    }

    /// One reaper pass. Returns how many webhooks were resurrected.
    pub async fn run_once(&self) -> Result<u64, StoreError> {
        let now = Timestamp::now();
        let due = self.dead_letters.due(now, self.config.batch_limit).await?;
        let mut resurrected = 0;

        for entry in due {
            match self.resurrect(&entry).await {
                Ok(true) => resurrected += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(component = "reaper", webhook_id = %entry.webhook_id,
                        error = %err, "resurrection failed, leaving entry for next run");
                }
            }
        }

        if resurrected > 0 {
            info!(component = "reaper", resurrected, "dead-letter entries resurrected");
            self.metrics.record_dead_letter_resurrected(resurrected);
        }
        Ok(resurrected)
    }

    async fn resurrect(&self, entry: &DeadLetterEntry) -> Result<bool, StoreError> {
        match self.webhooks.reset_for_retry(&entry.webhook_id).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                // The webhook was deleted out from under the entry;
                // nothing left to resurrect.
                self.dead_letters.delete(&entry.id).await?;
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        self.dead_letters.delete(&entry.id).await?;

        let item = QueueItem::new(
            entry.webhook_id,
            entry.original_snapshot.clone(),
            RESURRECT_PRIORITY,
        );
        self.queue.enqueue(&item).await.map_err(|err| StoreError::Backend {
            message: format!("re-enqueue failed: {err}"),
        })?;
        Ok(true)
    }

    /// Operator action: mark an entry resolved without re-queueing.
    pub async fn resolve(&self, id: &Uuid, actor: &str) -> Result<(), StoreError> {
        self.dead_letters.resolve(id, actor, Timestamp::now()).await
    }

    /// Run on the configured interval until drained.
    pub async fn run(&self, mut drain: watch::Receiver<bool>) {
        info!(component = "reaper", "dead-letter reaper started");

        loop {
            if *drain.borrow() {
                break;
            }

            if let Err(err) = self.run_once().await {
                warn!(component = "reaper", error = %err, "reaper pass failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = drain.changed() => {}
            }
        }

        info!(component = "reaper", "dead-letter reaper drained");
    }
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
