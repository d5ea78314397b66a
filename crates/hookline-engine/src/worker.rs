//! # Worker Loops
//!
//! Long-lived tasks that drive the pipeline: delivery workers
//! alternating between batch dequeue and delivery, and the re-queue
//! poller that returns due processing entries to the queue.
//!
//! Workers share no in-process state except the circuit-breaker map
//! inside the engine. Shutdown is a drain signal: a worker finishes its
//! current batch (bounded by the batch deadline), commits, and exits;
//! items it never got to revert through the queue's processing markers.

use crate::delivery::DeliveryEngine;
use crate::queue::WebhookQueue;
use hookline_core::PipelineMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Tuning for worker loops.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between ticks when the queue is empty.
    pub idle_interval: Duration,

    /// Overall deadline for one batch's HTTP phase.
    pub batch_deadline: Duration,

    /// Interval between re-queue poller sweeps.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(1),
            batch_deadline: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// One delivery worker loop.
pub struct DeliveryWorker {
    id: usize,
    engine: Arc<DeliveryEngine>,
    queue: Arc<WebhookQueue>,
    config: WorkerConfig,
    metrics: Arc<dyn PipelineMetrics>,
}

impl DeliveryWorker {
    pub fn new(
        id: usize,
        engine: Arc<DeliveryEngine>,
        queue: Arc<WebhookQueue>,
        config: WorkerConfig,
        metrics: Arc<dyn PipelineMetrics>,
    ) -> Self {
        Self {
            id,
            engine,
            queue,
            config,
            metrics,
        }
    }

    /// Run until the drain signal flips. The in-progress batch is always
    /// finished and committed before exiting.
    pub async fn run(&self, mut drain: watch::Receiver<bool>) {
        info!(component = "worker", worker = self.id, "delivery worker started");

        loop {
            if *drain.borrow() {
                break;
            }

            let batch_size = self.engine.config().batch_size;
            let items = match self.queue.dequeue_batch(batch_size).await {
                Ok(items) => items,
                Err(err) => {
                    // Counter store is a hard dependency; deliveries
                    // stall until it returns.
                    error!(component = "worker", worker = self.id, error = %err,
                        "dequeue failed");
                    Vec::new()
                }
            };

            if items.is_empty() {
                if let Ok(stats) = self.queue.stats().await {
                    self.metrics.record_queue_depth("normal", stats.normal);
                    self.metrics.record_queue_depth("priority", stats.priority);
                    self.metrics.record_queue_depth("processing", stats.processing);
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_interval) => {}
                    _ = drain.changed() => {}
                }
                continue;
            }

            debug!(component = "worker", worker = self.id, batch = items.len(),
                "processing batch");
            let deadline = Instant::now() + self.config.batch_deadline;
            self.engine.process_batch(items, deadline).await;
        }

        info!(component = "worker", worker = self.id, "delivery worker drained");
    }
}

/// Sweeps processing markers and re-enqueues due items.
pub struct RequeuePoller {
    queue: Arc<WebhookQueue>,
    interval: Duration,
}

impl RequeuePoller {
    pub fn new(queue: Arc<WebhookQueue>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    pub async fn run(&self, mut drain: watch::Receiver<bool>) {
        info!(component = "poller", "re-queue poller started");

        loop {
            if *drain.borrow() {
                break;
            }

            match self.queue.poll_due(100).await {
                Ok(0) => {}
                Ok(count) => {
                    debug!(component = "poller", count, "re-enqueued due items")
                }
                Err(err) => {
                    error!(component = "poller", error = %err, "poll sweep failed")
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = drain.changed() => {}
            }
        }

        info!(component = "poller", "re-queue poller drained");
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
