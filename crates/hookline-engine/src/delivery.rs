//! # Delivery Engine
//!
//! Executes batches of webhook deliveries in two phases:
//!
//! 1. **HTTP phase**: the batch is cut into chunks of at most the
//!    configured HTTP concurrency and each chunk runs concurrently:
//!    verification (auto trigger), signing, and the outbound POST. The
//!    cap protects the process's outbound connection pool; an unlimited
//!    fan-out at batch size 100 is a known retry-storm generator.
//! 2. **Commit phase**: the pending state writes of the whole batch are
//!    fired at the durable store in one concurrent volley, so database
//!    round trips are amortized instead of scattered per record.
//!
//! Failed deliveries are re-queued with configured delays plus jitter;
//! exhausted records are dead-lettered; destinations that keep failing
//! are circuit-broken per hostname.

use crate::queue::{QueueItem, WebhookQueue};
use crate::verifier::ObjectVerifier;
use hookline_core::record::{DeadLetterEntry, TriggerMode, WebhookRecord, WebhookStatus};
use hookline_core::signer::{
    PayloadExtras, SignedDelivery, EVENT_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
    WEBHOOK_ID_HEADER,
};
use hookline_core::{
    CircuitDecision, HostCircuitBreaker, PipelineMetrics, StoreError, Timestamp,
};
use hookline_core::{DeadLetterStore, WebhookStore};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Reason recorded when a dispatch is rejected by an open circuit.
pub const REASON_CIRCUIT_OPEN: &str = "circuit_open";

/// Reason recorded when an auto-trigger object is not yet present.
pub const REASON_NOT_FOUND_YET: &str = "file_not_found_yet";

/// Response bodies are stored up to this many bytes on success.
const RESPONSE_BODY_LIMIT: usize = 1000;

/// Response bodies are embedded in error messages up to this many bytes.
const ERROR_BODY_LIMIT: usize = 200;

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Attempts before a record dead-letters.
    pub max_attempts: u32,

    /// Backoff schedule; attempt `n` (1-based) waits `retry_delays[n-1]`.
    pub retry_delays: Vec<Duration>,

    /// Uniform jitter added on top of each retry delay.
    pub jitter_max: Duration,

    /// Per-request HTTP deadline.
    pub request_timeout: Duration,

    /// Items dequeued per batch.
    pub batch_size: usize,

    /// In-flight HTTP requests per worker.
    pub http_concurrency: usize,

    /// Re-queue delay when an auto-trigger object is not yet present.
    pub not_found_requeue_delay: Duration,

    /// Cool-off before the reaper may resurrect a dead-lettered record.
    pub dead_letter_retry_after: Duration,

    /// `User-Agent` for outbound deliveries.
    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(30),
            ],
            jitter_max: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(15),
            batch_size: 100,
            http_concurrency: 20,
            not_found_requeue_delay: Duration::from_secs(30),
            dead_letter_retry_after: Duration::from_secs(3600),
            user_agent: "hookline/0.1".to_string(),
        }
    }
}

impl DeliveryConfig {
    /// Delay before retry attempt `attempt` (1-based), with jitter.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hookline_engine::delivery::DeliveryConfig;
    /// use std::time::Duration;
    ///
    /// let config = DeliveryConfig::default();
    ///
    /// // First retry: 1s plus up to 1s of jitter
    /// let delay = config.retry_delay(1);
    /// assert!(delay >= Duration::from_secs(1));
    /// assert!(delay <= Duration::from_secs(2));
    ///
    /// // Third retry: 30s base
    /// assert!(config.retry_delay(3) >= Duration::from_secs(30));
    /// ```
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self
            .retry_delays
            .get((attempt.saturating_sub(1)) as usize)
            .copied()
            .or_else(|| self.retry_delays.last().copied())
            .unwrap_or(Duration::from_secs(30));
        let jitter_ms = if self.jitter_max.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_max.as_millis() as u64)
        };
        base + Duration::from_millis(jitter_ms)
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP client construction failed: {0}")]
    Client(#[from] reqwest::Error),
}

// ============================================================================
// Batch Accounting
// ============================================================================

/// Pending state write for one record, produced by the HTTP phase and
/// committed in the second phase.
#[derive(Debug)]
enum PendingWrite {
    Completed {
        record: WebhookRecord,
        attempt: i32,
        response_status: i32,
        response_body: String,
        at: Timestamp,
    },
    Retry {
        record: WebhookRecord,
        attempt: i32,
        next_retry_at: Timestamp,
        reason: String,
        at: Timestamp,
    },
    DeadLetter {
        record: WebhookRecord,
        attempt: i32,
        reason: String,
        at: Timestamp,
    },
    /// Auto trigger, object absent: already re-queued, record stays
    /// `pending`, no durable write needed.
    AwaitingObject,
    /// Record vanished or reached a terminal state elsewhere; drop the
    /// queue marker and move on.
    Skip { id: hookline_core::WebhookId },
}

/// Outcome tally for one processed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub awaiting_object: usize,
    pub skipped: usize,
    pub failed_writes: usize,
}

// ============================================================================
// Engine
// ============================================================================

/// The delivery engine: HTTP fan-out, retries, circuit breaking, and
/// batched durable commits.
pub struct DeliveryEngine {
    config: DeliveryConfig,
    http: reqwest::Client,
    breaker: Arc<HostCircuitBreaker>,
    webhooks: Arc<dyn WebhookStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    queue: Arc<WebhookQueue>,
    verifier: Arc<dyn ObjectVerifier>,
    metrics: Arc<dyn PipelineMetrics>,
}

impl DeliveryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DeliveryConfig,
        breaker: Arc<HostCircuitBreaker>,
        webhooks: Arc<dyn WebhookStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        queue: Arc<WebhookQueue>,
        verifier: Arc<dyn ObjectVerifier>,
        metrics: Arc<dyn PipelineMetrics>,
    ) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            config,
            http,
            breaker,
            webhooks,
            dead_letters,
            queue,
            verifier,
            metrics,
        })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Process one dequeued batch: chunked HTTP phase, then one durable
    /// commit volley. `deadline` bounds the HTTP phase; chunks that do
    /// not finish in time are abandoned and recovered later through the
    /// queue's processing markers.
    pub async fn process_batch(&self, items: Vec<QueueItem>, deadline: Instant) -> BatchReport {
        let mut writes: Vec<PendingWrite> = Vec::with_capacity(items.len());

        for chunk in items.chunks(self.config.http_concurrency.max(1)) {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                warn!(component = "delivery", abandoned = chunk.len(),
                    "batch deadline reached, committing partial batch");
                break;
            };

            let attempts = futures::future::join_all(
                chunk.iter().map(|item| self.attempt_delivery(item)),
            );
            match tokio::time::timeout(remaining, attempts).await {
                Ok(results) => writes.extend(results),
                Err(_) => {
                    warn!(component = "delivery", abandoned = chunk.len(),
                        "batch deadline cut chunk short, committing partial batch");
                    break;
                }
            }
        }

        self.commit_writes(writes).await
    }

    // ------------------------------------------------------------------
    // Phase 1: verification + HTTP (no durable state writes)
    // ------------------------------------------------------------------

    async fn attempt_delivery(&self, item: &QueueItem) -> PendingWrite {
        let started = std::time::Instant::now();

        let mut record = match self.webhooks.get(&item.id).await {
            Ok(record) => record,
            Err(StoreError::NotFound { .. }) => {
                debug!(component = "delivery", webhook_id = %item.id,
                    "record deleted, dropping queue item");
                return PendingWrite::Skip { id: item.id };
            }
            Err(err) => {
                // Can't even read the record; leave the processing
                // marker so the item comes back next cycle.
                error!(component = "delivery", webhook_id = %item.id, error = %err,
                    "record fetch failed, deferring item");
                return PendingWrite::AwaitingObject;
            }
        };

        if record.status.is_terminal() {
            return PendingWrite::Skip { id: item.id };
        }

        let attempt = record.attempt_count + 1;
        let at = Timestamp::now();

        // Auto trigger: confirm the object is actually stored first.
        if record.trigger_mode == TriggerMode::Auto
            && matches!(record.status, WebhookStatus::Pending | WebhookStatus::Verifying)
        {
            match self.verifier.verify(&record).await {
                Ok(verification) if !verification.exists => {
                    self.metrics.record_delivery_attempt("not_found_requeued");
                    if let Err(err) = self
                        .queue
                        .requeue(item, self.config.not_found_requeue_delay)
                        .await
                    {
                        error!(component = "delivery", webhook_id = %item.id, error = %err,
                            "re-queue after missing object failed");
                    }
                    debug!(component = "delivery", webhook_id = %item.id,
                        reason = REASON_NOT_FOUND_YET, "object not stored yet");
                    return PendingWrite::AwaitingObject;
                }
                Ok(verification) => {
                    self.metrics.record_verification(if verification.skipped {
                        "skipped"
                    } else {
                        "verified"
                    });
                    if let Some(metadata) = verification.metadata {
                        // Intermediate write; fine to do immediately.
                        if let Err(err) = self
                            .webhooks
                            .update_object_metadata(
                                &record.id,
                                metadata.etag.as_deref(),
                                metadata.content_length,
                            )
                            .await
                        {
                            warn!(component = "delivery", webhook_id = %item.id, error = %err,
                                "object metadata update failed");
                        }
                        if let Some(etag) = metadata.etag {
                            record.etag = Some(etag);
                        }
                        if let Some(size) = metadata.content_length {
                            record.file_size = Some(size);
                        }
                    }
                }
                Err(err) => {
                    self.metrics.record_verification("error");
                    return self.handle_failure(item, record, attempt, err.to_string(), at).await;
                }
            }
        }

        // Deliver.
        let host = record.target_host().unwrap_or_else(|| "unknown".to_string());
        if let CircuitDecision::Open { remaining } = self.breaker.check(&host) {
            debug!(component = "delivery", webhook_id = %item.id, host = %host,
                remaining_ms = remaining.as_millis() as u64, "circuit open, failing fast");
            self.metrics.record_delivery_attempt(REASON_CIRCUIT_OPEN);
            return self
                .handle_failure(item, record, attempt, REASON_CIRCUIT_OPEN.to_string(), at)
                .await;
        }

        let outcome = self.dispatch_http(&record).await;
        self.metrics.record_delivery_duration(started.elapsed());

        match outcome {
            Ok((status, body)) => {
                self.breaker.record_success(&host);
                PendingWrite::Completed {
                    record,
                    attempt,
                    response_status: status,
                    response_body: body,
                    at,
                }
            }
            Err(reason) => {
                if self.breaker.record_failure(&host) {
                    warn!(component = "delivery", host = %host, "circuit opened");
                    self.metrics.record_circuit_state(&host, true);
                }
                self.handle_failure(item, record, attempt, reason, at).await
            }
        }
    }

    /// POST the signed payload. Returns the status and truncated body on
    /// 2xx; a failure reason otherwise.
    async fn dispatch_http(&self, record: &WebhookRecord) -> Result<(i32, String), String> {
        let delivery = SignedDelivery::for_record(record, &PayloadExtras::default());

        let response = self
            .http
            .post(&record.target_url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, &delivery.signature)
            .header(WEBHOOK_ID_HEADER, &delivery.webhook_id)
            .header(EVENT_HEADER, delivery.event)
            .header(TIMESTAMP_HEADER, delivery.signed_at_millis.to_string())
            .body(delivery.body)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            Ok((
                status.as_u16() as i32,
                truncate_bytes(&body, RESPONSE_BODY_LIMIT),
            ))
        } else {
            Err(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_bytes(&body, ERROR_BODY_LIMIT)
            ))
        }
    }

    /// Decide between a scheduled retry and dead-lettering.
    async fn handle_failure(
        &self,
        item: &QueueItem,
        record: WebhookRecord,
        attempt: i32,
        reason: String,
        at: Timestamp,
    ) -> PendingWrite {
        if attempt >= self.config.max_attempts as i32 {
            self.metrics.record_delivery_attempt("dead_letter");
            return PendingWrite::DeadLetter {
                record,
                attempt,
                reason,
                at,
            };
        }

        let delay = self.config.retry_delay(attempt as u32);
        if let Err(err) = self.queue.requeue(item, delay).await {
            error!(component = "delivery", webhook_id = %item.id, error = %err,
                "re-queue for retry failed, relying on processing marker");
        }
        self.metrics.record_delivery_attempt("retried");
        PendingWrite::Retry {
            record,
            attempt,
            next_retry_at: at.add_duration(delay),
            reason,
            at,
        }
    }

    // ------------------------------------------------------------------
    // Phase 2: durable commit volley
    // ------------------------------------------------------------------

    async fn commit_writes(&self, writes: Vec<PendingWrite>) -> BatchReport {
        let mut report = BatchReport {
            processed: writes.len(),
            ..BatchReport::default()
        };

        let commits = writes.into_iter().map(|write| self.commit_one(write));
        for outcome in futures::future::join_all(commits).await {
            match outcome {
                CommitOutcome::Completed => report.completed += 1,
                CommitOutcome::Retried => report.retried += 1,
                CommitOutcome::DeadLettered => report.dead_lettered += 1,
                CommitOutcome::AwaitingObject => report.awaiting_object += 1,
                CommitOutcome::Skipped => report.skipped += 1,
                CommitOutcome::WriteFailed => report.failed_writes += 1,
            }
        }

        info!(component = "delivery", processed = report.processed,
            completed = report.completed, retried = report.retried,
            dead_lettered = report.dead_lettered, awaiting = report.awaiting_object,
            failed_writes = report.failed_writes, "batch committed");
        report
    }

    async fn commit_one(&self, write: PendingWrite) -> CommitOutcome {
        match write {
            PendingWrite::Completed {
                record,
                attempt,
                response_status,
                response_body,
                at,
            } => {
                let result = self
                    .webhooks
                    .record_delivery_success(&record.id, attempt, response_status, &response_body, at)
                    .await;
                if let Err(err) = result {
                    // Dropped transition; the record resurfaces via its
                    // processing marker and reconciles next cycle.
                    error!(component = "delivery", webhook_id = %record.id, error = %err,
                        "completion write failed");
                    return CommitOutcome::WriteFailed;
                }
                self.metrics.record_delivery_attempt("completed");
                let _ = self.queue.acknowledge(&record.id).await;
                CommitOutcome::Completed
            }
            PendingWrite::Retry {
                record,
                attempt,
                next_retry_at,
                reason,
                at,
            } => {
                let result = self
                    .webhooks
                    .record_retry(&record.id, attempt, next_retry_at, &reason, at)
                    .await;
                if let Err(err) = result {
                    error!(component = "delivery", webhook_id = %record.id, error = %err,
                        attempt, "retry write failed");
                    return CommitOutcome::WriteFailed;
                }
                CommitOutcome::Retried
            }
            PendingWrite::DeadLetter {
                record,
                attempt,
                reason,
                at,
            } => {
                if let Err(err) = self
                    .webhooks
                    .record_dead_letter(&record.id, attempt, &reason, at)
                    .await
                {
                    error!(component = "delivery", webhook_id = %record.id, error = %err,
                        "dead-letter status write failed");
                    return CommitOutcome::WriteFailed;
                }

                let mut snapshot = record.clone();
                snapshot.status = WebhookStatus::DeadLetter;
                snapshot.attempt_count = attempt;
                snapshot.error_message = Some(reason.clone());
                let entry = DeadLetterEntry::for_record(
                    &snapshot,
                    reason,
                    at.add_duration(self.config.dead_letter_retry_after),
                );
                if let Err(err) = self.dead_letters.insert(&entry).await {
                    error!(component = "delivery", webhook_id = %record.id, error = %err,
                        "dead-letter row insert failed");
                    return CommitOutcome::WriteFailed;
                }

                let _ = self.queue.acknowledge(&record.id).await;
                CommitOutcome::DeadLettered
            }
            PendingWrite::AwaitingObject => CommitOutcome::AwaitingObject,
            PendingWrite::Skip { id } => {
                let _ = self.queue.acknowledge(&id).await;
                CommitOutcome::Skipped
            }
        }
    }
}

enum CommitOutcome {
    Completed,
    Retried,
    DeadLettered,
    AwaitingObject,
    Skipped,
    WriteFailed,
}

/// Truncate at a byte budget without splitting a UTF-8 code point.
fn truncate_bytes(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
