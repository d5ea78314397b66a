//! # Rollup Worker
//!
//! Daily drain of the counter-store usage aggregates into durable
//! per-day rows, plus the retention sweeps.
//!
//! Each key is an independent unit of work: its rollup row is upserted
//! wholesale (the aggregate is the source of truth for that day) and the
//! counter key is deleted only after the upsert commits. A failed upsert
//! leaves the key for the next run.

use crate::usage::{DailyUsage, UsageScanner};
use hookline_core::storage::DailyRollup;
use hookline_core::{DeadLetterStore, PipelineMetrics, RollupStore, Timestamp, WebhookStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Tuning for the rollup worker.
#[derive(Debug, Clone)]
pub struct RollupConfig {
    /// Wall-clock hour (UTC) of the daily run.
    pub hour_utc: u32,

    /// Scan page size.
    pub page_size: usize,

    /// Completed records older than this are purged.
    pub completed_retention: Duration,

    /// Resolved dead-letter rows older than this are purged.
    pub dead_letter_retention: Duration,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            hour_utc: 2,
            page_size: 100,
            completed_retention: Duration::from_secs(30 * 24 * 3600),
            dead_letter_retention: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Outcome of one rollup run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RollupReport {
    pub keys_rolled: u64,
    pub keys_failed: u64,
    pub purged_webhooks: u64,
    pub purged_dead_letters: u64,
}

/// The rollup worker.
pub struct RollupWorker {
    config: RollupConfig,
    scanner: UsageScanner,
    rollups: Arc<dyn RollupStore>,
    webhooks: Arc<dyn WebhookStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    metrics: Arc<dyn PipelineMetrics>,
}

impl RollupWorker {
    pub fn new(
        config: RollupConfig,
        scanner: UsageScanner,
        rollups: Arc<dyn RollupStore>,
        webhooks: Arc<dyn WebhookStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        metrics: Arc<dyn PipelineMetrics>,
    ) -> Self {
        Self {
            config,
            scanner,
            rollups,
            webhooks,
            dead_letters,
            metrics,
        }
    }

    fn to_rollup(usage: &DailyUsage) -> DailyRollup {
        DailyRollup {
            api_key_id: usage.api_key_id.clone(),
            tenant_id: usage.tenant_id.clone(),
            date: usage.date.clone(),
            total_requests: usage.total_requests,
            providers: usage.providers.clone(),
            file_types: usage.file_types.clone(),
            file_categories: usage.file_categories.clone(),
            last_used_at: usage.last_used_at,
        }
    }

    /// Roll up aggregates, optionally restricted to one calendar date
    /// (`YYYY-MM-DD`). On-demand runs pass a date; `None` drains
    /// everything present, today's still-accumulating keys included.
    pub async fn run_for_date(&self, date: Option<&str>) -> RollupReport {
        match date {
            Some(only) => self.run_filtered(|candidate| candidate == only).await,
            None => self.run_filtered(|_| true).await,
        }
    }

    /// Scheduled sweep: drain every aggregate whose day is already
    /// closed (date before today, UTC). This picks up yesterday's keys
    /// and any backlog left behind by earlier failed upserts, while
    /// leaving today's still-accumulating keys alone; rolling those up
    /// early would delete counts that the wholesale upsert of the next
    /// run could no longer see.
    pub async fn run_closed_days(&self) -> RollupReport {
        let today = Timestamp::now().date_key();
        self.run_filtered(|candidate| candidate < today.as_str()).await
    }

    async fn run_filtered(&self, keep: impl Fn(&str) -> bool) -> RollupReport {
        let mut report = RollupReport::default();

        let aggregates = match self.scanner.scan(self.config.page_size).await {
            Ok(aggregates) => aggregates,
            Err(err) => {
                warn!(component = "rollup", error = %err, "usage scan failed");
                return report;
            }
        };

        for usage in aggregates {
            if !keep(&usage.date) {
                continue;
            }

            let rollup = Self::to_rollup(&usage);
            if let Err(err) = self.rollups.upsert_daily(&rollup).await {
                warn!(component = "rollup", api_key = %usage.api_key_id,
                    date = %usage.date, error = %err,
                    "rollup upsert failed, keeping counter key");
                report.keys_failed += 1;
                continue;
            }

            // Upsert committed; the key may go.
            if let Err(err) = self.scanner.delete(&usage.api_key_id, &usage.date).await {
                warn!(component = "rollup", api_key = %usage.api_key_id, error = %err,
                    "counter key delete failed; next run will overwrite the same row");
            }

            // Monthly quota accounting. Best-effort after the key is
            // gone, so a failure undercounts rather than double-counts.
            if let Some(tenant) = usage.tenant_id.as_ref() {
                let month = &usage.date[..7.min(usage.date.len())];
                if let Err(err) = self
                    .rollups
                    .add_monthly_usage(tenant, month, usage.total_requests)
                    .await
                {
                    warn!(component = "rollup", tenant = %tenant, error = %err,
                        "monthly usage update failed");
                }
            }

            report.keys_rolled += 1;
        }

        self.metrics
            .record_rollup_run(report.keys_rolled, report.keys_failed);
        info!(component = "rollup", rolled = report.keys_rolled,
            failed = report.keys_failed, "rollup run finished");
        report
    }

    /// Retention sweeps for completed records and resolved dead letters.
    pub async fn run_retention(&self) -> RollupReport {
        let mut report = RollupReport::default();
        let now = Timestamp::now();

        match self
            .webhooks
            .purge_completed_before(now.subtract_duration(self.config.completed_retention))
            .await
        {
            Ok(purged) => report.purged_webhooks = purged,
            Err(err) => warn!(component = "rollup", error = %err, "webhook purge failed"),
        }

        match self
            .dead_letters
            .purge_resolved_before(now.subtract_duration(self.config.dead_letter_retention))
            .await
        {
            Ok(purged) => report.purged_dead_letters = purged,
            Err(err) => warn!(component = "rollup", error = %err, "dead-letter purge failed"),
        }

        if report.purged_webhooks > 0 || report.purged_dead_letters > 0 {
            info!(component = "rollup", webhooks = report.purged_webhooks,
                dead_letters = report.purged_dead_letters, "retention sweep finished");
        }
        report
    }

    /// Seconds until the next scheduled run at `hour_utc`.
    fn until_next_run(&self, now: Timestamp) -> Duration {
        let now_secs = now.epoch_seconds();
        let day = 24 * 3600;
        let today_run = (now_secs / day) * day + (self.config.hour_utc as i64) * 3600;
        let next = if today_run > now_secs {
            today_run
        } else {
            today_run + day
        };
        Duration::from_secs((next - now_secs) as u64)
    }

    /// Run daily at the configured hour until drained. Each scheduled
    /// run drains all closed days (the just-finished UTC day plus any
    /// backlog from failed upserts) and then sweeps retention.
    pub async fn run(&self, mut drain: watch::Receiver<bool>) {
        info!(component = "rollup", hour_utc = self.config.hour_utc, "rollup worker started");

        loop {
            if *drain.borrow() {
                break;
            }

            let wait = self.until_next_run(Timestamp::now());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = drain.changed() => { continue; }
            }

            self.run_closed_days().await;
            self.run_retention().await;
        }

        info!(component = "rollup", "rollup worker drained");
    }
}

#[cfg(test)]
#[path = "rollup_tests.rs"]
mod tests;
