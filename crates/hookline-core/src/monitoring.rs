//! Metrics collection for pipeline operations.
//!
//! The trait defines what the pipeline records; infrastructure layers
//! implement it (Prometheus in the engine crate). Recording is
//! best-effort: implementations must never fail or block business
//! operations.
//!
//! # Examples
//!
//! ```rust
//! use hookline_core::monitoring::{NoOpPipelineMetrics, PipelineMetrics};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! // For production: inject the Prometheus-backed collector
//! // For tests: use NoOpPipelineMetrics
//! let metrics: Arc<dyn PipelineMetrics> = Arc::new(NoOpPipelineMetrics);
//!
//! // Record a delivery outcome
//! metrics.record_delivery_attempt("completed");
//! metrics.record_delivery_duration(Duration::from_millis(150));
//!
//! // Record a dropped usage write
//! metrics.record_metrics_dropped();
//! ```

use std::time::Duration;

/// Metrics collector for pipeline operations.
///
/// All methods take `&self` so an `Arc<dyn PipelineMetrics>` can be
/// shared across async tasks; implementations must be thread-safe.
pub trait PipelineMetrics: Send + Sync {
    /// Record an admission gate decision.
    fn record_admission_decision(&self, layer: &str, allowed: bool);

    /// Record an admission gate failing open because its backing store
    /// was unreachable.
    fn record_admission_degraded(&self, layer: &str);

    /// Record a usage-metric write dropped due to counter-store outage.
    fn record_metrics_dropped(&self);

    /// Record the outcome of one delivery attempt
    /// (`completed`, `retried`, `dead_letter`, `circuit_open`,
    /// `not_found_requeued`).
    fn record_delivery_attempt(&self, outcome: &str);

    /// Record time spent in the HTTP phase of one delivery.
    fn record_delivery_duration(&self, duration: Duration);

    /// Record an object verification outcome
    /// (`verified`, `skipped`, `missing`, `error`).
    fn record_verification(&self, outcome: &str);

    /// Record current queue depth for a lane (`normal`, `priority`,
    /// `processing`).
    fn record_queue_depth(&self, lane: &str, depth: i64);

    /// Record a circuit opening or closing for a host.
    fn record_circuit_state(&self, host: &str, open: bool);

    /// Record dead-letter rows resurrected by the reaper.
    fn record_dead_letter_resurrected(&self, count: u64);

    /// Record a completed rollup run.
    fn record_rollup_run(&self, keys_rolled: u64, keys_failed: u64);
}

/// No-op metrics collector for testing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPipelineMetrics;

impl PipelineMetrics for NoOpPipelineMetrics {
    fn record_admission_decision(&self, _layer: &str, _allowed: bool) {}

    fn record_admission_degraded(&self, _layer: &str) {}

    fn record_metrics_dropped(&self) {}

    fn record_delivery_attempt(&self, _outcome: &str) {}

    fn record_delivery_duration(&self, _duration: Duration) {}

    fn record_verification(&self, _outcome: &str) {}

    fn record_queue_depth(&self, _lane: &str, _depth: i64) {}

    fn record_circuit_state(&self, _host: &str, _open: bool) {}

    fn record_dead_letter_resurrected(&self, _count: u64) {}

    fn record_rollup_run(&self, _keys_rolled: u64, _keys_failed: u64) {}
}
