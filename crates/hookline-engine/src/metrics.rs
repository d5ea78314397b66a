//! Prometheus implementation of the pipeline metrics trait.

use hookline_core::PipelineMetrics;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::time::Duration;

/// Pipeline metrics backed by a Prometheus registry.
#[derive(Debug)]
pub struct PrometheusPipelineMetrics {
    admission_decisions: IntCounterVec,
    admission_degraded: IntCounterVec,
    metrics_dropped_total: IntCounter,
    delivery_attempts: IntCounterVec,
    delivery_duration_seconds: Histogram,
    verifications: IntCounterVec,
    queue_depth: IntGaugeVec,
    circuit_open: IntGaugeVec,
    dead_letter_resurrected_total: IntCounter,
    rollup_keys_total: IntCounterVec,
}

impl PrometheusPipelineMetrics {
    /// Create and register all collectors against `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let admission_decisions = IntCounterVec::new(
            Opts::new("admission_decisions_total", "Admission gate decisions"),
            &["layer", "allowed"],
        )?;
        let admission_degraded = IntCounterVec::new(
            Opts::new(
                "admission_degraded_total",
                "Admission gates that failed open on backing-store outage",
            ),
            &["layer"],
        )?;
        let metrics_dropped_total = IntCounter::new(
            "metrics_dropped_total",
            "Usage metric writes dropped due to counter-store outage",
        )?;
        let delivery_attempts = IntCounterVec::new(
            Opts::new("webhook_delivery_attempts_total", "Delivery attempt outcomes"),
            &["outcome"],
        )?;
        let delivery_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "webhook_delivery_duration_seconds",
                "Time spent in the HTTP phase of one delivery",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]),
        )?;
        let verifications = IntCounterVec::new(
            Opts::new("object_verifications_total", "Object verification outcomes"),
            &["outcome"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("webhook_queue_depth", "Queue depth per lane"),
            &["lane"],
        )?;
        let circuit_open = IntGaugeVec::new(
            Opts::new("delivery_circuit_open", "Circuit state per destination host"),
            &["host"],
        )?;
        let dead_letter_resurrected_total = IntCounter::new(
            "dead_letter_resurrected_total",
            "Dead-letter entries resurrected by the reaper",
        )?;
        let rollup_keys_total = IntCounterVec::new(
            Opts::new("rollup_keys_total", "Rollup keys processed per run"),
            &["result"],
        )?;

        registry.register(Box::new(admission_decisions.clone()))?;
        registry.register(Box::new(admission_degraded.clone()))?;
        registry.register(Box::new(metrics_dropped_total.clone()))?;
        registry.register(Box::new(delivery_attempts.clone()))?;
        registry.register(Box::new(delivery_duration_seconds.clone()))?;
        registry.register(Box::new(verifications.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(circuit_open.clone()))?;
        registry.register(Box::new(dead_letter_resurrected_total.clone()))?;
        registry.register(Box::new(rollup_keys_total.clone()))?;

        Ok(Self {
            admission_decisions,
            admission_degraded,
            metrics_dropped_total,
            delivery_attempts,
            delivery_duration_seconds,
            verifications,
            queue_depth,
            circuit_open,
            dead_letter_resurrected_total,
            rollup_keys_total,
        })
    }
}

impl PipelineMetrics for PrometheusPipelineMetrics {
    fn record_admission_decision(&self, layer: &str, allowed: bool) {
        self.admission_decisions
            .with_label_values(&[layer, if allowed { "true" } else { "false" }])
            .inc();
    }

    fn record_admission_degraded(&self, layer: &str) {
        self.admission_degraded.with_label_values(&[layer]).inc();
    }

    fn record_metrics_dropped(&self) {
        self.metrics_dropped_total.inc();
    }

    fn record_delivery_attempt(&self, outcome: &str) {
        self.delivery_attempts.with_label_values(&[outcome]).inc();
    }

    fn record_delivery_duration(&self, duration: Duration) {
        self.delivery_duration_seconds.observe(duration.as_secs_f64());
    }

    fn record_verification(&self, outcome: &str) {
        self.verifications.with_label_values(&[outcome]).inc();
    }

    fn record_queue_depth(&self, lane: &str, depth: i64) {
        self.queue_depth.with_label_values(&[lane]).set(depth);
    }

    fn record_circuit_state(&self, host: &str, open: bool) {
        self.circuit_open
            .with_label_values(&[host])
            .set(if open { 1 } else { 0 });
    }

    fn record_dead_letter_resurrected(&self, count: u64) {
        self.dead_letter_resurrected_total.inc_by(count);
    }

    fn record_rollup_run(&self, keys_rolled: u64, keys_failed: u64) {
        self.rollup_keys_total
            .with_label_values(&["rolled"])
            .inc_by(keys_rolled);
        self.rollup_keys_total
            .with_label_values(&["failed"])
            .inc_by(keys_failed);
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
