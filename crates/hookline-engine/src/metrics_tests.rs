//! Tests for the Prometheus metrics implementation.

use super::*;
use prometheus::Registry;

#[test]
fn test_collectors_register_once_per_registry() {
    let registry = Registry::new();
    assert!(PrometheusPipelineMetrics::new(&registry).is_ok());
    // Second registration against the same registry collides.
    assert!(PrometheusPipelineMetrics::new(&registry).is_err());
    // A fresh registry is fine.
    assert!(PrometheusPipelineMetrics::new(&Registry::new()).is_ok());
}

#[test]
fn test_recordings_show_up_in_gather() {
    let registry = Registry::new();
    let metrics = PrometheusPipelineMetrics::new(&registry).unwrap();

    metrics.record_admission_decision("memory_guard", false);
    metrics.record_metrics_dropped();
    metrics.record_metrics_dropped();
    metrics.record_delivery_attempt("completed");
    metrics.record_delivery_duration(Duration::from_millis(120));
    metrics.record_queue_depth("normal", 42);
    metrics.record_circuit_state("example.com", true);
    metrics.record_dead_letter_resurrected(3);
    metrics.record_rollup_run(10, 1);

    let families = registry.gather();
    let by_name = |name: &str| {
        families
            .iter()
            .find(|f| f.get_name() == name)
            .unwrap_or_else(|| panic!("missing family {name}"))
    };

    let dropped = by_name("metrics_dropped_total");
    assert_eq!(dropped.get_metric()[0].get_counter().get_value(), 2.0);

    let depth = by_name("webhook_queue_depth");
    assert_eq!(depth.get_metric()[0].get_gauge().get_value(), 42.0);

    let resurrected = by_name("dead_letter_resurrected_total");
    assert_eq!(resurrected.get_metric()[0].get_counter().get_value(), 3.0);
}
