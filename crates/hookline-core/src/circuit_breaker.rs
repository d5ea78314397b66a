//! # Delivery Circuit Breaker
//!
//! Per-destination-hostname breaker for outbound webhook deliveries.
//!
//! State is deliberately process-local: each worker replica tracks its own
//! `{failure_count, break_until}` per host, and in the worst case N
//! replicas open independently. Consecutive failures within the failure
//! window trip the circuit at exactly the configured threshold; while
//! open, dispatches to that host fail fast without a connection attempt.
//! A single success resets the host's state.
//!
//! # Examples
//!
//! ```rust
//! use hookline_core::circuit_breaker::{
//!     CircuitBreakerConfig, CircuitDecision, HostCircuitBreaker,
//! };
//!
//! let breaker = HostCircuitBreaker::new(CircuitBreakerConfig::default());
//! assert_eq!(breaker.check("example.com"), CircuitDecision::Allow);
//!
//! // Failures below the threshold leave the circuit closed.
//! breaker.record_failure("example.com");
//! assert!(!breaker.is_open("example.com"));
//!
//! // A success wipes the host's failure count.
//! breaker.record_success("example.com");
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Configuration for the per-host circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long an open circuit rejects dispatches.
    pub break_duration: Duration,

    /// Failures older than this no longer count as consecutive.
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(300),
            failure_window: Duration::from_secs(60),
        }
    }
}

/// Outcome of a pre-dispatch circuit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Dispatch may proceed.
    Allow,
    /// Circuit is open; fail fast.
    Open { remaining: Duration },
}

#[derive(Debug, Default)]
struct HostState {
    failure_count: u32,
    last_failure_at: Option<Instant>,
    break_until: Option<Instant>,
}

/// Thread-safe per-hostname circuit breaker map.
///
/// The map is the only mutable state shared between delivery workers in
/// one process; all access is under a mutex.
pub struct HostCircuitBreaker {
    config: CircuitBreakerConfig,
    hosts: Mutex<HashMap<String, HostState>>,
}

impl HostCircuitBreaker {
    /// Create a breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a dispatch to `host` may proceed.
    ///
    /// An expired break is cleared here, so the first dispatch after the
    /// break duration goes out on the wire again.
    pub fn check(&self, host: &str) -> CircuitDecision {
        let mut hosts = self.hosts.lock().expect("circuit breaker mutex poisoned");
        let Some(state) = hosts.get_mut(host) else {
            return CircuitDecision::Allow;
        };

        if let Some(break_until) = state.break_until {
            let now = Instant::now();
            if now < break_until {
                return CircuitDecision::Open {
                    remaining: break_until - now,
                };
            }
            // Break elapsed; probe again with a clean slate.
            state.break_until = None;
            state.failure_count = 0;
            state.last_failure_at = None;
        }

        CircuitDecision::Allow
    }

    /// Record a delivery failure. Returns `true` when this failure opened
    /// the circuit.
    pub fn record_failure(&self, host: &str) -> bool {
        let mut hosts = self.hosts.lock().expect("circuit breaker mutex poisoned");
        let state = hosts.entry(host.to_string()).or_default();
        let now = Instant::now();

        // Stale failures are not consecutive.
        if let Some(last) = state.last_failure_at {
            if now.duration_since(last) > self.config.failure_window {
                state.failure_count = 0;
            }
        }

        state.failure_count += 1;
        state.last_failure_at = Some(now);

        if state.break_until.is_none() && state.failure_count >= self.config.failure_threshold {
            state.break_until = Some(now + self.config.break_duration);
            return true;
        }
        false
    }

    /// Record a delivery success, resetting the host's state.
    pub fn record_success(&self, host: &str) {
        let mut hosts = self.hosts.lock().expect("circuit breaker mutex poisoned");
        hosts.remove(host);
    }

    /// Whether the circuit for `host` is currently open.
    pub fn is_open(&self, host: &str) -> bool {
        matches!(self.check(host), CircuitDecision::Open { .. })
    }

    /// Snapshot of open hosts, for metrics.
    pub fn open_hosts(&self) -> Vec<String> {
        let hosts = self.hosts.lock().expect("circuit breaker mutex poisoned");
        let now = Instant::now();
        hosts
            .iter()
            .filter(|(_, state)| state.break_until.map(|t| now < t).unwrap_or(false))
            .map(|(host, _)| host.clone())
            .collect()
    }
}

impl Default for HostCircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
#[path = "circuit_breaker_tests.rs"]
mod tests;
