//! # Admission Pipeline
//!
//! Three ordered gates applied to every gateway request before any
//! provider work: an in-process memory guard, a shared counter gate in
//! the counter store, and a durable monthly quota read through a short
//! cache. A failure at any gate short-circuits with the rejecting layer;
//! infrastructure outages fail open with a telemetry flag rather than
//! rejecting tenants wholesale.
//!
//! Admission errors are always recoverable; no gate mutates durable
//! state.

use crate::monitoring::PipelineMetrics;
use crate::storage::StoreError;
use crate::{TenantId, Timestamp};
use async_trait::async_trait;
use hookline_counter::CounterStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ============================================================================
// Core Types
// ============================================================================

/// Class of gateway operation being admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Minting an upload URL.
    Upload,
    /// Minting a download URL.
    Download,
    /// Confirming a finished upload.
    Confirm,
    /// Status and listing reads.
    Status,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Confirm => "confirm",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The gate that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateLayer {
    MemoryGuard,
    SharedCounter,
    DurableQuota,
}

impl GateLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryGuard => "memory_guard",
            Self::SharedCounter => "shared_counter",
            Self::DurableQuota => "durable_quota",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    /// The gate that rejected, or the last gate passed.
    pub layer: GateLayer,
    pub current_usage: i64,
    pub limit: i64,
    /// Set when a backing store was unreachable and the gate failed
    /// open. Surfaced in telemetry, never to the caller.
    pub degraded: bool,
}

impl GateDecision {
    fn allowed(layer: GateLayer, current_usage: i64, limit: i64) -> Self {
        Self {
            allowed: true,
            layer,
            current_usage,
            limit,
            degraded: false,
        }
    }

    fn rejected(layer: GateLayer, current_usage: i64, limit: i64) -> Self {
        Self {
            allowed: false,
            layer,
            current_usage,
            limit,
            degraded: false,
        }
    }

    fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

/// A tenant's monthly quota with its current durable usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantQuota {
    pub tenant_id: TenantId,
    pub monthly_limit: i64,
    pub current_usage: i64,
}

/// Source of truth for monthly tenant quotas (the durable store).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaSource: Send + Sync {
    async fn monthly_quota(&self, tenant: &TenantId) -> Result<TenantQuota, StoreError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the admission gates.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Memory guard window length.
    pub memory_window: Duration,

    /// Memory guard per-window limits by operation class.
    pub memory_limits: HashMap<OperationClass, u32>,

    /// Shared counter gate window length (also the counter TTL).
    pub shared_window: Duration,

    /// Shared counter gate per-window limits by operation class.
    pub shared_limits: HashMap<OperationClass, u32>,

    /// How long a cached quota row stays valid.
    pub quota_cache_ttl: Duration,

    /// Upper bound on tracked memory-guard keys; beyond it the guard
    /// fails open for new keys.
    pub max_tracked_keys: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let mut memory_limits = HashMap::new();
        memory_limits.insert(OperationClass::Upload, 100);
        memory_limits.insert(OperationClass::Download, 300);
        memory_limits.insert(OperationClass::Confirm, 100);
        memory_limits.insert(OperationClass::Status, 600);

        let mut shared_limits = HashMap::new();
        shared_limits.insert(OperationClass::Upload, 600);
        shared_limits.insert(OperationClass::Download, 1800);
        shared_limits.insert(OperationClass::Confirm, 600);
        shared_limits.insert(OperationClass::Status, 3600);

        Self {
            memory_window: Duration::from_secs(10),
            memory_limits,
            shared_window: Duration::from_secs(60),
            shared_limits,
            quota_cache_ttl: Duration::from_secs(300),
            max_tracked_keys: 10_000,
        }
    }
}

impl AdmissionConfig {
    fn memory_limit(&self, class: OperationClass) -> u32 {
        self.memory_limits.get(&class).copied().unwrap_or(100)
    }

    fn shared_limit(&self, class: OperationClass) -> u32 {
        self.shared_limits.get(&class).copied().unwrap_or(600)
    }
}

// ============================================================================
// Admission Pipeline
// ============================================================================

#[derive(Debug)]
struct WindowCounter {
    window_start: Instant,
    count: u32,
}

/// The three-gate admission pipeline.
pub struct AdmissionPipeline {
    config: AdmissionConfig,
    windows: Mutex<HashMap<(TenantId, OperationClass), WindowCounter>>,
    counters: Arc<dyn CounterStore>,
    quotas: Arc<dyn QuotaSource>,
    metrics: Arc<dyn PipelineMetrics>,
}

impl AdmissionPipeline {
    pub fn new(
        config: AdmissionConfig,
        counters: Arc<dyn CounterStore>,
        quotas: Arc<dyn QuotaSource>,
        metrics: Arc<dyn PipelineMetrics>,
    ) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            counters,
            quotas,
            metrics,
        }
    }

    /// Run all gates for one request. The first rejection short-circuits.
    pub async fn admit(&self, tenant: &TenantId, class: OperationClass) -> GateDecision {
        let decision = self.check_memory_guard(tenant, class);
        if !decision.allowed {
            self.metrics
                .record_admission_decision(decision.layer.as_str(), false);
            return decision;
        }

        let decision = self.check_shared_counter(tenant, class).await;
        if !decision.allowed {
            self.metrics
                .record_admission_decision(decision.layer.as_str(), false);
            return decision;
        }

        let decision = self.check_quota(tenant).await;
        self.metrics
            .record_admission_decision(decision.layer.as_str(), decision.allowed);
        decision
    }

    /// Evict cached quota state for a tenant after an external quota
    /// change.
    pub async fn invalidate_tenant(&self, tenant: &TenantId) {
        let key = quota_cache_key(tenant);
        if let Err(err) = self.counters.delete(&key).await {
            warn!(component = "admission", tenant = %tenant, error = %err,
                "failed to evict cached quota");
        }
    }

    // ------------------------------------------------------------------
    // Gate 1: memory guard
    // ------------------------------------------------------------------

    fn check_memory_guard(&self, tenant: &TenantId, class: OperationClass) -> GateDecision {
        let limit = self.config.memory_limit(class);
        let mut windows = self.windows.lock().expect("admission mutex poisoned");
        let now = Instant::now();

        let key = (tenant.clone(), class);
        if !windows.contains_key(&key) && windows.len() >= self.config.max_tracked_keys {
            // Guard map full; absorb the burst downstream instead of
            // rejecting here.
            debug!(component = "admission", tenant = %tenant,
                "memory guard map full, failing open");
            return GateDecision::allowed(GateLayer::MemoryGuard, 0, limit as i64);
        }

        let counter = windows.entry(key).or_insert(WindowCounter {
            window_start: now,
            count: 0,
        });
        if now.duration_since(counter.window_start) >= self.config.memory_window {
            counter.window_start = now;
            counter.count = 0;
        }
        counter.count += 1;

        if counter.count > limit {
            GateDecision::rejected(GateLayer::MemoryGuard, counter.count as i64, limit as i64)
        } else {
            GateDecision::allowed(GateLayer::MemoryGuard, counter.count as i64, limit as i64)
        }
    }

    // ------------------------------------------------------------------
    // Gate 2: shared counter
    // ------------------------------------------------------------------

    async fn check_shared_counter(&self, tenant: &TenantId, class: OperationClass) -> GateDecision {
        let limit = self.config.shared_limit(class);
        let window_secs = self.config.shared_window.as_secs().max(1);
        let window_id = Timestamp::now().epoch_seconds() / window_secs as i64;
        let key = format!("rl:{}:{}:{}", tenant.as_str(), class.as_str(), window_id);

        match self
            .counters
            .incr_with_ttl(&key, 1, self.config.shared_window)
            .await
        {
            Ok(current) if current > limit as i64 => {
                GateDecision::rejected(GateLayer::SharedCounter, current, limit as i64)
            }
            Ok(current) => GateDecision::allowed(GateLayer::SharedCounter, current, limit as i64),
            Err(err) => {
                warn!(component = "admission", tenant = %tenant, error = %err,
                    "counter store unreachable, shared gate failing open");
                self.metrics
                    .record_admission_degraded(GateLayer::SharedCounter.as_str());
                GateDecision::allowed(GateLayer::SharedCounter, 0, limit as i64).degraded()
            }
        }
    }

    // ------------------------------------------------------------------
    // Gate 3: durable quota through cache
    // ------------------------------------------------------------------

    async fn check_quota(&self, tenant: &TenantId) -> GateDecision {
        let cache_key = quota_cache_key(tenant);

        // Cache read is best-effort; a miss or store error falls through
        // to the source of truth.
        if let Ok(Some(cached)) = self.counters.get(&cache_key).await {
            if let Ok(quota) = serde_json::from_str::<TenantQuota>(&cached) {
                return Self::decide_quota(&quota);
            }
        }

        match self.quotas.monthly_quota(tenant).await {
            Ok(quota) => {
                let serialized = serde_json::to_string(&quota).unwrap_or_default();
                if let Err(err) = self
                    .counters
                    .set_with_ttl(&cache_key, &serialized, self.config.quota_cache_ttl)
                    .await
                {
                    debug!(component = "admission", tenant = %tenant, error = %err,
                        "failed to populate quota cache");
                }
                Self::decide_quota(&quota)
            }
            Err(err) => {
                warn!(component = "admission", tenant = %tenant, error = %err,
                    "quota source unreachable, failing open");
                self.metrics
                    .record_admission_degraded(GateLayer::DurableQuota.as_str());
                GateDecision::allowed(GateLayer::DurableQuota, 0, 0).degraded()
            }
        }
    }

    fn decide_quota(quota: &TenantQuota) -> GateDecision {
        if quota.current_usage >= quota.monthly_limit {
            GateDecision::rejected(
                GateLayer::DurableQuota,
                quota.current_usage,
                quota.monthly_limit,
            )
        } else {
            GateDecision::allowed(
                GateLayer::DurableQuota,
                quota.current_usage,
                quota.monthly_limit,
            )
        }
    }
}

fn quota_cache_key(tenant: &TenantId) -> String {
    format!("quota:{}", tenant.as_str())
}

#[cfg(test)]
#[path = "admission_tests.rs"]
mod tests;
