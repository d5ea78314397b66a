//! # Hookline Engine
//!
//! The post-upload event pipeline: the shared queue, the usage-metrics
//! aggregator, object verification, the webhook delivery engine with its
//! worker loops, the dead-letter reaper, and the daily rollup worker.
//!
//! The engine consumes pending webhook records produced by the upstream
//! signed-URL handlers (through [`service::WebhookService`]), verifies
//! the uploaded object with the backing provider where required, signs
//! the canonical payload, and delivers it to the customer endpoint with
//! retries, per-host circuit breaking, and dead-lettering.

pub mod config;
pub mod delivery;
pub mod metrics;
pub mod queue;
pub mod reaper;
pub mod rollup;
pub mod service;
pub mod usage;
pub mod verifier;
pub mod worker;

pub use config::{ConfigError, EngineConfig};
pub use delivery::{BatchReport, DeliveryConfig, DeliveryEngine};
pub use metrics::PrometheusPipelineMetrics;
pub use queue::{QueueError, QueueItem, QueueStats, WebhookQueue};
pub use reaper::{DeadLetterReaper, ReaperConfig};
pub use rollup::{RollupConfig, RollupReport, RollupWorker};
pub use service::{ConfirmOutcome, CreatedWebhook, ServiceError, WebhookService};
pub use usage::{DailyUsage, UsageRecorder, UsageScanner};
pub use verifier::{ObjectVerifier, S3ObjectVerifier, Verification, VerifierError};
pub use worker::{DeliveryWorker, RequeuePoller, WorkerConfig};
