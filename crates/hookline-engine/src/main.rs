//! Hookline pipeline binary.
//!
//! Wires the stores, queue, and workers together from environment
//! configuration and runs until SIGTERM/ctrl-c, then drains.

use anyhow::Context;
use hookline_core::{CredentialKey, HostCircuitBreaker, PipelineMetrics};
use hookline_engine::{
    DeadLetterReaper, DeliveryEngine, DeliveryWorker, EngineConfig, PrometheusPipelineMetrics,
    RequeuePoller, RollupWorker, S3ObjectVerifier, UsageScanner, WebhookQueue, WorkerConfig,
};
use hookline_store::{PgDeadLetterStore, PgRollupStore, PgWebhookStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();

    let config = EngineConfig::from_env().context("engine configuration")?;
    info!(workers = config.worker_count, batch = config.batch_size, "starting hookline");

    // Durable store.
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections((config.worker_count * 4).max(8) as u32)
        .connect(&config.database_url)
        .await
        .context("connecting to durable store")?;
    hookline_store::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let webhooks = Arc::new(PgWebhookStore::new(pool.clone()));
    let dead_letters = Arc::new(PgDeadLetterStore::new(pool.clone()));
    let rollups = Arc::new(PgRollupStore::new(pool.clone()));

    // Shared counter store.
    let counters = Arc::new(
        hookline_counter::RedisCounterStore::connect(&config.redis_url)
            .await
            .context("connecting to counter store")?,
    );
    let queue = Arc::new(WebhookQueue::new(counters.clone()));

    // Observability.
    let registry = prometheus::default_registry();
    let metrics: Arc<dyn PipelineMetrics> =
        Arc::new(PrometheusPipelineMetrics::new(registry).context("registering metrics")?);

    // Credential sealing key. Without one, records carrying sealed
    // credentials cannot be unsealed by this replica.
    let credential_key = match config.credential_key.as_deref() {
        Some(encoded) => CredentialKey::from_base64(encoded).context("HOOKLINE_CREDENTIAL_KEY")?,
        None => {
            warn!("HOOKLINE_CREDENTIAL_KEY not set; using an ephemeral key");
            CredentialKey::generate()
        }
    };
    let verifier = Arc::new(S3ObjectVerifier::new(credential_key));

    // Delivery engine shared by all workers; the circuit-breaker map is
    // the only state they share.
    let breaker = Arc::new(HostCircuitBreaker::new(config.circuit_breaker_config()));
    let engine = Arc::new(DeliveryEngine::new(
        config.delivery_config(),
        breaker,
        webhooks.clone(),
        dead_letters.clone(),
        queue.clone(),
        verifier,
        metrics.clone(),
    )?);

    let (drain_tx, drain_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for worker_id in 0..config.worker_count {
        let worker = DeliveryWorker::new(
            worker_id,
            engine.clone(),
            queue.clone(),
            WorkerConfig::default(),
            metrics.clone(),
        );
        let drain = drain_rx.clone();
        tasks.push(tokio::spawn(async move { worker.run(drain).await }));
    }

    let poller = RequeuePoller::new(queue.clone(), WorkerConfig::default().poll_interval);
    let drain = drain_rx.clone();
    tasks.push(tokio::spawn(async move { poller.run(drain).await }));

    let reaper = DeadLetterReaper::new(
        config.reaper_config(),
        webhooks.clone(),
        dead_letters.clone(),
        queue.clone(),
        metrics.clone(),
    );
    let drain = drain_rx.clone();
    tasks.push(tokio::spawn(async move { reaper.run(drain).await }));

    let rollup = RollupWorker::new(
        config.rollup_config(),
        UsageScanner::new(counters.clone()),
        rollups,
        webhooks.clone(),
        dead_letters.clone(),
        metrics.clone(),
    );
    let drain = drain_rx.clone();
    tasks.push(tokio::spawn(async move { rollup.run(drain).await }));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received, draining workers");
    drain_tx.send(true).ok();

    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "worker task join failed");
        }
    }

    info!("hookline stopped");
    Ok(())
}
