//! Environment-driven engine configuration.
//!
//! The pipeline is configured entirely through environment variables,
//! with validated defaults matching the deployment surface:
//! `WEBHOOK_MAX_ATTEMPTS`, `WEBHOOK_RETRY_DELAY_{1,2,3}` (ms),
//! `WEBHOOK_TIMEOUT` (ms), `WEBHOOK_CIRCUIT_BREAK_{THRESHOLD,DURATION,WINDOW}`,
//! `WEBHOOK_BATCH_SIZE`, `WEBHOOK_HTTP_CONCURRENCY`, plus the ambient
//! `DATABASE_URL`, `REDIS_URL`, and worker/scheduling knobs.

use crate::delivery::DeliveryConfig;
use crate::reaper::ReaperConfig;
use crate::rollup::RollupConfig;
use hookline_core::CircuitBreakerConfig;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable '{key}'")]
    Missing { key: &'static str },

    #[error("environment variable '{key}' has invalid value '{value}': {message}")]
    Invalid {
        key: &'static str,
        value: String,
        message: String,
    },
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub redis_url: String,
    /// Base64 AES-256-GCM key for credential sealing, when configured.
    pub credential_key: Option<String>,

    pub max_attempts: u32,
    pub retry_delays: [Duration; 3],
    pub request_timeout: Duration,

    pub circuit_threshold: u32,
    pub circuit_duration: Duration,
    pub circuit_window: Duration,

    pub batch_size: usize,
    pub http_concurrency: usize,
    pub worker_count: usize,

    pub rollup_hour_utc: u32,
    pub reaper_interval: Duration,
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            database_url: lookup("DATABASE_URL")
                .ok_or(ConfigError::Missing { key: "DATABASE_URL" })?,
            redis_url: lookup("REDIS_URL").ok_or(ConfigError::Missing { key: "REDIS_URL" })?,
            credential_key: lookup("HOOKLINE_CREDENTIAL_KEY"),

            max_attempts: parse_or(&lookup, "WEBHOOK_MAX_ATTEMPTS", 3)?,
            retry_delays: [
                millis_or(&lookup, "WEBHOOK_RETRY_DELAY_1", 1_000)?,
                millis_or(&lookup, "WEBHOOK_RETRY_DELAY_2", 5_000)?,
                millis_or(&lookup, "WEBHOOK_RETRY_DELAY_3", 30_000)?,
            ],
            request_timeout: millis_or(&lookup, "WEBHOOK_TIMEOUT", 15_000)?,

            circuit_threshold: parse_or(&lookup, "WEBHOOK_CIRCUIT_BREAK_THRESHOLD", 5)?,
            circuit_duration: millis_or(&lookup, "WEBHOOK_CIRCUIT_BREAK_DURATION", 300_000)?,
            circuit_window: millis_or(&lookup, "WEBHOOK_CIRCUIT_BREAK_WINDOW", 60_000)?,

            batch_size: parse_or(&lookup, "WEBHOOK_BATCH_SIZE", 100)?,
            http_concurrency: parse_or(&lookup, "WEBHOOK_HTTP_CONCURRENCY", 20)?,
            worker_count: parse_or(&lookup, "HOOKLINE_WORKER_COUNT", default_worker_count())?,

            rollup_hour_utc: parse_or(&lookup, "HOOKLINE_ROLLUP_HOUR_UTC", 2)?,
            reaper_interval: secs_or(&lookup, "HOOKLINE_REAPER_INTERVAL_SECS", 300)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid("WEBHOOK_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("WEBHOOK_BATCH_SIZE", "0", "must be at least 1"));
        }
        if !(1..=100).contains(&self.http_concurrency) {
            return Err(invalid(
                "WEBHOOK_HTTP_CONCURRENCY",
                &self.http_concurrency.to_string(),
                "must be between 1 and 100",
            ));
        }
        if self.worker_count == 0 {
            return Err(invalid("HOOKLINE_WORKER_COUNT", "0", "must be at least 1"));
        }
        if self.rollup_hour_utc > 23 {
            return Err(invalid(
                "HOOKLINE_ROLLUP_HOUR_UTC",
                &self.rollup_hour_utc.to_string(),
                "must be an hour 0-23",
            ));
        }
        if self.circuit_threshold == 0 {
            return Err(invalid(
                "WEBHOOK_CIRCUIT_BREAK_THRESHOLD",
                "0",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: self.max_attempts,
            retry_delays: self.retry_delays.to_vec(),
            request_timeout: self.request_timeout,
            batch_size: self.batch_size,
            http_concurrency: self.http_concurrency,
            ..DeliveryConfig::default()
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_threshold,
            break_duration: self.circuit_duration,
            failure_window: self.circuit_window,
        }
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            interval: self.reaper_interval,
            ..ReaperConfig::default()
        }
    }

    pub fn rollup_config(&self) -> RollupConfig {
        RollupConfig {
            hour_utc: self.rollup_hour_utc,
            ..RollupConfig::default()
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn invalid(key: &'static str, value: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        message: message.to_string(),
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            message: "not a valid number".to_string(),
        }),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_or(lookup, key, default_ms)?))
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(parse_or(lookup, key, default_secs)?))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
