//! Typed configuration.
//!
//! [`Config`] holds the target API settings and is loaded once from the
//! environment, failing fast if a required variable is missing. The auth token
//! stays wrapped in `SecretString` so it never reaches a log line.
//! [`RunConfig`] holds the engine's load-shape parameters.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::{Error, Result};
use crate::queue::Delivery;

#[derive(Debug)]
pub struct Config {
    pub base_url: String,
    pub auth_token: Option<SecretString>,
    pub request_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let request_timeout = match std::env::var("SEQLOAD_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                Error::Config(format!("SEQLOAD_TIMEOUT_SECS must be whole seconds, got {raw:?}"))
            })?),
            Err(_) => Duration::from_secs(30),
        };

        Ok(Self {
            base_url: required_var("SEQLOAD_BASE_URL")?,
            auth_token: std::env::var("SEQLOAD_AUTH_TOKEN")
                .ok()
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            request_timeout,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Load shape and termination settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Steady-state number of workers.
    pub ceiling_workers: usize,
    /// Workers added per second during ramp-up. 0 spawns the ceiling at once.
    pub ramp_rate_per_second: usize,
    /// Controller tick period.
    pub tick_interval: Duration,
    /// Wall-clock limit for the run.
    pub time_budget: Duration,
    /// Stop claiming after this many items.
    pub max_records: Option<usize>,
    /// Duplicate redraws allowed per claim before the worker backs off.
    pub max_redraws: u32,
    /// Think time between items, drawn uniformly from `wait_min..=wait_max`.
    pub wait_min: Duration,
    pub wait_max: Duration,
    pub delivery: Delivery,
    /// Log a progress line every this many finished items. 0 disables.
    pub progress_every: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ceiling_workers: 10,
            ramp_rate_per_second: 2,
            tick_interval: Duration::from_secs(1),
            time_budget: Duration::from_secs(3600),
            max_records: None,
            max_redraws: 16,
            wait_min: Duration::ZERO,
            wait_max: Duration::ZERO,
            delivery: Delivery::Drain,
            progress_every: 0,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ceiling_workers == 0 {
            return Err(Error::Config("ceiling_workers must be at least 1".to_string()));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::Config("tick_interval must be positive".to_string()));
        }
        if self.wait_min > self.wait_max {
            return Err(Error::Config(format!(
                "wait_min ({:?}) exceeds wait_max ({:?})",
                self.wait_min, self.wait_max
            )));
        }
        if self.max_redraws == 0 {
            return Err(Error::Config("max_redraws must be at least 1".to_string()));
        }
        Ok(())
    }
}
