//! Engine configuration, loaded from environment variables.
//!
//! Matches the teacher's convention of plain `std::env::var` reads behind a
//! typed struct rather than a generic config-file framework. `.env` is
//! loaded once via `dotenvy` if present; missing optional variables fall
//! back to the documented defaults.

use std::time::Duration;

use crate::pool::{SubmitPolicy, WorkerPoolConfig};
use crate::scheduler::SchedulerConfig;

/// All configuration the core recognizes, per the external-interfaces
/// option table.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub submit_policy: SubmitPolicy,
    pub scheduler_tick_seconds: u64,
    pub execution_timeout_seconds: u64,
    pub shutdown_drain_seconds: u64,
    pub storage_max_retries: u32,
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: 100,
            submit_policy: SubmitPolicy::DropAndLog,
            scheduler_tick_seconds: 60,
            execution_timeout_seconds: 30,
            shutdown_drain_seconds: 30,
            storage_max_retries: 10,
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment, applying `.env` first if one is
    /// present. Unset variables fall back to defaults; malformed ones fall
    /// back too, with a warning (startup should not crash over a typo in an
    /// optional tuning knob).
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(error = %e, "no .env file loaded");
        }

        let defaults = Self::default();
        Self {
            worker_count: env_usize("WORKER_COUNT", defaults.worker_count),
            queue_capacity: env_usize("QUEUE_CAPACITY", defaults.queue_capacity),
            submit_policy: env_submit_policy("SUBMIT_POLICY", defaults.submit_policy),
            scheduler_tick_seconds: env_u64("SCHEDULER_TICK_SECONDS", defaults.scheduler_tick_seconds),
            execution_timeout_seconds: env_u64(
                "EXECUTION_TIMEOUT_SECONDS",
                defaults.execution_timeout_seconds,
            ),
            shutdown_drain_seconds: env_u64("SHUTDOWN_DRAIN_SECONDS", defaults.shutdown_drain_seconds),
            storage_max_retries: env_u64("STORAGE_MAX_RETRIES", defaults.storage_max_retries as u64) as u32,
            database_url: std::env::var("DATABASE_URL").ok(),
        }
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            submit_policy: self.submit_policy,
            shutdown_drain: Duration::from_secs(self.shutdown_drain_seconds),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.scheduler_tick_seconds),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_submit_policy(name: &str, default: SubmitPolicy) -> SubmitPolicy {
    match std::env::var(name).ok().as_deref() {
        Some("drop_and_log") => SubmitPolicy::DropAndLog,
        Some("block_with_timeout") => SubmitPolicy::BlockWithTimeout(Duration::from_secs(5)),
        Some(other) => {
            tracing::warn!(value = other, "unrecognized SUBMIT_POLICY, using default");
            default
        }
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_count, 10);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.submit_policy, SubmitPolicy::DropAndLog);
        assert_eq!(config.scheduler_tick_seconds, 60);
        assert_eq!(config.execution_timeout_seconds, 30);
        assert_eq!(config.shutdown_drain_seconds, 30);
        assert_eq!(config.storage_max_retries, 10);
    }

    #[test]
    fn unrecognized_submit_policy_falls_back_to_default() {
        let resolved = env_submit_policy("FLOWCORE_TEST_UNSET_POLICY_VAR", SubmitPolicy::DropAndLog);
        assert_eq!(resolved, SubmitPolicy::DropAndLog);
    }
}
