//! Lifecycle controller: builds the object graph, owns the root
//! cancellation context, and sequences startup/shutdown.
//!
//! Mirrors the teacher's worker-process shape (init tracing, read
//! `DATABASE_URL`, connect, serve until a signal) but adds the
//! retry-with-backoff startup step and the explicit shutdown sequence the
//! core contract requires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::EngineConfig;
use crate::connectors::ConnectorRegistry;
use crate::executor::Executor;
use crate::pool::WorkerPool;
use crate::scheduler::Scheduler;
use crate::storage::Storage;

#[cfg(feature = "postgres")]
use crate::storage::PostgresStorage;

const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(2);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Initialize the `tracing` subscriber once, honoring `RUST_LOG`. This *is*
/// the structured-log sink every component writes through.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "flowcore=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// The wired-up runtime: worker pool and scheduler, both already running.
/// Dropping this does not stop anything; call [`Engine::shutdown`]
/// explicitly.
pub struct Engine {
    pub storage: Arc<dyn Storage>,
    pub executor: Executor,
    pub pool: WorkerPool,
    root_cancel: CancellationToken,
    scheduler_handle: tokio::task::JoinHandle<()>,
}

impl Engine {
    /// Run the full startup sequence: open storage with retry, build the
    /// connector registry and worker pool, start the pool and scheduler.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        let storage = open_storage_with_retry(&config).await?;
        let connectors = ConnectorRegistry::with_builtins();
        let pool = WorkerPool::new(config.worker_pool_config());
        pool.start().await;

        let executor = Executor::new(storage.clone(), connectors)
            .with_default_timeout(Duration::from_secs(config.execution_timeout_seconds));
        let root_cancel = CancellationToken::new();

        let scheduler = Scheduler::new(
            storage.clone(),
            executor.clone(),
            pool.clone(),
            config.scheduler_config(),
        );
        let scheduler_cancel = root_cancel.clone();
        let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_cancel).await });

        info!("engine started");
        Ok(Self {
            storage,
            executor,
            pool,
            root_cancel,
            scheduler_handle,
        })
    }

    /// Cancel the root context, stop the scheduler, then drain and stop the
    /// worker pool with its configured `shutdown_drain` deadline.
    pub async fn shutdown(self) {
        info!("engine shutdown beginning");
        self.root_cancel.cancel();

        if let Err(e) = self.scheduler_handle.await {
            warn!(error = %e, "scheduler task did not join cleanly");
        }

        self.pool.shutdown().await;
        info!("engine shutdown complete");
    }

    /// Block until a termination signal arrives (SIGINT/SIGTERM via
    /// `ctrl_c`, matching the teacher's signal-handling pattern), then run
    /// the shutdown sequence.
    pub async fn run_until_signal(self) -> Result<()> {
        tokio::signal::ctrl_c()
            .await
            .context("failed to install signal handler")?;
        info!("shutdown signal received");
        self.shutdown().await;
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.root_cancel.clone()
    }
}

/// Open storage, retrying with exponential backoff plus jitter on failure.
/// Pings once after an apparently successful open; only returns once the
/// ping succeeds too.
async fn open_storage_with_retry(config: &EngineConfig) -> Result<Arc<dyn Storage>> {
    let max_attempts = config.storage_max_retries.max(1);
    let mut delay = RETRY_INITIAL_DELAY;

    for attempt in 1..=max_attempts {
        match try_open_storage(config).await {
            Ok(storage) => {
                info!(attempt, "storage opened and pinged successfully");
                return Ok(storage);
            }
            Err(e) if attempt == max_attempts => {
                error!(attempt, error = %e, "exhausted storage retry budget");
                return Err(e);
            }
            Err(e) => {
                let jitter = rand::thread_rng().gen_range(0.0..0.3);
                let sleep_for = delay.mul_f64(1.0 + jitter);
                warn!(attempt, error = %e, delay_ms = sleep_for.as_millis() as u64, "storage open failed, retrying");
                tokio::time::sleep(sleep_for).await;
                delay = (delay * 2).min(RETRY_MAX_DELAY);
            }
        }
    }
    unreachable!("loop always returns by the last attempt")
}

#[cfg(feature = "postgres")]
async fn try_open_storage(config: &EngineConfig) -> Result<Arc<dyn Storage>> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required when the postgres feature is enabled")?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to open postgres pool")?;
    let storage = crate::storage::PostgresStorage::new(pool);
    storage.ping().await.context("storage ping failed")?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "postgres"))]
async fn try_open_storage(_config: &EngineConfig) -> Result<Arc<dyn Storage>> {
    Ok(Arc::new(crate::storage::InMemoryStorage::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engine_starts_and_shuts_down_cleanly() {
        let config = EngineConfig {
            worker_count: 1,
            queue_capacity: 4,
            scheduler_tick_seconds: 3600,
            ..EngineConfig::default()
        };
        let engine = Engine::start(config).await.unwrap();
        let cancel = engine.cancellation_token();
        assert!(!cancel.is_cancelled());
        engine.shutdown().await;
    }
}
