//! Periodic polling loop that finds due scheduled workflows and submits
//! them to the worker pool.
//!
//! One round = one `ListActiveScheduled` call plus a `SetLastTriggered` per
//! due workflow before submission, so a crash between marking-due and
//! running never double-fires a workflow on the next poll. A panic
//! anywhere in a round is recovered; the scheduler ticks again on the next
//! interval rather than dying.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;
use crate::model::{TriggerPayload, TriggerSource};
use crate::pool::{Job, WorkerPool};
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Drives the scheduled-trigger polling loop. Holds no state of its own
/// beyond configuration; every round reads `Storage` fresh.
pub struct Scheduler {
    storage: Arc<dyn Storage>,
    executor: Executor,
    pool: WorkerPool,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        executor: Executor,
        pool: WorkerPool,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            storage,
            executor,
            pool,
            config,
        }
    }

    /// Run the polling loop until `cancel` is triggered. Intended to be
    /// spawned as a long-lived task by the lifecycle controller.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "scheduler starting"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler stopping: cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = AssertUnwindSafe(self.poll_round(&cancel))
                        .catch_unwind()
                        .await;
                    if let Err(panic) = outcome {
                        error!(?panic, "scheduler round panicked; continuing on next tick");
                    }
                }
            }
        }
    }

    /// One polling round: list due workflows, mark them triggered, submit
    /// each to the pool. Never returns an error; storage failures are
    /// logged and the round is skipped.
    async fn poll_round(&self, cancel: &CancellationToken) {
        let candidates = match self.storage.list_active_scheduled(cancel).await {
            Ok(workflows) => workflows,
            Err(e) => {
                warn!(error = %e, "failed to list scheduled workflows; skipping round");
                return;
            }
        };

        let now = Utc::now();
        let due: Vec<_> = candidates.into_iter().filter(|w| w.is_due(now)).collect();
        if due.is_empty() {
            debug!("no due workflows this round");
            return;
        }
        debug!(count = due.len(), "dispatching due workflows");

        for workflow in due {
            if cancel.is_cancelled() {
                break;
            }

            // Re-fetch by id: a workflow may have been deactivated between
            // enumeration above and this point in the round. The fresh
            // copy is the one actually submitted.
            let fresh = match self.storage.get_workflow(cancel, workflow.id).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(workflow_id = %workflow.id, error = %e, "failed to re-fetch workflow; skipping");
                    continue;
                }
            };
            if !fresh.is_active {
                debug!(workflow_id = %fresh.id, "workflow deactivated since enumeration; skipping");
                continue;
            }

            if let Err(e) = self
                .storage
                .set_last_triggered(cancel, fresh.id, now)
                .await
            {
                warn!(workflow_id = %fresh.id, error = %e, "failed to mark workflow triggered; skipping");
                continue;
            }

            let executor = self.executor.clone();
            let job_cancel = cancel.clone();
            let workflow_id = fresh.id;
            let job: Job = Box::pin(async move {
                let payload = TriggerPayload {
                    parameters: Default::default(),
                    input: serde_json::json!({ "scheduled_at": now.to_rfc3339() }),
                };
                let _ = executor
                    .trigger(job_cancel, fresh, payload, TriggerSource::Scheduled)
                    .await;
            });

            if let Err(e) = self.pool.submit(job).await {
                warn!(workflow_id = %workflow_id, error = %e, "failed to submit scheduled trigger");
            }
        }
    }
}
