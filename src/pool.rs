//! Fixed-size worker pool with a bounded submission queue and backpressure.
//!
//! Workers pull jobs from a single shared queue; the queue is the only
//! coordination point between submitters (the scheduler, one or more API
//! handlers) and workers. A worker that panics inside a job is recovered and
//! returns to the queue rather than terminating.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{FlowError, Result};

/// A unit of work submitted to the pool: an already-constructed future that
/// performs one trigger end to end (parameter resolution through
/// `AppendLog`). The pool does not know anything about workflows.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// How the pool behaves when its bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPolicy {
    /// Return `ErrQueueFull` immediately; caller logs a warning. Default.
    DropAndLog,
    /// Block the submitter up to a timeout before giving up.
    BlockWithTimeout(Duration),
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self::DropAndLog
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub submit_policy: SubmitPolicy,
    pub shutdown_drain: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: 100,
            submit_policy: SubmitPolicy::DropAndLog,
            shutdown_drain: Duration::from_secs(30),
        }
    }
}

struct Inner {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    rx: Mutex<Option<mpsc::Receiver<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    active_tasks: Arc<Semaphore>,
    config: WorkerPoolConfig,
    queue_len: AtomicUsize,
    stopped: std::sync::atomic::AtomicBool,
}

/// Bounded-concurrency worker pool. Cheap to clone; all clones share the
/// same queue and worker set.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let active_tasks = Arc::new(Semaphore::new(config.worker_count.max(1)));
        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                workers: Mutex::new(Vec::new()),
                active_tasks,
                config,
                queue_len: AtomicUsize::new(0),
                stopped: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Spin up `worker_count` long-lived worker tasks.
    pub async fn start(&self) {
        let rx = self
            .inner
            .rx
            .lock()
            .await
            .take()
            .expect("start called more than once");
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = self.inner.workers.lock().await;
        for worker_index in 0..self.inner.config.worker_count.max(1) {
            let rx = Arc::clone(&rx);
            let active_tasks = Arc::clone(&self.inner.active_tasks);
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(job) = job else {
                        debug!(worker_index, "worker exiting: queue closed");
                        break;
                    };
                    inner.queue_len.fetch_sub(1, Ordering::SeqCst);

                    let permit = active_tasks
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed while workers run");

                    // Recover panics so one bad job cannot take down the worker.
                    let outcome = std::panic::AssertUnwindSafe(job).catch_unwind().await;
                    if let Err(panic) = outcome {
                        error!(worker_index, ?panic, "job panicked; worker continues");
                    }
                    drop(permit);
                }
            }));
        }
    }

    /// Enqueue a job per the configured `submit_policy`.
    pub async fn submit(&self, job: Job) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(FlowError::PoolStopped);
        }

        let tx = {
            let guard = self.inner.tx.lock().await;
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return Err(FlowError::PoolStopped),
            }
        };

        match self.inner.config.submit_policy {
            SubmitPolicy::DropAndLog => match tx.try_send(job) {
                Ok(()) => {
                    self.inner.queue_len.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        queue_length = self.inner.queue_len.load(Ordering::SeqCst),
                        "queue full, dropping submission"
                    );
                    Err(FlowError::QueueFull)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(FlowError::PoolStopped),
            },
            SubmitPolicy::BlockWithTimeout(timeout) => {
                match tokio::time::timeout(timeout, tx.send(job)).await {
                    Ok(Ok(())) => {
                        self.inner.queue_len.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    Ok(Err(_)) => Err(FlowError::PoolStopped),
                    Err(_) => {
                        warn!("submit timed out waiting for queue capacity");
                        Err(FlowError::QueueFull)
                    }
                }
            }
        }
    }

    /// Current number of queued (not yet picked up) jobs.
    pub fn queue_len(&self) -> usize {
        self.inner.queue_len.load(Ordering::SeqCst)
    }

    /// Number of jobs currently executing, bounded by `worker_count`.
    pub fn active_count(&self) -> usize {
        self.inner.config.worker_count - self.inner.active_tasks.available_permits()
    }

    /// Close the queue to new submissions, wait for in-flight jobs to drain
    /// up to `shutdown_drain`, then abandon anything still running.
    pub async fn shutdown(&self) {
        info!("worker pool shutting down");
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.tx.lock().await.take(); // drop sender: closes the channel

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_drain;
        loop {
            if self.active_count() == 0 && self.queue_len() == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.active_count(),
                    "shutdown drain deadline reached; abandoning in-flight jobs"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut workers = self.inner.workers.lock().await;
        for handle in workers.drain(..) {
            handle.abort();
        }
    }
}
