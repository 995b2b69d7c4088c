//! Worker pool: a fixed set of independently scheduled poll loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::job_queue::JobQueue;
use super::runner::CommandRunner;
use super::worker::{Worker, WorkerConfig};
use crate::{Error, Result};

/// A pool of workers sharing one cancellation token.
///
/// Workers coordinate only through the store's atomic claim, so several
/// pools (in this process or others) may serve the same database.
pub struct WorkerPool {
    /// Number of workers to spawn.
    size: usize,
    /// Configuration handed to every worker.
    config: WorkerConfig,
    /// Workers currently running their loop.
    running_workers: Arc<AtomicUsize>,
    /// Cancellation token.
    cancellation_token: CancellationToken,
    /// Task set for workers.
    tasks: parking_lot::Mutex<Option<JoinSet<Result<()>>>>,
}

impl WorkerPool {
    /// Create a pool of `size` workers.
    pub fn new(size: usize, config: WorkerConfig) -> Self {
        Self {
            size: size.max(1),
            config,
            running_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers.
    pub fn start(&self, queue: Arc<JobQueue>, runner: Arc<dyn CommandRunner>) {
        info!("Starting worker pool with {} workers", self.size);

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            return;
        };

        for i in 0..self.size {
            let worker = Worker::new(
                i + 1,
                queue.clone(),
                runner.clone(),
                self.config.clone(),
                self.cancellation_token.clone(),
            );
            let running = self.running_workers.clone();

            join_set.spawn(async move {
                running.fetch_add(1, Ordering::SeqCst);
                let result = worker.run().await;
                if let Err(e) = &result {
                    error!(worker = worker.id(), "Worker stopped on store error: {}", e);
                }
                running.fetch_sub(1, Ordering::SeqCst);
                result
            });
        }
    }

    /// Signal every worker to stop after its current job and wait for them.
    ///
    /// Returns the first error any worker stopped with.
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping worker pool");
        self.cancellation_token.cancel();
        let result = self.join().await;
        info!("Worker pool stopped");
        result
    }

    /// Wait until every worker has exited on its own (after a store error
    /// or an external cancellation).
    ///
    /// Returns the first error any worker stopped with.
    pub async fn join(&self) -> Result<()> {
        // Take the join set out of the mutex before awaiting
        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };
        let Some(mut join_set) = join_set else {
            return Ok(());
        };

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(Error::Other(format!("worker task failed: {e}"))));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Token observed by every worker; cancelling it stops the pool.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Number of workers currently inside their poll loop.
    pub fn running_count(&self) -> usize {
        self.running_workers.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}
