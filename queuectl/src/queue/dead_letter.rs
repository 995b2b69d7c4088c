//! Dead-letter queue operations.

use std::sync::Arc;
use tracing::info;

use super::JobQueue;
use crate::Result;
use crate::database::models::{DeadLetterEntry, Job};

/// List and requeue jobs that exhausted their retries.
pub struct DeadLetterStore {
    queue: Arc<JobQueue>,
}

impl DeadLetterStore {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    pub async fn list(&self) -> Result<Vec<DeadLetterEntry>> {
        self.queue.store().list_dead_letters().await
    }

    /// Move a dead letter back to the active queue as a pending job.
    ///
    /// The job keeps its attempt count and last error, gets the default
    /// priority and no `run_at`, and takes the largest `max_retries` among
    /// the active jobs (the queue's default retry budget if there are none).
    /// Returns `None` if no dead letter has this id.
    pub async fn requeue(&self, id: &str) -> Result<Option<Job>> {
        let requeued = self
            .queue
            .store()
            .requeue_dead_letter(
                id,
                self.queue.config().default_max_retries,
                self.queue.now_ms(),
            )
            .await?;
        if let Some(job) = &requeued {
            info!(
                job_id = %job.id,
                attempts = job.attempts,
                max_retries = job.max_retries,
                "Requeued dead letter"
            );
        }
        Ok(requeued)
    }
}
