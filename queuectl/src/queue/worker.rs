//! The worker poll loop and per-job state machine.
//!
//! A worker repeatedly claims one job, runs it through the
//! [`CommandRunner`], records the attempt, and then completes, reschedules
//! or demotes the job. Command failures never escape the loop; store
//! failures do.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::job_queue::JobQueue;
use super::runner::CommandRunner;
use crate::Result;
use crate::database::models::Job;
use crate::database::time::add_secs;

/// How a failed job waits out its backoff delay.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    /// The worker sleeps through the delay, then returns the job to `pending`.
    #[default]
    Blocking,
    /// The job returns to `pending` at once with `run_at` pushed past the delay,
    /// freeing the worker immediately.
    Deferred,
}

/// Configuration for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Execution deadline for jobs that do not set `timeout_seconds`.
    pub default_timeout_secs: u64,
    /// Idle sleep between polls when no job is eligible, in milliseconds.
    pub poll_interval_ms: u64,
    pub backoff: BackoffPolicy,
    pub backoff_mode: BackoffMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            poll_interval_ms: 200,
            backoff: BackoffPolicy::default(),
            backoff_mode: BackoffMode::default(),
        }
    }
}

/// The result of one claim-execute-finalize cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed { job_id: String },
    /// Returned to `pending` after waiting (or scheduling) `delay_secs`.
    Rescheduled {
        job_id: String,
        attempts: i64,
        delay_secs: u64,
        error: String,
    },
    /// Moved to the dead-letter table.
    Demoted {
        job_id: String,
        attempts: i64,
        error: String,
    },
}

/// A single poll loop.
pub struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    runner: Arc<dyn CommandRunner>,
    config: WorkerConfig,
    cancellation_token: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        runner: Arc<dyn CommandRunner>,
        config: WorkerConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            queue,
            runner,
            config,
            cancellation_token,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Poll until cancelled.
    ///
    /// Cancellation is observed between jobs and while idle; a running
    /// command is never interrupted. Returns early with the error if the
    /// store fails.
    pub async fn run(&self) -> Result<()> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        debug!(worker = self.id, "Worker started");

        while !self.cancellation_token.is_cancelled() {
            if self.run_once().await?.is_some() {
                continue;
            }
            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        debug!(worker = self.id, "Worker stopped");
        Ok(())
    }

    /// Claim and process at most one job. `None` means nothing was eligible.
    pub async fn run_once(&self) -> Result<Option<AttemptOutcome>> {
        let Some(job) = self.queue.claim().await? else {
            return Ok(None);
        };
        self.execute(job).await.map(Some)
    }

    async fn execute(&self, mut job: Job) -> Result<AttemptOutcome> {
        let timeout = job.effective_timeout(Duration::from_secs(self.config.default_timeout_secs));
        info!(worker = self.id, job_id = %job.id, attempts = job.attempts, "Executing job");

        let started = Instant::now();
        let outcome = self.runner.run(&job.command, timeout).await;
        let runtime_secs = started.elapsed().as_secs_f64();

        let store = self.queue.store();
        store
            .append_log(&job.id, outcome.stdout(), outcome.stderr(), self.queue.now_ms())
            .await?;
        store.append_metric(&job.id, runtime_secs).await?;

        let Some(error) = outcome.error_message() else {
            job.mark_completed(self.queue.now_ms());
            self.queue.update(&job).await?;
            info!(
                worker = self.id,
                job_id = %job.id,
                "Job completed in {:.2}s",
                runtime_secs
            );
            return Ok(AttemptOutcome::Completed { job_id: job.id });
        };

        job.record_failure(error.clone());

        if job.is_exhausted() {
            store.demote_job(&job, &error).await?;
            error!(
                worker = self.id,
                job_id = %job.id,
                attempts = job.attempts,
                error = %error,
                "Job exhausted its retries and moved to the dead-letter queue"
            );
            return Ok(AttemptOutcome::Demoted {
                job_id: job.id,
                attempts: job.attempts,
                error,
            });
        }

        let attempts = u32::try_from(job.attempts).unwrap_or(u32::MAX);
        let delay_secs = self.config.backoff.delay_for(attempts);
        warn!(
            worker = self.id,
            job_id = %job.id,
            attempts = job.attempts,
            error = %error,
            "Job failed, retrying in {}s",
            delay_secs
        );

        match self.config.backoff_mode {
            BackoffMode::Blocking => self.wait_out_backoff(&mut job, delay_secs).await,
            BackoffMode::Deferred => {
                let now = self.queue.now_ms();
                job.reschedule(now, Some(add_secs(now, delay_secs)));
            }
        }
        self.queue.update(&job).await?;

        Ok(AttemptOutcome::Rescheduled {
            job_id: job.id,
            attempts: job.attempts,
            delay_secs,
            error,
        })
    }

    /// Sleep through the backoff while holding the job, then release it.
    ///
    /// If the worker is cancelled mid-sleep the job is released right away
    /// with `run_at` set to the end of the delay, so the backoff still holds.
    async fn wait_out_backoff(&self, job: &mut Job, delay_secs: u64) {
        let wake_at = add_secs(self.queue.now_ms(), delay_secs);
        tokio::select! {
            _ = self.cancellation_token.cancelled() => {
                debug!(worker = self.id, job_id = %job.id, "Backoff interrupted by shutdown");
                job.reschedule(self.queue.now_ms(), Some(wake_at));
            }
            _ = tokio::time::sleep(Duration::from_secs(delay_secs)) => {
                job.reschedule(self.queue.now_ms(), job.run_at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.default_timeout_secs, 30);
        assert_eq!(config.poll_interval_ms, 200);
        assert_eq!(config.backoff_mode, BackoffMode::Blocking);
        assert_eq!(config.backoff.base, 2);
        assert_eq!(config.backoff.max, 600);
    }

    #[test]
    fn test_backoff_mode_parse() {
        assert_eq!("deferred".parse::<BackoffMode>().unwrap(), BackoffMode::Deferred);
        assert_eq!("Blocking".parse::<BackoffMode>().unwrap(), BackoffMode::Blocking);
        assert!("later".parse::<BackoffMode>().is_err());
        assert_eq!(BackoffMode::Deferred.to_string(), "deferred");
    }
}
