//! Database-backed job queue.
//!
//! [`JobQueue`] is the domain-facing API over a [`JobStore`]: it validates
//! submissions, fills in defaults, and stamps times from its [`Clock`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::database::models::{
    DEFAULT_PRIORITY, Job, JobCommand, JobCounts, JobLogEntry, JobMetricEntry, JobState,
};
use crate::database::repositories::JobStore;
use crate::{Error, Result};

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retry budget for submitted jobs.
    pub default_max_retries: i64,
    /// Priority for submissions that do not set one.
    pub default_priority: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

/// A job submission.
///
/// Only `command` is required; everything else falls back to queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    #[serde(default)]
    pub id: Option<String>,
    /// A shell command line, or an argument vector run without a shell.
    #[serde(default)]
    pub command: Option<JobCommand>,
    /// Not eligible for claim before this time.
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
}

impl JobSpec {
    pub fn new(command: impl Into<JobCommand>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: i64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }
}

/// Job queue over a durable job store.
pub struct JobQueue {
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl JobQueue {
    /// Create a job queue using the system clock and UUID job ids.
    pub fn new(config: QueueConfig, store: Arc<dyn JobStore>) -> Self {
        Self {
            config,
            store,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Validate `spec` and persist it as a pending job with the configured retry budget.
    pub async fn submit(&self, spec: JobSpec) -> Result<Job> {
        self.enqueue(spec, self.config.default_max_retries).await
    }

    /// Validate `spec` and persist it as a pending job allowed `max_retries` failures.
    pub async fn enqueue(&self, spec: JobSpec, max_retries: i64) -> Result<Job> {
        let job = self.build_job(spec, max_retries)?;
        self.store.upsert_job(&job).await?;
        info!(job_id = %job.id, priority = job.priority, "Enqueued job");
        Ok(job)
    }

    fn build_job(&self, spec: JobSpec, max_retries: i64) -> Result<Job> {
        let command = spec
            .command
            .filter(|c| !c.is_blank())
            .ok_or_else(|| Error::validation("job command is required"))?;
        if max_retries < 1 {
            return Err(Error::validation(format!(
                "max_retries must be positive, got {max_retries}"
            )));
        }
        if let Some(timeout) = spec.timeout_seconds
            && timeout < 1
        {
            return Err(Error::validation(format!(
                "timeout_seconds must be positive, got {timeout}"
            )));
        }

        let id = spec
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.ids.next_id());

        let mut job = Job::new(id, command, max_retries, self.clock.now_ms())
            .with_priority(spec.priority.unwrap_or(self.config.default_priority));
        job.run_at = spec.run_at.map(|at| at.timestamp_millis());
        job.timeout_seconds = spec.timeout_seconds;
        Ok(job)
    }

    /// Claim the next eligible job for execution.
    pub async fn claim(&self) -> Result<Option<Job>> {
        self.store.claim_next_job(self.clock.now_ms()).await
    }

    pub async fn update(&self, job: &Job) -> Result<()> {
        self.store.update_job(job).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        self.store.list_jobs(state).await
    }

    pub async fn status(&self) -> Result<JobCounts> {
        self.store.count_by_state().await
    }

    /// Per-attempt output and runtimes recorded for a job.
    pub async fn logs_and_metrics(
        &self,
        job_id: &str,
    ) -> Result<(Vec<JobLogEntry>, Vec<JobMetricEntry>)> {
        let logs = self.store.get_logs(job_id).await?;
        let metrics = self.store.get_metrics(job_id).await?;
        Ok((logs, metrics))
    }

    /// Return jobs that have been `processing` for longer than `older_than`
    /// to `pending`. Meant for recovering after a crashed worker.
    pub async fn recover_stale(&self, older_than: Duration) -> Result<u64> {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(older_than.as_millis().min(i64::MAX as u128) as i64);
        let recovered = self.store.recover_stale_jobs(cutoff, now).await?;
        if recovered > 0 {
            info!(recovered, "Recovered stale processing jobs");
        }
        Ok(recovered)
    }
}
