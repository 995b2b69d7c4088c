//! Job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::time::Duration;

use super::JobCommand;

/// Priority given to jobs that do not ask for one, and to requeued dead letters.
pub const DEFAULT_PRIORITY: i64 = 10;

/// Job database model.
/// Represents a single command together with its scheduling metadata.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[sqlx(json)]
    pub command: JobCommand,
    #[sqlx(try_from = "String")]
    pub state: JobState,
    /// Execution attempts that failed so far.
    pub attempts: i64,
    /// Once `attempts` reaches this value the job is demoted to the dead-letter table.
    pub max_retries: i64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds; advances on every state transition.
    pub updated_at: i64,
    pub last_error: Option<String>,
    /// Unix epoch milliseconds before which the job is not eligible for claim.
    pub run_at: Option<i64>,
    /// Lower value is dispatched first.
    pub priority: i64,
    pub timeout_seconds: Option<i64>,
}

impl Job {
    /// A fresh pending job created at `now_ms`.
    pub fn new(
        id: impl Into<String>,
        command: impl Into<JobCommand>,
        max_retries: i64,
        now_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now_ms,
            updated_at: now_ms,
            last_error: None,
            run_at: None,
            priority: DEFAULT_PRIORITY,
            timeout_seconds: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_run_at(mut self, run_at_ms: i64) -> Self {
        self.run_at = Some(run_at_ms);
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: i64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Whether the job may be claimed at `now_ms`.
    pub fn is_eligible(&self, now_ms: i64) -> bool {
        self.state == JobState::Pending && self.run_at.is_none_or(|at| at <= now_ms)
    }

    /// Execution deadline, falling back to `default` when the job sets none.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        match self.timeout_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => default,
        }
    }

    /// Whether the failure budget is used up.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }

    /// Move `updated_at` forward, strictly, even if the clock has not ticked.
    fn touch(&mut self, now_ms: i64) {
        self.updated_at = now_ms.max(self.updated_at.saturating_add(1));
    }

    /// Transition to `completed`, clearing the last error.
    pub fn mark_completed(&mut self, now_ms: i64) {
        self.state = JobState::Completed;
        self.last_error = None;
        self.touch(now_ms);
    }

    /// Count a failed execution attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
    }

    /// Transition back to `pending`, eligible from `run_at_ms` (or immediately).
    pub fn reschedule(&mut self, now_ms: i64, run_at_ms: Option<i64>) {
        self.state = JobState::Pending;
        self.run_at = run_at_ms;
        self.touch(now_ms);
    }
}

/// Job state values.
///
/// Only `pending`, `processing` and `completed` are ever stored in the `jobs`
/// table. `failed` is a reporting label for pending jobs waiting to be
/// retried (they carry a `last_error`), and `dead` jobs live in the
/// dead-letter table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Queued and waiting to be claimed by a worker.
    Pending,
    /// Claimed by exactly one worker and being executed.
    Processing,
    /// Finished successfully.
    Completed,
    /// Failed at least once and waiting for a retry.
    Failed,
    /// Exhausted its retries; see the dead-letter table.
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Whether a row in `jobs` can hold this state.
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Completed)
    }
}

impl TryFrom<String> for JobState {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Job counts by state, as reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    /// Subset of `pending` that has failed at least once.
    pub failed: u64,
    /// Rows in the dead-letter table.
    pub dead: u64,
}

impl JobCounts {
    /// Jobs still in the active table.
    pub fn active(&self) -> u64 {
        self.pending + self.processing + self.completed
    }
}
