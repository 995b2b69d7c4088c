//! Append-only execution audit trail models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Output captured from one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub id: i64,
    pub job_id: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Wall-clock runtime of one execution attempt.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct JobMetricEntry {
    pub id: i64,
    pub job_id: String,
    pub runtime_seconds: f64,
}

/// Average runtime over `metrics`, or `None` when there are none.
pub fn average_runtime(metrics: &[JobMetricEntry]) -> Option<f64> {
    if metrics.is_empty() {
        return None;
    }
    let total: f64 = metrics.iter().map(|m| m.runtime_seconds).sum();
    Some(total / metrics.len() as f64)
}
