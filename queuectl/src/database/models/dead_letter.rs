//! Dead-letter database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::JobCommand;

/// Terminal failure record for a job that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: String,
    #[sqlx(json)]
    pub command: JobCommand,
    pub attempts: i64,
    /// Creation time of the original job, Unix epoch milliseconds.
    pub created_at: i64,
    pub last_error: Option<String>,
}
