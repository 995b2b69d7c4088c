//! Transactional operations for jobs and dead letters.
//!
//! These methods operate within an existing transaction and do NOT commit.
//! The caller is responsible for committing or rolling back the transaction.

use sqlx::SqliteConnection;
use sqlx::types::Json;

use crate::Result;
use crate::database::models::{DEFAULT_PRIORITY, DeadLetterEntry, Job, JobState};

/// Transactional operations for the `jobs` and `dead_letters` tables.
pub struct JobTxOps;

impl JobTxOps {
    /// Whether `id` is currently held in the dead-letter table.
    pub async fn is_dead_lettered(tx: &mut SqliteConnection, id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM dead_letters WHERE id = ?")
            .bind(id)
            .fetch_optional(tx)
            .await?;
        Ok(found.is_some())
    }

    /// Insert `job`, or overwrite every column of the row with the same id.
    pub async fn upsert(tx: &mut SqliteConnection, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, command, state, attempts, max_retries, created_at, updated_at,
                last_error, run_at, priority, timeout_seconds
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                command = excluded.command,
                state = excluded.state,
                attempts = excluded.attempts,
                max_retries = excluded.max_retries,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                last_error = excluded.last_error,
                run_at = excluded.run_at,
                priority = excluded.priority,
                timeout_seconds = excluded.timeout_seconds
            "#,
        )
        .bind(&job.id)
        .bind(Json(&job.command))
        .bind(job.state.as_str())
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(&job.last_error)
        .bind(job.run_at)
        .bind(job.priority)
        .bind(job.timeout_seconds)
        .execute(tx)
        .await?;
        Ok(())
    }

    /// The next eligible job in dispatch order, without claiming it.
    pub async fn select_next_eligible(
        tx: &mut SqliteConnection,
        now_ms: i64,
    ) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE state = 'pending' AND (run_at IS NULL OR run_at <= ?)
            ORDER BY priority ASC, created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(now_ms)
        .fetch_optional(tx)
        .await?;
        Ok(job)
    }

    /// Flip a pending job to processing. Returns the claimed row, or `None`
    /// if the job was no longer pending.
    pub async fn mark_processing(
        tx: &mut SqliteConnection,
        id: &str,
        now_ms: i64,
    ) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'processing', updated_at = MAX(?, updated_at + 1)
            WHERE id = ? AND state = 'pending'
            RETURNING *
            "#,
        )
        .bind(now_ms)
        .bind(id)
        .fetch_optional(tx)
        .await?;
        Ok(job)
    }

    /// Remove a job from the active table. Returns whether a row was deleted.
    pub async fn delete(tx: &mut SqliteConnection, id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(tx)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Record `job` in the dead-letter table with the given failure reason.
    pub async fn insert_dead_letter(
        tx: &mut SqliteConnection,
        job: &Job,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO dead_letters (id, command, attempts, created_at, last_error)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(Json(&job.command))
        .bind(job.attempts)
        .bind(job.created_at)
        .bind(last_error)
        .execute(tx)
        .await?;
        Ok(())
    }

    /// Remove and return a dead-letter entry.
    pub async fn take_dead_letter(
        tx: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<DeadLetterEntry>> {
        let entry = sqlx::query_as::<_, DeadLetterEntry>(
            "DELETE FROM dead_letters WHERE id = ? RETURNING *",
        )
        .bind(id)
        .fetch_optional(tx)
        .await?;
        Ok(entry)
    }

    /// Re-insert a dead letter as a fresh pending job.
    ///
    /// `attempts` and `last_error` carry over. `max_retries` is the largest
    /// value among the active jobs, or `fallback_max_retries` when there are
    /// none.
    pub async fn insert_requeued(
        tx: &mut SqliteConnection,
        entry: &DeadLetterEntry,
        fallback_max_retries: i64,
        now_ms: i64,
    ) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (
                id, command, state, attempts, max_retries, created_at, updated_at,
                last_error, run_at, priority, timeout_seconds
            )
            VALUES (
                ?, ?, ?, ?, (SELECT COALESCE(MAX(max_retries), ?) FROM jobs), ?, ?,
                ?, NULL, ?, NULL
            )
            RETURNING *
            "#,
        )
        .bind(&entry.id)
        .bind(Json(&entry.command))
        .bind(JobState::Pending.as_str())
        .bind(entry.attempts)
        .bind(fallback_max_retries)
        .bind(now_ms)
        .bind(now_ms)
        .bind(&entry.last_error)
        .bind(DEFAULT_PRIORITY)
        .fetch_one(tx)
        .await?;
        Ok(job)
    }
}
