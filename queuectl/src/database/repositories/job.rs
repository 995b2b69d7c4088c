//! Job store: the durable repository for jobs, dead letters and the
//! per-attempt audit trail.

use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, warn};

use crate::database::models::{
    DeadLetterEntry, Job, JobCounts, JobLogEntry, JobMetricEntry, JobState,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, WritePool, begin_immediate};
use crate::{Error, Result};

use super::job_tx::JobTxOps;

/// Job store trait.
///
/// Every mutating operation is atomic with respect to concurrent callers,
/// including callers in other processes sharing the same database file.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or fully overwrite a job by id.
    ///
    /// Fails with [`Error::Conflict`] if the id is held in the dead-letter table.
    async fn upsert_job(&self, job: &Job) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<Option<Job>>;
    /// Atomically claim the next eligible job (pending, `run_at` unset or due)
    /// in `priority ASC, created_at ASC` order, moving it to `processing`.
    async fn claim_next_job(&self, now_ms: i64) -> Result<Option<Job>>;
    /// Persist the mutable fields of an existing job.
    async fn update_job(&self, job: &Job) -> Result<()>;
    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>>;
    async fn count_by_state(&self) -> Result<JobCounts>;
    /// Return jobs stuck in `processing` since before `cutoff_ms` to `pending`.
    async fn recover_stale_jobs(&self, cutoff_ms: i64, now_ms: i64) -> Result<u64>;

    // Dead letters
    /// Atomically move a job from the active table to the dead-letter table.
    async fn demote_job(&self, job: &Job, last_error: &str) -> Result<()>;
    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>>;
    /// Atomically move a dead letter back to the active table as a pending job.
    async fn requeue_dead_letter(
        &self,
        id: &str,
        fallback_max_retries: i64,
        now_ms: i64,
    ) -> Result<Option<Job>>;

    // Execution logs and metrics
    async fn append_log(&self, job_id: &str, stdout: &str, stderr: &str, now_ms: i64)
    -> Result<()>;
    async fn append_metric(&self, job_id: &str, runtime_seconds: f64) -> Result<()>;
    async fn get_logs(&self, job_id: &str) -> Result<Vec<JobLogEntry>>;
    async fn get_metrics(&self, job_id: &str) -> Result<Vec<JobMetricEntry>>;
}

/// SQLx implementation of [`JobStore`].
///
/// Reads go through the shared read pool, writes through the serialized
/// write pool inside `BEGIN IMMEDIATE` transactions.
pub struct SqlxJobStore {
    pool: DbPool,
    write_pool: WritePool,
}

impl SqlxJobStore {
    pub fn new(pool: DbPool, write_pool: WritePool) -> Self {
        Self { pool, write_pool }
    }

    async fn upsert_once(&self, job: &Job) -> Result<()> {
        let mut tx = begin_immediate(&self.write_pool).await?;
        if JobTxOps::is_dead_lettered(&mut tx, &job.id).await? {
            tx.rollback().await?;
            return Err(Error::conflict(format!(
                "job {} is in the dead-letter queue; requeue it instead",
                job.id
            )));
        }
        JobTxOps::upsert(&mut tx, job).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn claim_once(&self, now_ms: i64) -> Result<Option<Job>> {
        let mut tx = begin_immediate(&self.write_pool).await?;
        let Some(candidate) = JobTxOps::select_next_eligible(&mut tx, now_ms).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        // The write lock is held since BEGIN IMMEDIATE, so the guarded
        // update cannot miss; a `None` here means the row vanished.
        let claimed = JobTxOps::mark_processing(&mut tx, &candidate.id, now_ms).await?;
        tx.commit().await?;
        Ok(claimed)
    }

    async fn demote_once(&self, job: &Job, last_error: &str) -> Result<()> {
        let mut tx = begin_immediate(&self.write_pool).await?;
        if !JobTxOps::delete(&mut tx, &job.id).await? {
            warn!(job_id = %job.id, "Demoting a job that is not in the active table");
        }
        JobTxOps::insert_dead_letter(&mut tx, job, last_error).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn requeue_once(
        &self,
        id: &str,
        fallback_max_retries: i64,
        now_ms: i64,
    ) -> Result<Option<Job>> {
        let mut tx = begin_immediate(&self.write_pool).await?;
        let Some(entry) = JobTxOps::take_dead_letter(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        let job = JobTxOps::insert_requeued(&mut tx, &entry, fallback_max_retries, now_ms).await?;
        tx.commit().await?;
        Ok(Some(job))
    }
}

#[async_trait]
impl JobStore for SqlxJobStore {
    async fn upsert_job(&self, job: &Job) -> Result<()> {
        retry_on_sqlite_busy("upsert_job", || self.upsert_once(job)).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn claim_next_job(&self, now_ms: i64) -> Result<Option<Job>> {
        let claimed = retry_on_sqlite_busy("claim_next_job", || self.claim_once(now_ms)).await?;
        if let Some(job) = &claimed {
            debug!(job_id = %job.id, priority = job.priority, "Claimed job");
        }
        Ok(claimed)
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let done = retry_on_sqlite_busy("update_job", || async move {
            let done = sqlx::query(
                r#"
                UPDATE jobs SET
                    state = ?,
                    attempts = ?,
                    updated_at = ?,
                    last_error = ?,
                    run_at = ?,
                    priority = ?,
                    timeout_seconds = ?
                WHERE id = ?
                "#,
            )
            .bind(job.state.as_str())
            .bind(job.attempts)
            .bind(job.updated_at)
            .bind(&job.last_error)
            .bind(job.run_at)
            .bind(job.priority)
            .bind(job.timeout_seconds)
            .bind(&job.id)
            .execute(&self.write_pool)
            .await?;
            Ok(done)
        })
        .await?;

        if done.rows_affected() == 0 {
            return Err(Error::not_found("Job", &job.id));
        }
        Ok(())
    }

    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let jobs = match state {
            None => {
                sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at, rowid")
                    .fetch_all(&self.pool)
                    .await?
            }
            Some(JobState::Failed) => {
                sqlx::query_as::<_, Job>(
                    "SELECT * FROM jobs WHERE state = 'pending' AND last_error IS NOT NULL ORDER BY created_at, rowid",
                )
                .fetch_all(&self.pool)
                .await?
            }
            // Dead jobs are never in the active table.
            Some(JobState::Dead) => Vec::new(),
            Some(state) => {
                sqlx::query_as::<_, Job>(
                    "SELECT * FROM jobs WHERE state = ? ORDER BY created_at, rowid",
                )
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(jobs)
    }

    async fn count_by_state(&self) -> Result<JobCounts> {
        let mut counts = JobCounts::default();

        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let state: String = row.get("state");
            let n = row.get::<i64, _>("n") as u64;
            match state.parse::<JobState>() {
                Ok(JobState::Pending) => counts.pending = n,
                Ok(JobState::Processing) => counts.processing = n,
                Ok(JobState::Completed) => counts.completed = n,
                _ => warn!(state = %state, rows = n, "Unexpected job state in jobs table"),
            }
        }

        let failed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE state = 'pending' AND last_error IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        counts.failed = failed as u64;

        let dead: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;
        counts.dead = dead as u64;

        Ok(counts)
    }

    async fn recover_stale_jobs(&self, cutoff_ms: i64, now_ms: i64) -> Result<u64> {
        let done = retry_on_sqlite_busy("recover_stale_jobs", || async move {
            let done = sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'pending', updated_at = MAX(?, updated_at + 1)
                WHERE state = 'processing' AND updated_at < ?
                "#,
            )
            .bind(now_ms)
            .bind(cutoff_ms)
            .execute(&self.write_pool)
            .await?;
            Ok(done)
        })
        .await?;
        Ok(done.rows_affected())
    }

    async fn demote_job(&self, job: &Job, last_error: &str) -> Result<()> {
        retry_on_sqlite_busy("demote_job", || self.demote_once(job, last_error)).await
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        let entries = sqlx::query_as::<_, DeadLetterEntry>(
            "SELECT * FROM dead_letters ORDER BY created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn requeue_dead_letter(
        &self,
        id: &str,
        fallback_max_retries: i64,
        now_ms: i64,
    ) -> Result<Option<Job>> {
        retry_on_sqlite_busy("requeue_dead_letter", || {
            self.requeue_once(id, fallback_max_retries, now_ms)
        })
        .await
    }

    async fn append_log(
        &self,
        job_id: &str,
        stdout: &str,
        stderr: &str,
        now_ms: i64,
    ) -> Result<()> {
        retry_on_sqlite_busy("append_log", || async move {
            sqlx::query(
                "INSERT INTO job_logs (job_id, timestamp, stdout, stderr) VALUES (?, ?, ?, ?)",
            )
            .bind(job_id)
            .bind(now_ms)
            .bind(stdout)
            .bind(stderr)
            .execute(&self.write_pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn append_metric(&self, job_id: &str, runtime_seconds: f64) -> Result<()> {
        retry_on_sqlite_busy("append_metric", || async move {
            sqlx::query("INSERT INTO job_metrics (job_id, runtime_seconds) VALUES (?, ?)")
                .bind(job_id)
                .bind(runtime_seconds)
                .execute(&self.write_pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn get_logs(&self, job_id: &str) -> Result<Vec<JobLogEntry>> {
        let logs = sqlx::query_as::<_, JobLogEntry>(
            "SELECT * FROM job_logs WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn get_metrics(&self, job_id: &str) -> Result<Vec<JobMetricEntry>> {
        let metrics = sqlx::query_as::<_, JobMetricEntry>(
            "SELECT * FROM job_metrics WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{open, sqlite_url};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqlxJobStore) {
        let dir = TempDir::new().unwrap();
        let url = sqlite_url(dir.path().join("store.db"));
        let (pool, write_pool) = open(&url).await.unwrap();
        (dir, SqlxJobStore::new(pool, write_pool))
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let (_dir, store) = store().await;
        let job = Job::new("a", "echo one", 3, 1_000);
        store.upsert_job(&job).await.unwrap();

        let mut changed = job.clone();
        changed.command = "echo two".into();
        changed.priority = 1;
        store.upsert_job(&changed).await.unwrap();

        let jobs = store.list_jobs(None).await.unwrap();
        assert_eq!(jobs, vec![changed]);
    }

    #[tokio::test]
    async fn test_claim_moves_to_processing() {
        let (_dir, store) = store().await;
        store
            .upsert_job(&Job::new("a", "true", 3, 1_000))
            .await
            .unwrap();

        let claimed = store.claim_next_job(2_000).await.unwrap().unwrap();
        assert_eq!(claimed.id, "a");
        assert_eq!(claimed.state, JobState::Processing);
        assert_eq!(claimed.updated_at, 2_000);

        assert!(store.claim_next_job(3_000).await.unwrap().is_none());
        let stored = store.get_job("a").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Processing);
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_age() {
        let (_dir, store) = store().await;
        store
            .upsert_job(&Job::new("a", "true", 3, 1_000).with_priority(1))
            .await
            .unwrap();
        store
            .upsert_job(&Job::new("b", "true", 3, 2_000).with_priority(1))
            .await
            .unwrap();
        store
            .upsert_job(&Job::new("c", "true", 3, 3_000).with_priority(0))
            .await
            .unwrap();

        let mut order = Vec::new();
        while let Some(job) = store.claim_next_job(10_000).await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_update_missing_job_is_not_found() {
        let (_dir, store) = store().await;
        let job = Job::new("ghost", "true", 3, 0);
        let err = store.update_job(&job).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_demote_is_exclusive_and_upsert_rejects_dead_ids() {
        let (_dir, store) = store().await;
        let mut job = Job::new("a", "false", 1, 1_000);
        store.upsert_job(&job).await.unwrap();
        job.attempts = 1;

        store.demote_job(&job, "exit code 1").await.unwrap();

        assert!(store.get_job("a").await.unwrap().is_none());
        let dead = store.list_dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 1);
        assert_eq!(dead[0].created_at, 1_000);
        assert_eq!(dead[0].last_error.as_deref(), Some("exit code 1"));

        let err = store.upsert_job(&job).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_requeue_derives_max_retries_from_active_jobs() {
        let (_dir, store) = store().await;
        let mut job = Job::new("dead", "false", 2, 1_000);
        store.upsert_job(&job).await.unwrap();
        job.attempts = 2;
        store.demote_job(&job, "exit code 1").await.unwrap();

        // No active jobs: the fallback applies.
        let requeued = store
            .requeue_dead_letter("dead", 3, 5_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(requeued.max_retries, 3);
        assert_eq!(requeued.attempts, 2);
        assert_eq!(requeued.state, JobState::Pending);
        assert_eq!(requeued.created_at, 5_000);
        assert_eq!(requeued.run_at, None);
        assert_eq!(requeued.priority, crate::database::models::DEFAULT_PRIORITY);

        // With active jobs, the largest max_retries among them wins.
        store
            .upsert_job(&Job::new("other", "true", 7, 1_000))
            .await
            .unwrap();
        store.demote_job(&requeued, "again").await.unwrap();
        let requeued = store
            .requeue_dead_letter("dead", 3, 6_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(requeued.max_retries, 7);
    }

    #[tokio::test]
    async fn test_argv_command_survives_dead_letter_round_trip() {
        use crate::database::models::JobCommand;

        let (_dir, store) = store().await;
        let argv = JobCommand::from(["printf", "%s", "a b"]);
        let job = Job::new("argv", argv.clone(), 1, 1_000);
        store.upsert_job(&job).await.unwrap();
        store.demote_job(&job, "exit code 1").await.unwrap();

        let dead = store.list_dead_letters().await.unwrap();
        assert_eq!(dead[0].command, argv);

        let requeued = store
            .requeue_dead_letter("argv", 3, 2_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(requeued.command, argv);
        assert_eq!(store.get_job("argv").await.unwrap().unwrap().command, argv);
    }

    #[tokio::test]
    async fn test_requeue_unknown_id() {
        let (_dir, store) = store().await;
        assert!(
            store
                .requeue_dead_letter("missing", 3, 0)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_counts_and_failed_label() {
        let (_dir, store) = store().await;
        store.upsert_job(&Job::new("p", "true", 3, 0)).await.unwrap();
        let mut retrying = Job::new("r", "false", 3, 1);
        retrying.record_failure("exit code 1");
        store.upsert_job(&retrying).await.unwrap();
        let mut done = Job::new("c", "true", 3, 2);
        done.mark_completed(3);
        store.upsert_job(&done).await.unwrap();
        let dead = Job::new("d", "false", 1, 4);
        store.upsert_job(&dead).await.unwrap();
        store.demote_job(&dead, "boom").await.unwrap();

        let counts = store.count_by_state().await.unwrap();
        assert_eq!(
            counts,
            JobCounts {
                pending: 2,
                processing: 0,
                completed: 1,
                failed: 1,
                dead: 1,
            }
        );

        let failed = store.list_jobs(Some(JobState::Failed)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "r");
        assert!(store.list_jobs(Some(JobState::Dead)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_stale_jobs() {
        let (_dir, store) = store().await;
        store.upsert_job(&Job::new("a", "true", 3, 0)).await.unwrap();
        store.upsert_job(&Job::new("b", "true", 3, 0)).await.unwrap();
        store.claim_next_job(1_000).await.unwrap().unwrap();
        store.claim_next_job(9_000).await.unwrap().unwrap();

        let recovered = store.recover_stale_jobs(5_000, 10_000).await.unwrap();
        assert_eq!(recovered, 1);
        let a = store.get_job("a").await.unwrap().unwrap();
        assert_eq!(a.state, JobState::Pending);
        assert_eq!(a.updated_at, 10_000);
        let b = store.get_job("b").await.unwrap().unwrap();
        assert_eq!(b.state, JobState::Processing);
    }

    #[tokio::test]
    async fn test_logs_and_metrics_read_back_in_order() {
        let (_dir, store) = store().await;
        store.append_log("a", "first", "", 2_000).await.unwrap();
        store.append_log("a", "second", "warn", 1_000).await.unwrap();
        store.append_log("b", "other", "", 1_500).await.unwrap();
        store.append_metric("a", 0.5).await.unwrap();
        store.append_metric("a", 1.5).await.unwrap();

        let logs = store.get_logs("a").await.unwrap();
        let stdout: Vec<&str> = logs.iter().map(|l| l.stdout.as_str()).collect();
        assert_eq!(stdout, vec!["first", "second"]);
        assert_eq!(logs[1].stderr, "warn");

        let metrics = store.get_metrics("a").await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert!(store.get_metrics("missing").await.unwrap().is_empty());
    }
}
