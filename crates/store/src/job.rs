//! Job claim and terminal status recording.
//!
//! A claim is a conditional insert into `strload_jobs`: of all workers
//! racing for the same task, exactly one insert succeeds. `claim_next`
//! locks the candidate task row (`FOR UPDATE SKIP LOCKED`) so concurrent
//! pollers pick distinct tasks instead of colliding; the partial unique
//! index on running jobs backstops the at-most-one-running invariant, and
//! a violation reads as "no task available", never as an error.

use sqlx::PgPool;
use tracing::info;

use crate::error::StoreError;
use crate::task::fetch_object_urls;

/// Terminal message cap: first line only, at most this many characters,
/// to keep the control store queryable and bounded.
const MAX_MESSAGE_LENGTH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Success,
    Failure,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Error => "error",
        }
    }
}

/// A task claimed as a running job, with everything the loader needs.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_seq: i64,
    pub task_seq: i64,
    pub schema_name: String,
    pub table_name: String,
    pub object_urls: Vec<String>,
    pub work_table: Option<String>,
    pub merge_sql: Option<String>,
}

impl ClaimedJob {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

#[derive(Clone)]
pub struct JobRegistry {
    pool: PgPool,
    /// Explicit worker identity recorded on every claim; no ambient global.
    worker_id: String,
}

impl JobRegistry {
    pub fn new(pool: PgPool, worker_id: impl Into<String>) -> Self {
        Self {
            pool,
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim the oldest unjobbed task of a non-disabled table, FIFO by
    /// task creation. Returns `None` when no eligible task exists or a
    /// concurrent worker won the race.
    pub async fn claim_next(&self) -> Result<Option<ClaimedJob>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let candidate: Option<(i64,)> = sqlx::query_as(
            "SELECT t.task_seq
             FROM strload_tasks t
             INNER JOIN strload_tables tbl USING (schema_name, table_name)
             WHERE NOT tbl.disabled
               AND NOT EXISTS (SELECT 1 FROM strload_jobs j WHERE j.task_seq = t.task_seq)
             ORDER BY t.submit_time, t.task_seq
             LIMIT 1
             FOR UPDATE OF t SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((task_seq,)) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let inserted = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO strload_jobs (task_seq, worker_id, status, start_time)
             VALUES ($1, $2, 'running', now())
             RETURNING job_seq",
        )
        .bind(task_seq)
        .bind(&self.worker_id)
        .fetch_one(&mut *tx)
        .await;

        let job_seq = match inserted {
            Ok((job_seq,)) => job_seq,
            Err(e) if is_unique_violation(&e) => {
                // Lost the race to another worker between evaluation and
                // insert: a failed claim is "no task", not an error.
                tx.rollback().await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let job = self.load_claimed(&mut tx, job_seq, task_seq).await?;
        tx.commit().await?;

        info!(
            job_seq,
            task_seq,
            table = %job.qualified_name(),
            worker_id = %self.worker_id,
            "Task claimed"
        );
        Ok(Some(job))
    }

    /// Claim one specific task (direct dispatch). With `rerun` false, a
    /// task that already has a job is rejected — the exactly-once guard.
    /// With `rerun` true the exclusion is relaxed and a new job row is
    /// appended; prior terminal jobs stay immutable history.
    pub async fn claim(&self, task_seq: i64, rerun: bool) -> Result<Option<ClaimedJob>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO strload_jobs (task_seq, worker_id, status, start_time)
             SELECT task_seq, $2, 'running', now()
             FROM strload_tasks
             WHERE task_seq = $1
               AND (NOT EXISTS (SELECT 1 FROM strload_jobs j WHERE j.task_seq = $1) OR $3)
             RETURNING job_seq",
        )
        .bind(task_seq)
        .bind(&self.worker_id)
        .bind(rerun)
        .fetch_optional(&mut *tx)
        .await;

        let job_seq = match inserted {
            Ok(Some((job_seq,))) => job_seq,
            Ok(None) => {
                tx.rollback().await?;
                return Ok(None);
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let job = self.load_claimed(&mut tx, job_seq, task_seq).await?;
        tx.commit().await?;

        info!(
            job_seq,
            task_seq,
            rerun,
            worker_id = %self.worker_id,
            "Task claimed directly"
        );
        Ok(Some(job))
    }

    async fn load_claimed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job_seq: i64,
        task_seq: i64,
    ) -> Result<ClaimedJob, StoreError> {
        let (schema_name, table_name, work_table, merge_sql): (
            String,
            String,
            Option<String>,
            Option<String>,
        ) = sqlx::query_as(
            "SELECT t.schema_name, t.table_name, tbl.work_table, tbl.merge_sql
             FROM strload_tasks t
             INNER JOIN strload_tables tbl USING (schema_name, table_name)
             WHERE t.task_seq = $1",
        )
        .bind(task_seq)
        .fetch_one(&mut **tx)
        .await?;

        let object_urls: Vec<(String,)> = sqlx::query_as(
            "SELECT object_url
             FROM strload_objects
             INNER JOIN strload_task_objects USING (object_seq)
             WHERE task_seq = $1
             ORDER BY object_seq",
        )
        .bind(task_seq)
        .fetch_all(&mut **tx)
        .await?;

        Ok(ClaimedJob {
            job_seq,
            task_seq,
            schema_name,
            table_name,
            object_urls: object_urls.into_iter().map(|(u,)| u).collect(),
            work_table,
            merge_sql,
        })
    }

    /// Assigned object URLs of an already-claimed task.
    pub async fn object_urls(&self, task_seq: i64) -> Result<Vec<String>, StoreError> {
        fetch_object_urls(&self.pool, task_seq).await
    }

    /// Record a job's terminal status. The `status = 'running'` guard makes
    /// the terminal write exactly-once; `finish_time` is set with it.
    pub async fn write_result(
        &self,
        job_seq: i64,
        status: JobStatus,
        message: &str,
    ) -> Result<(), StoreError> {
        debug_assert!(status != JobStatus::Running);

        sqlx::query(
            "UPDATE strload_jobs
             SET status = $2, finish_time = now(), message = $3
             WHERE job_seq = $1 AND status = 'running'",
        )
        .bind(job_seq)
        .bind(status.as_str())
        .bind(truncate_message(message))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// First line of the message, trimmed, capped at [`MAX_MESSAGE_LENGTH`]
/// characters.
pub fn truncate_message(message: &str) -> String {
    message
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .chars()
        .take(MAX_MESSAGE_LENGTH)
        .collect()
}
