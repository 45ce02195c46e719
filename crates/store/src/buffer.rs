//! Batching engine: records ingested objects and cuts load tasks.
//!
//! Task creation and object assignment are two separate statements inside
//! one transaction. They are decided by different predicates (backlog or
//! interval vs. raw capacity) and must be separately retryable without
//! re-deciding windowing. Both are conditional writes whose predicates are
//! evaluated store-side, so concurrent `flush` calls from several
//! dispatcher processes cannot cut two tasks for the same window.

use sqlx::PgPool;
use tracing::info;

use strload_core::event::ObjectCreated;

use crate::error::StoreError;

#[derive(Clone)]
pub struct ObjectBuffer {
    pool: PgPool,
}

impl ObjectBuffer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotently record one notified object.
    ///
    /// First writer wins: a duplicate `object_url` is silently ignored, and
    /// an object for an unconfigured destination inserts nothing. Returns
    /// whether a row was written.
    pub async fn put(&self, obj: &ObjectCreated) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO strload_objects
                 (object_url, object_size, schema_name, table_name, submit_time)
             SELECT $1, $2, schema_name, table_name, now()
             FROM strload_tables
             WHERE schema_name = $3
               AND table_name = $4
               AND NOT EXISTS (SELECT 1 FROM strload_objects WHERE object_url = $1)",
        )
        .bind(&obj.url)
        .bind(obj.size)
        .bind(&obj.schema)
        .bind(&obj.table)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Evaluate windowing for every table and cut tasks, returning the
    /// sequence numbers of newly created tasks.
    ///
    /// One transaction: create tasks where the window predicate holds, then
    /// fill the oldest unfulfilled task per table with unassigned objects.
    pub async fn flush(&self) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let task_seqs = self.insert_tasks(&mut tx).await?;
        self.insert_task_objects(&mut tx).await?;

        tx.commit().await?;

        info!(tasks_created = task_seqs.len(), "Dispatch window evaluated");
        Ok(task_seqs)
    }

    /// Cut one task per non-disabled table whose window has closed:
    /// unassigned backlog over `load_batch_size`, last task older than
    /// `load_interval`, or no task ever created.
    ///
    /// The decision predicate and the insert are one statement, so two
    /// concurrent evaluations cannot both cut a task for the same window.
    async fn insert_tasks(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<Vec<i64>, StoreError> {
        let seqs: Vec<(i64,)> = sqlx::query_as(
            "INSERT INTO strload_tasks (schema_name, table_name, submit_time)
             SELECT
                 tbl.schema_name
                 , tbl.table_name
                 , now()
             FROM
                 strload_tables tbl
                 INNER JOIN (
                     SELECT
                         schema_name
                         , table_name
                         , count(*) AS object_count
                     FROM
                         strload_objects
                         LEFT OUTER JOIN strload_task_objects USING (object_seq)
                     WHERE
                         task_seq IS NULL -- not assigned to a task
                     GROUP BY
                         schema_name, table_name
                     ) obj -- number of objects not assigned to a task
                     USING (schema_name, table_name)
                 LEFT OUTER JOIN (
                     SELECT
                         schema_name
                         , table_name
                         , max(submit_time) AS latest_submit_time
                     FROM
                         strload_tasks
                     GROUP BY
                         schema_name, table_name
                     ) task -- preceding task's submit time
                     USING (schema_name, table_name)
             WHERE
                 NOT tbl.disabled
                 AND (
                     obj.object_count > tbl.load_batch_size -- batch_size exceeded?
                     OR extract(epoch FROM now() - task.latest_submit_time) > tbl.load_interval -- load_interval exceeded?
                     OR task.latest_submit_time IS NULL -- no last task
                 )
             RETURNING task_seq",
        )
        .fetch_all(&mut **tx)
        .await?;

        Ok(seqs.into_iter().map(|(seq,)| seq).collect())
    }

    /// Fill the oldest object-less task of each table with its unassigned
    /// objects, strictly FIFO by arrival sequence, at most
    /// `load_batch_size` per task. An object exceeding every open task's
    /// capacity stays unassigned until the next flush cuts room.
    async fn insert_task_objects(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO strload_task_objects (task_seq, object_seq)
             SELECT
                 task_seq
                 , object_seq
             FROM (
                 SELECT
                     row_number() OVER (PARTITION BY task.task_seq ORDER BY obj.object_seq) AS object_count
                     , task.task_seq
                     , obj.object_seq
                     , load_batch_size
                 FROM
                     strload_objects obj
                     INNER JOIN (
                         SELECT
                             min(task_seq) AS task_seq -- oldest task
                             , schema_name
                             , table_name
                             , max(load_batch_size) AS load_batch_size
                         FROM
                             strload_tasks
                             INNER JOIN strload_tables USING (schema_name, table_name)
                         WHERE
                             task_seq NOT IN (SELECT DISTINCT task_seq FROM strload_task_objects) -- no assigned objects
                         GROUP BY
                             2, 3 -- one task per table, so an object never joins two tasks
                         ) task -- tasks without objects
                         USING (schema_name, table_name)
                     LEFT OUTER JOIN strload_task_objects task_obj
                         USING (object_seq)
                 WHERE
                     task_obj.object_seq IS NULL -- not assigned to a task
                 ) AS t
             WHERE
                 object_count <= load_batch_size -- capacity bound; a task may be exactly full",
        )
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
