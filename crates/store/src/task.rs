//! Load-task retrieval for task-notification fan-out.

use sqlx::PgPool;

use strload_core::event::LoadTask;

use crate::error::StoreError;

#[derive(Clone)]
pub struct TaskStore {
    pool: PgPool,
}

impl TaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Materialize a task notification: destination, assigned object URLs,
    /// and the table's disabled flag at read time.
    pub async fn get_task(&self, task_seq: i64) -> Result<Option<LoadTask>, StoreError> {
        let row: Option<(i64, String, String, bool)> = sqlx::query_as(
            "SELECT t.task_seq, t.schema_name, t.table_name, tbl.disabled
             FROM strload_tasks t
             INNER JOIN strload_tables tbl USING (schema_name, table_name)
             WHERE t.task_seq = $1",
        )
        .bind(task_seq)
        .fetch_optional(&self.pool)
        .await?;

        let Some((task_seq, schema, table, disabled)) = row else {
            return Ok(None);
        };

        let object_urls = fetch_object_urls(&self.pool, task_seq).await?;

        Ok(Some(LoadTask {
            task_seq,
            schema,
            table,
            object_urls,
            disabled,
            rerun: false,
        }))
    }
}

/// Assigned object URLs of a task, in arrival order.
pub(crate) async fn fetch_object_urls(
    pool: &PgPool,
    task_seq: i64,
) -> Result<Vec<String>, StoreError> {
    let urls: Vec<(String,)> = sqlx::query_as(
        "SELECT object_url
         FROM strload_objects
         INNER JOIN strload_task_objects USING (object_seq)
         WHERE task_seq = $1
         ORDER BY object_seq",
    )
    .bind(task_seq)
    .fetch_all(pool)
    .await?;

    Ok(urls.into_iter().map(|(u,)| u).collect())
}
