//! Read-only lookup of per-destination-table load configuration.

use sqlx::PgPool;

use crate::error::StoreError;

/// One configured destination table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TargetTable {
    pub schema_name: String,
    pub table_name: String,
    /// Max objects assigned to a single task.
    pub load_batch_size: i32,
    /// Seconds between forced task cuts when the backlog stays small.
    pub load_interval: i32,
    pub disabled: bool,
    /// Staging table; when set, loads go through it and `merge_sql` commits.
    pub work_table: Option<String>,
    /// Destination-specific merge/commit SQL run after a staged load.
    pub merge_sql: Option<String>,
}

impl TargetTable {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    pub fn uses_work_table(&self) -> bool {
        self.work_table.is_some()
    }
}

/// Registry over `strload_tables`. Pure reads; the control store is the
/// only cache.
#[derive(Clone)]
pub struct TargetTableRegistry {
    pool: PgPool,
}

impl TargetTableRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up one destination. `None` means the destination is
    /// unconfigured — callers must treat that as a fatal routing error
    /// for the notification that needed it.
    pub async fn lookup(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<TargetTable>, StoreError> {
        let row = sqlx::query_as::<_, TargetTable>(
            "SELECT schema_name, table_name, load_batch_size, load_interval,
                    disabled, work_table, merge_sql
             FROM strload_tables
             WHERE schema_name = $1 AND table_name = $2",
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_table(work_table: Option<&str>) -> TargetTable {
        TargetTable {
            schema_name: "app".into(),
            table_name: "events".into(),
            load_batch_size: 100,
            load_interval: 60,
            disabled: false,
            work_table: work_table.map(str::to_string),
            merge_sql: None,
        }
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(make_table(None).qualified_name(), "app.events");
    }

    #[test]
    fn test_uses_work_table() {
        assert!(!make_table(None).uses_work_table());
        assert!(make_table(Some("app.events_wk")).uses_work_table());
    }
}
