use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use strload_core::config::PostgresConfig;

use crate::error::StoreError;

/// Create the control-store connection pool and run migrations.
pub async fn init_pg_pool(config: &PostgresConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url())
        .await?;
    info!("Control store connected: {}", config.host);

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Control-store migrations applied");

    Ok(pool)
}
