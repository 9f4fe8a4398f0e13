use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;

/// Connects and runs pending migrations. `None` when no `DATABASE_URL` is set.
pub async fn create_pool(config: &DatabaseConfig) -> Result<Option<PgPool>> {
    let Some(url) = config.url.as_deref() else {
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(url)
        .await?;

    health_check(&pool).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    Ok(Some(pool))
}

pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
