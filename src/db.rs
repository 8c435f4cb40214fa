use std::time::Duration;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

/// Blocks until the database accepts connections, retrying every `interval`.
pub async fn wait_for_db(
    database_url: &str,
    attempts: u32,
    interval: Duration,
) -> anyhow::Result<PgPool> {
    let attempts = attempts.max(1);
    info!("waiting for database...");
    let mut attempt = 1;
    loop {
        let res = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await;
        match res {
            Ok(pool) => {
                info!(attempt, "database available");
                return Ok(pool);
            }
            Err(e) if attempt < attempts => {
                warn!(attempt, error = %e, "database unavailable, retrying in {:?}", interval);
                tokio::time::sleep(interval).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("database still unavailable after {attempts} attempts")
                })
            }
        }
    }
}

pub async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}
