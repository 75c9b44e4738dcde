//! Runs pending SQLx migrations against the tenant database. Embedded at
//! compile time so no migration files are needed at runtime; used as a
//! deploy-time step before starting `ep-server`.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let database_url = std::env::var("TENANT_DB_URL").context("TENANT_DB_URL must be set")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("failed to connect to tenant database")?;

    tracing::info!("running pending migrations");
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("migrations completed");

    Ok(())
}
