use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{info, warn};

pub type DatabasePool = PgPool;

pub async fn setup_database(
    database_url: &str,
    max_connections: u32,
) -> Result<DatabasePool, sqlx::Error> {
    if !database_url.contains("sslmode=") {
        warn!("Database connection does not set sslmode; consider sslmode=require");
    }

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .test_before_acquire(true)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET timezone = 'UTC'").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    let start = std::time::Instant::now();
    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(
        max_connections,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Database connection established"
    );

    Ok(pool)
}

pub async fn run_migrations(pool: &DatabasePool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}
