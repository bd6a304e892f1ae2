use anyhow::{Context, Result};
use tracing::info;

use webhook_gateway::{config::Config, router::build_router, startup};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    startup::init_tracing(config.log_format);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = config.storage_backend(),
        "Starting webhook gateway"
    );

    let app_state = startup::initialize_app(&config).await?;
    let store = app_state.registrar.store().clone();
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(config.server_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server_address))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(startup::shutdown_signal())
        .await
        .context("Server error")?;

    store.close().await;
    info!("Webhook gateway stopped");
    Ok(())
}
