use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{Config, LogFormat, StorageConfig};
use crate::constants::defaults;
use crate::handlers::HealthInfo;
use crate::router::{self, RouteTable};
use crate::services::persistence::{PgMetadataStore, S3ObjectStore};
use crate::services::{PersistenceGateway, Registrar};

const METRICS_UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Installs the global tracing subscriber.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(defaults::LOG_FILTER));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Initialize all application services and state
pub async fn initialize_app(config: &Config) -> Result<AppState> {
    info!("Environment: {}", config.environment);

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    spawn_metrics_upkeep(metrics_handle.clone());
    info!("Prometheus metrics initialized");

    let store = open_persistence(config).await?;
    build_app_state(config.clone(), store, metrics_handle).await
}

/// Connects the storage backends named by the configuration.
pub async fn open_persistence(config: &Config) -> Result<PersistenceGateway> {
    match &config.storage {
        StorageConfig::PostgresS3 {
            database_url,
            max_connections,
            minio,
        } => {
            let metadata = PgMetadataStore::connect(database_url, *max_connections)
                .await
                .context("Failed to open metadata store")?;
            info!("PostgreSQL connection established");

            let objects = S3ObjectStore::connect(minio).await;
            info!(host = %minio.host, ssl = minio.use_ssl, "Object store client configured");

            Ok(PersistenceGateway::new(Arc::new(metadata), Arc::new(objects)))
        }
        StorageConfig::Memory => {
            info!("Using in-memory storage, data is lost on shutdown");
            Ok(PersistenceGateway::in_memory())
        }
    }
}

/// Registers the admin surface and replays persisted webhooks. Nothing is
/// served until this returns.
pub async fn build_app_state(
    config: Config,
    store: PersistenceGateway,
    metrics_handle: PrometheusHandle,
) -> Result<AppState> {
    let routes = RouteTable::new();
    let registrar = Registrar::new(store, config.max_body_bytes);

    let health = HealthInfo {
        environment: config.environment.clone(),
        storage_backend: config.storage_backend(),
    };
    router::register_admin_routes(&routes, &registrar, health, metrics_handle)
        .await
        .context("Failed to register admin routes")?;

    let restored = registrar
        .restore_routes(&routes)
        .await
        .context("Failed to restore webhook routes")?;
    let counts = routes.counts().await;
    info!(
        restored,
        static_routes = counts.static_routes,
        dynamic_routes = counts.dynamic_routes,
        "Route table ready"
    );

    Ok(AppState {
        config,
        routes,
        registrar,
    })
}

/// Histograms are only drained when upkeep runs; `install_recorder` leaves
/// that to the caller.
fn spawn_metrics_upkeep(handle: PrometheusHandle) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_UPKEEP_INTERVAL);
        loop {
            interval.tick().await;
            handle.run_upkeep();
        }
    });
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_state_has_admin_routes() {
        let config = Config::in_memory();
        let store = open_persistence(&config).await.unwrap();
        let handle = PrometheusBuilder::new().build_recorder().handle();

        let state = build_app_state(config, store, handle).await.unwrap();
        let counts = state.routes.counts().await;
        assert_eq!(counts.static_routes, 5);
        assert_eq!(counts.dynamic_routes, 3);
    }
}
