use axum::response::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::router::{RouteContext, RouteCounts};

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub environment: String,
    pub storage_backend: String,
    /// Live size of the route table, admin routes included.
    pub routes: RouteCounts,
}

/// Fixed facts about this process reported by the health endpoint.
#[derive(Debug, Clone)]
pub struct HealthInfo {
    pub environment: String,
    pub storage_backend: &'static str,
}

impl HealthStatus {
    pub fn new(info: &HealthInfo, routes: RouteCounts) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: info.environment.clone(),
            storage_backend: info.storage_backend.to_string(),
            routes,
        }
    }
}

/// Basic health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthStatus)
    )
)]
pub async fn health_check(info: HealthInfo, ctx: RouteContext) -> Json<HealthStatus> {
    let counts = ctx.routes.counts().await;
    Json(HealthStatus::new(&info, counts))
}
