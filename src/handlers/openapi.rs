use axum::response::Json;
use utoipa::OpenApi;

use super::{health, metrics, webhooks};
use crate::error::{ErrorCode, ErrorDetail, ErrorResponse};
use crate::models::{CreateWebhookRequest, Webhook};
use crate::router::RouteCounts;

/// OpenAPI document for the admin surface. Webhook routes are registered at
/// runtime and are not part of it.
#[derive(OpenApi)]
#[openapi(
    info(title = "Webhook Gateway API", version = "0.1.0"),
    paths(
        webhooks::create_webhook,
        webhooks::list_webhooks,
        webhooks::get_webhook_content,
        webhooks::delete_webhook,
        webhooks::delete_webhook_content,
        health::health_check,
        metrics::get_prometheus_metrics,
    ),
    components(schemas(
        Webhook,
        CreateWebhookRequest,
        health::HealthStatus,
        RouteCounts,
        ErrorResponse,
        ErrorDetail,
        ErrorCode,
    )),
    tags(
        (name = "webhooks", description = "Webhook registration and stored content"),
        (name = "health", description = "Liveness"),
        (name = "metrics", description = "Prometheus exposition")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
