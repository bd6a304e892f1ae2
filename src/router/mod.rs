//! HTTP entry point.
//!
//! axum only contributes the middleware stack and a single fallback. Every
//! request, admin or webhook, is resolved through the [`RouteTable`] so routes
//! can be added while the server is running.

pub mod table;

pub use table::{
    handler, BoxedHandler, PathParams, Registration, Resolved, RouteContext, RouteCounts,
    RouteError, RouteTable,
};

use std::future::Future;
use std::time::Duration;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::from_fn,
    response::{IntoResponse, Response},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::app_state::AppState;
use crate::constants::routes;
use crate::error::ApiError;
use crate::handlers::{self, webhooks, HealthInfo};
use crate::middleware::{metrics_middleware, request_logger_middleware};
use crate::services::Registrar;

/// Build the application router around the shared route table.
pub fn build_router(app_state: AppState) -> Router {
    let table = app_state.routes.clone();

    Router::new()
        .fallback(move |request: Request| {
            let table = table.clone();
            async move { dispatch(table, request).await }
        })
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(request_logger_middleware))
                .layer(from_fn(metrics_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(app_state.config.request_timeout_secs),
                )),
        )
}

async fn dispatch(table: RouteTable, request: Request) -> Response {
    match table.dispatch(request).await {
        Ok(response) => response,
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Wraps an admin handler that needs the registrar.
fn with_registrar<F, Fut, R>(registrar: &Registrar, f: F) -> BoxedHandler
where
    F: Fn(Registrar, RouteContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    let registrar = registrar.clone();
    handler(move |ctx, request| {
        let response = f(registrar.clone(), ctx, request);
        async move { response.await.into_response() }
    })
}

/// Registers the fixed admin surface. These are ordinary route table entries,
/// so a webhook registered later on the same static key replaces them.
pub async fn register_admin_routes(
    table: &RouteTable,
    registrar: &Registrar,
    health: HealthInfo,
    metrics: PrometheusHandle,
) -> Result<(), RouteError> {
    table
        .register(routes::CREATE_WEBHOOK, with_registrar(registrar, webhooks::create_webhook))
        .await?;
    table
        .register(
            routes::LIST_WEBHOOKS,
            with_registrar(registrar, |r, _, _| webhooks::list_webhooks(r)),
        )
        .await?;
    table
        .register(
            routes::GET_WEBHOOK_CONTENT,
            with_registrar(registrar, |r, ctx, _| webhooks::get_webhook_content(r, ctx)),
        )
        .await?;
    table
        .register(
            routes::DELETE_WEBHOOK,
            with_registrar(registrar, |r, ctx, _| webhooks::delete_webhook(r, ctx)),
        )
        .await?;
    table
        .register(
            routes::DELETE_WEBHOOK_CONTENT,
            with_registrar(registrar, |r, ctx, _| webhooks::delete_webhook_content(r, ctx)),
        )
        .await?;

    table
        .register(
            routes::HEALTH,
            handler(move |ctx, _| {
                let health = health.clone();
                async move { handlers::health_check(health, ctx).await.into_response() }
            }),
        )
        .await?;
    table
        .register(
            routes::METRICS,
            handler(move |_, _| {
                let metrics = metrics.clone();
                async move { handlers::get_prometheus_metrics(metrics).await }
            }),
        )
        .await?;
    table
        .register(
            routes::OPENAPI,
            handler(|_, _| async { handlers::openapi_json().await.into_response() }),
        )
        .await?;

    Ok(())
}
