//! Admin endpoints for managing webhooks.
//!
//! These are mounted in the route table like any webhook, so each handler
//! receives the [`RouteContext`] and raw request instead of axum extractors.

use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::Json,
};
use tracing::debug;

use crate::error::{handle_rejection, ApiError, ErrorResponse, Result};
use crate::models::{CreateWebhookRequest, Webhook};
use crate::router::RouteContext;
use crate::services::Registrar;

fn webhook_name(ctx: &RouteContext) -> Result<&str> {
    ctx.param("name")
        .ok_or_else(|| ApiError::Internal("route is missing the {name} placeholder".to_string()))
}

/// Create a webhook and publish its route
#[utoipa::path(
    post,
    path = "/webhooks",
    tag = "webhooks",
    request_body = CreateWebhookRequest,
    responses(
        (status = 201, description = "Webhook created and routed", body = Webhook),
        (status = 400, description = "Invalid request, filter or route", body = ErrorResponse),
        (status = 409, description = "A webhook or bucket with this name exists", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse)
    )
)]
pub async fn create_webhook(
    registrar: Registrar,
    ctx: RouteContext,
    request: Request,
) -> Result<(StatusCode, Json<Webhook>)> {
    let Json(payload) = Json::<CreateWebhookRequest>::from_request(request, &())
        .await
        .map_err(handle_rejection)?;

    let webhook = registrar.create_webhook(&ctx.routes, payload).await?;
    Ok((StatusCode::CREATED, Json(webhook)))
}

/// List every registered webhook
#[utoipa::path(
    get,
    path = "/webhooks",
    tag = "webhooks",
    responses(
        (status = 200, description = "All persisted webhooks", body = Vec<Webhook>),
        (status = 500, description = "Storage failure", body = ErrorResponse)
    )
)]
pub async fn list_webhooks(registrar: Registrar) -> Result<Json<Vec<Webhook>>> {
    let webhooks = registrar.list_webhooks().await?;
    debug!(count = webhooks.len(), "Listed webhooks");
    Ok(Json(webhooks))
}

/// Stored payloads of one webhook, in no particular order
#[utoipa::path(
    get,
    path = "/webhooks/{name}/content",
    tag = "webhooks",
    params(("name" = String, Path, description = "Webhook name")),
    responses(
        (status = 200, description = "Stored payloads as strings", body = Vec<String>),
        (status = 404, description = "Unknown webhook", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse)
    )
)]
pub async fn get_webhook_content(
    registrar: Registrar,
    ctx: RouteContext,
) -> Result<Json<Vec<String>>> {
    let name = webhook_name(&ctx)?;
    let payloads = registrar.get_webhook_content(name).await?;
    Ok(Json(payloads))
}

#[utoipa::path(
    delete,
    path = "/webhooks/{name}",
    tag = "webhooks",
    params(("name" = String, Path, description = "Webhook name")),
    responses((status = 501, description = "Not implemented", body = ErrorResponse))
)]
pub async fn delete_webhook(registrar: Registrar, ctx: RouteContext) -> Result<StatusCode> {
    registrar.delete_webhook(webhook_name(&ctx)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/webhooks/{name}/content",
    tag = "webhooks",
    params(("name" = String, Path, description = "Webhook name")),
    responses((status = 501, description = "Not implemented", body = ErrorResponse))
)]
pub async fn delete_webhook_content(registrar: Registrar, ctx: RouteContext) -> Result<StatusCode> {
    registrar.delete_webhook_content(webhook_name(&ctx)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
