//! Per-request pipeline for a registered webhook.
//!
//! Read the bounded body, optionally store it raw, run the webhook's filter,
//! store the result and echo it back. A raw object written before a later
//! failure is not rolled back.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::header,
    response::{IntoResponse, Response},
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use metrics::{counter, histogram};
use tracing::{debug, info, instrument};

use super::persistence::PersistenceGateway;
use super::transform::{apply_blocking, Filter, TransformError};
use crate::error::ApiError;
use crate::models::Webhook;

#[derive(Clone)]
pub struct IngestionHandler {
    webhook: Arc<Webhook>,
    filter: Option<Arc<Filter>>,
    store: PersistenceGateway,
    max_body_bytes: usize,
}

impl IngestionHandler {
    pub fn new(
        webhook: Webhook,
        filter: Option<Filter>,
        store: PersistenceGateway,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            webhook: Arc::new(webhook),
            filter: filter.map(Arc::new),
            store,
            max_body_bytes,
        }
    }

    /// Runs the pipeline and converts failures into error responses.
    pub async fn handle(&self, request: Request) -> Response {
        let result = self.ingest(request).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(ApiError::PayloadTooLarge(_)) => "payload_too_large",
            Err(ApiError::Transform(_)) => "transform_failed",
            Err(ApiError::Storage(_)) => "storage_failed",
            Err(_) => "failed",
        };
        counter!(
            "webhook_ingest_total",
            "webhook" => self.webhook.name.clone(),
            "outcome" => outcome
        )
        .increment(1);

        match result {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    }

    #[instrument(skip_all, fields(webhook = %self.webhook.name))]
    async fn ingest(&self, request: Request) -> Result<Response, ApiError> {
        let body = read_body(request.into_body(), self.max_body_bytes).await?;
        let bucket = self.webhook.name.as_str();

        if self.webhook.preserve_payload {
            let key = self.store.put_object(bucket, body.to_vec()).await?;
            debug!(key = %key, "Raw payload preserved");
        }

        let payload = String::from_utf8(body.to_vec()).map_err(|e| {
            TransformError::InvalidPayload(format!("body is not UTF-8: {e}"))
        })?;

        let started = Instant::now();
        let transformed = apply_blocking(payload, self.filter.clone()).await;
        histogram!(
            "webhook_transform_duration_seconds",
            "webhook" => self.webhook.name.clone()
        )
        .record(started.elapsed().as_secs_f64());
        let transformed = transformed?;

        let key = self
            .store
            .put_object(bucket, transformed.clone().into_bytes())
            .await?;

        if !self.webhook.forward_to.is_empty() {
            debug!(forward_to = %self.webhook.forward_to, "Forwarding is not supported, skipping");
        }

        info!(key = %key, bytes = transformed.len(), "Payload ingested");
        Ok((
            [(header::CONTENT_TYPE, "application/json")],
            transformed,
        )
            .into_response())
    }
}

/// Collects at most `limit` bytes of `body`.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, ApiError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => Err(
            ApiError::PayloadTooLarge(format!("request body exceeds {limit} bytes")),
        ),
        Err(err) => Err(ApiError::BadRequest(format!("failed to read request body: {err}"))),
    }
}
