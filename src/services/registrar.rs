//! Webhook registration lifecycle.
//!
//! Creation runs strictly in order: validate the request, compile the filter,
//! create the bucket, insert the metadata row, publish the route. Anything that
//! can be rejected is rejected before the first side effect, and the route is
//! only published once the webhook is durable. [`Registrar::restore_routes`]
//! replays every persisted webhook at boot so a crash between the insert and
//! the publish is repaired on the next start.

use metrics::counter;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use super::ingestion::IngestionHandler;
use super::persistence::{PersistenceGateway, StorageError};
use super::transform::{validate_filter, Filter, FilterError};
use crate::models::{CreateWebhookRequest, Webhook};
use crate::router::{handler, Registration, RouteError, RouteTable};

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("invalid webhook: {0}")]
    Invalid(String),

    #[error(transparent)]
    InvalidFilter(#[from] FilterError),

    #[error(transparent)]
    InvalidRoute(#[from] RouteError),

    #[error("webhook {0:?} already exists")]
    Conflict(String),

    #[error("webhook {0:?} not found")]
    NotFound(String),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Storage(StorageError),
}

impl RegistrarError {
    fn from_storage(name: &str, err: StorageError) -> Self {
        if err.is_conflict() {
            RegistrarError::Conflict(name.to_string())
        } else {
            RegistrarError::Storage(err)
        }
    }
}

#[derive(Clone, Debug)]
pub struct Registrar {
    store: PersistenceGateway,
    max_body_bytes: usize,
}

impl Registrar {
    pub fn new(store: PersistenceGateway, max_body_bytes: usize) -> Self {
        Self {
            store,
            max_body_bytes,
        }
    }

    pub fn store(&self) -> &PersistenceGateway {
        &self.store
    }

    #[instrument(skip_all, fields(webhook = %request.name))]
    pub async fn create_webhook(
        &self,
        routes: &RouteTable,
        request: CreateWebhookRequest,
    ) -> Result<Webhook, RegistrarError> {
        let result = self.create(routes, request).await;
        let outcome = match &result {
            Ok(_) => "created",
            Err(RegistrarError::Invalid(_))
            | Err(RegistrarError::InvalidFilter(_))
            | Err(RegistrarError::InvalidRoute(_)) => "invalid",
            Err(RegistrarError::Conflict(_)) => "conflict",
            Err(_) => "failed",
        };
        counter!("webhook_registrations_total", "outcome" => outcome).increment(1);
        result
    }

    async fn create(
        &self,
        routes: &RouteTable,
        request: CreateWebhookRequest,
    ) -> Result<Webhook, RegistrarError> {
        request
            .validate()
            .map_err(|e| RegistrarError::Invalid(e.to_string()))?;

        let filter = validate_filter(&request.jq_filter)?;
        let webhook = Webhook::from(request);
        RouteTable::validate_pattern(&webhook.route_pattern())?;

        self.store
            .create_bucket(&webhook.name)
            .await
            .map_err(|e| RegistrarError::from_storage(&webhook.name, e))?;

        self.store
            .create_metadata_record(&webhook)
            .await
            .map_err(|e| RegistrarError::from_storage(&webhook.name, e))?;

        self.publish(routes, webhook.clone(), filter).await?;
        info!(
            method = %webhook.method,
            path = %webhook.path,
            filtered = webhook.has_filter(),
            "Webhook created"
        );
        Ok(webhook)
    }

    /// Binds `webhook` to a fresh ingestion handler in the route table.
    pub async fn publish(
        &self,
        routes: &RouteTable,
        webhook: Webhook,
        filter: Option<Filter>,
    ) -> Result<Registration, RouteError> {
        let pattern = webhook.route_pattern();
        let name = webhook.name.clone();
        let ingestion = IngestionHandler::new(webhook, filter, self.store.clone(), self.max_body_bytes);

        let registration = routes
            .register(
                &pattern,
                handler(move |_ctx, request| {
                    let ingestion = ingestion.clone();
                    async move { ingestion.handle(request).await }
                }),
            )
            .await?;

        if registration == Registration::StaticReplaced {
            warn!(webhook = %name, route = %pattern, "Static route replaced by newer webhook");
        }
        Ok(registration)
    }

    /// Publishes every persisted webhook. Webhooks whose filter or route no
    /// longer compiles are skipped and logged.
    pub async fn restore_routes(&self, routes: &RouteTable) -> Result<usize, RegistrarError> {
        let webhooks = self
            .store
            .list_metadata_records()
            .await
            .map_err(RegistrarError::Storage)?;
        let total = webhooks.len();

        let mut restored = 0;
        for webhook in webhooks {
            let filter = match validate_filter(&webhook.jq_filter) {
                Ok(filter) => filter,
                Err(e) => {
                    error!(webhook = %webhook.name, error = %e, "Skipping webhook with invalid filter");
                    continue;
                }
            };
            let name = webhook.name.clone();
            match self.publish(routes, webhook, filter).await {
                Ok(_) => restored += 1,
                Err(e) => error!(webhook = %name, error = %e, "Skipping webhook with invalid route"),
            }
        }

        info!(restored, skipped = total - restored, "Webhook routes restored");
        Ok(restored)
    }

    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>, RegistrarError> {
        self.store
            .list_metadata_records()
            .await
            .map_err(RegistrarError::Storage)
    }

    /// Every payload stored for `name`, unordered.
    pub async fn get_webhook_content(&self, name: &str) -> Result<Vec<String>, RegistrarError> {
        let webhook = self
            .store
            .get_metadata_record_by_name(name)
            .await
            .map_err(RegistrarError::Storage)?
            .ok_or_else(|| RegistrarError::NotFound(name.to_string()))?;

        self.store
            .list_object_payloads(&webhook.name)
            .await
            .map_err(RegistrarError::Storage)
    }

    pub async fn delete_webhook(&self, _name: &str) -> Result<(), RegistrarError> {
        Err(RegistrarError::NotImplemented("webhook deletion"))
    }

    pub async fn delete_webhook_content(&self, _name: &str) -> Result<(), RegistrarError> {
        Err(RegistrarError::NotImplemented("webhook content deletion"))
    }
}
