//! Postgres-backed webhook metadata.

use async_trait::async_trait;
use tracing::info;

use super::{MetadataStore, StorageError, StorageResult};
use crate::database::{self, DatabasePool};
use crate::models::Webhook;

const SELECT_COLUMNS: &str =
    "SELECT name, description, path, method, jq_filter, forward_to, preserve_payload, created_at FROM webhooks";

#[derive(Clone)]
pub struct PgMetadataStore {
    pool: DatabasePool,
}

impl PgMetadataStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Connects, runs the embedded migrations and returns a ready store.
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = database::setup_database(database_url, max_connections).await?;
        database::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, webhook: &Webhook) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhooks (name, description, path, method, jq_filter, forward_to, preserve_payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&webhook.name)
        .bind(&webhook.description)
        .bind(&webhook.path)
        .bind(&webhook.method)
        .bind(&webhook.jq_filter)
        .bind(&webhook.forward_to)
        .bind(webhook.preserve_payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StorageError::Conflict(webhook.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> StorageResult<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>(&format!("{SELECT_COLUMNS} ORDER BY created_at, name"))
            .fetch_all(&self.pool)
            .await?;
        Ok(webhooks)
    }

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>(&format!("{SELECT_COLUMNS} WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(webhook)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}
