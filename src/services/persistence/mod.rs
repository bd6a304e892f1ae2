//! Persistence gateway.
//!
//! Webhook metadata lives in a relational store and payloads live in an object
//! store, one bucket per webhook. Both sit behind traits so the service can
//! run against Postgres + S3/MinIO or entirely in memory.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::Webhook;

pub mod memory;
pub mod postgres;
pub mod s3;

pub use memory::{MemoryMetadataStore, MemoryObjectStore};
pub use postgres::PgMetadataStore;
pub use s3::S3ObjectStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket {0:?} already exists")]
    BucketExists(String),

    #[error("metadata record {0:?} already exists")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("object store error: {0}")]
    ObjectStore(String),
}

impl StorageError {
    /// True when the failure is a name collision rather than a backend fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::BucketExists(_) | StorageError::Conflict(_))
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn insert(&self, webhook: &Webhook) -> StorageResult<()>;

    async fn list(&self) -> StorageResult<Vec<Webhook>>;

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Webhook>>;

    async fn close(&self) {}
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Fails with [`StorageError::BucketExists`] when the bucket is taken.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn put_object(&self, bucket: &str, key: &str, payload: Vec<u8>) -> StorageResult<()>;

    /// Every object body in the bucket, in no particular order.
    async fn list_object_payloads(&self, bucket: &str) -> StorageResult<Vec<String>>;
}

/// Narrow facade the registrar and ingestion pipeline talk to.
#[derive(Clone)]
pub struct PersistenceGateway {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("metadata", &self.metadata.backend_name())
            .field("objects", &self.objects.backend_name())
            .finish()
    }
}

impl PersistenceGateway {
    pub fn new(metadata: Arc<dyn MetadataStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { metadata, objects }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryMetadataStore::default()),
            Arc::new(MemoryObjectStore::default()),
        )
    }

    pub async fn create_metadata_record(&self, webhook: &Webhook) -> StorageResult<()> {
        self.metadata.insert(webhook).await?;
        debug!(webhook = %webhook.name, "Metadata record created");
        Ok(())
    }

    pub async fn list_metadata_records(&self) -> StorageResult<Vec<Webhook>> {
        self.metadata.list().await
    }

    pub async fn get_metadata_record_by_name(&self, name: &str) -> StorageResult<Option<Webhook>> {
        self.metadata.find_by_name(name).await
    }

    pub async fn create_bucket(&self, name: &str) -> StorageResult<()> {
        self.objects.create_bucket(name).await?;
        debug!(bucket = %name, "Bucket created");
        Ok(())
    }

    /// Stores `payload` under a fresh `<uuid>.json` key and returns the key.
    pub async fn put_object(&self, bucket: &str, payload: Vec<u8>) -> StorageResult<String> {
        let key = format!("{}.json", Uuid::new_v4());
        let size = payload.len();
        self.objects.put_object(bucket, &key, payload).await?;
        debug!(bucket = %bucket, key = %key, size, "Object stored");
        Ok(key)
    }

    pub async fn list_object_payloads(&self, bucket: &str) -> StorageResult<Vec<String>> {
        self.objects.list_object_payloads(bucket).await
    }

    pub async fn close(&self) {
        self.metadata.close().await;
        info!("Persistence gateway closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook(name: &str) -> Webhook {
        Webhook {
            name: name.to_string(),
            description: String::new(),
            path: format!("/{name}"),
            method: "POST".to_string(),
            jq_filter: String::new(),
            forward_to: String::new(),
            preserve_payload: false,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_put_object_generates_json_keys() {
        let gateway = PersistenceGateway::in_memory();
        gateway.create_bucket("events").await.unwrap();

        let first = gateway.put_object("events", b"{}".to_vec()).await.unwrap();
        let second = gateway.put_object("events", b"[]".to_vec()).await.unwrap();
        assert!(first.ends_with(".json"));
        assert_ne!(first, second);

        let mut payloads = gateway.list_object_payloads("events").await.unwrap();
        payloads.sort();
        assert_eq!(payloads, vec!["[]".to_string(), "{}".to_string()]);
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let gateway = PersistenceGateway::in_memory();
        gateway.create_metadata_record(&webhook("alpha")).await.unwrap();

        let found = gateway.get_metadata_record_by_name("alpha").await.unwrap();
        assert_eq!(found.map(|w| w.path), Some("/alpha".to_string()));
        assert!(gateway.get_metadata_record_by_name("beta").await.unwrap().is_none());

        let err = gateway.create_metadata_record(&webhook("alpha")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_duplicate_bucket_is_conflict() {
        let gateway = PersistenceGateway::in_memory();
        gateway.create_bucket("dup").await.unwrap();
        let err = gateway.create_bucket("dup").await.unwrap_err();
        assert!(matches!(err, StorageError::BucketExists(ref name) if name == "dup"));
    }
}
