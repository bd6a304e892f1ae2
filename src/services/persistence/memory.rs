//! In-memory stores used with `STORAGE_BACKEND=memory` and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{MetadataStore, ObjectStore, StorageError, StorageResult};
use crate::models::Webhook;

/// Keeps insertion order so listings are stable.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<Vec<Webhook>>,
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, webhook: &Webhook) -> StorageResult<()> {
        let mut records = self.records.write().await;
        if records.iter().any(|w| w.name == webhook.name) {
            return Err(StorageError::Conflict(webhook.name.clone()));
        }
        let mut record = webhook.clone();
        record.created_at.get_or_insert_with(Utc::now);
        records.push(record);
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<Webhook>> {
        Ok(self.records.read().await.clone())
    }

    async fn find_by_name(&self, name: &str) -> StorageResult<Option<Webhook>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|w| w.name == name)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub async fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains_key(bucket)
    }

    pub async fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Err(StorageError::BucketExists(bucket.to_string()));
        }
        buckets.insert(bucket.to_string(), HashMap::new());
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, payload: Vec<u8>) -> StorageResult<()> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::ObjectStore(format!("bucket {bucket:?} does not exist")))?;
        objects.insert(key.to_string(), payload);
        Ok(())
    }

    async fn list_object_payloads(&self, bucket: &str) -> StorageResult<Vec<String>> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::ObjectStore(format!("bucket {bucket:?} does not exist")))?;
        Ok(objects
            .values()
            .map(|body| String::from_utf8_lossy(body).into_owned())
            .collect())
    }
}
