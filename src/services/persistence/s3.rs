//! S3 / MinIO object store. One bucket per webhook, path-style addressing.

use std::future::Future;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::{ObjectStore, StorageError, StorageResult};
use crate::config::MinioConfig;

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

/// Object reads a single listing keeps in flight.
const MAX_CONCURRENT_GETS: usize = 16;

fn object_store_error(context: &str, err: impl std::error::Error) -> StorageError {
    StorageError::ObjectStore(format!("{context}: {}", DisplayErrorContext(err)))
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(config: &MinioConfig) -> Self {
        let scheme = if config.use_ssl { "https" } else { "http" };
        let endpoint = format!("{scheme}://{}", config.host);
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "static",
        );

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&endpoint)
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        info!(endpoint = %endpoint, region = %config.region, "S3 client configured");
        Self::new(Client::from_conf(s3_config))
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let missing = matches!(err.as_service_error(), Some(e) if e.is_not_found())
                    || err
                        .raw_response()
                        .is_some_and(|response| response.status().as_u16() == 404);
                if missing {
                    Ok(false)
                } else {
                    Err(object_store_error("head bucket", err))
                }
            }
        }
    }

    async fn get_payload(&self, bucket: &str, key: &str) -> StorageResult<String> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| object_store_error("get object", e))?;
        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| object_store_error("read object body", e))?
            .into_bytes();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.bucket_exists(bucket).await? {
            return Err(StorageError::BucketExists(bucket.to_string()));
        }

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let taken = err.as_service_error().is_some_and(|e| {
                    e.is_bucket_already_exists() || e.is_bucket_already_owned_by_you()
                });
                if taken {
                    Err(StorageError::BucketExists(bucket.to_string()))
                } else {
                    Err(object_store_error("create bucket", err))
                }
            }
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, payload: Vec<u8>) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(|e| object_store_error("put object", e))?;
        Ok(())
    }

    async fn list_object_payloads(&self, bucket: &str) -> StorageResult<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| object_store_error("list objects", e))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }
        debug!(bucket = %bucket, objects = keys.len(), "Listed bucket");

        fetch_in_order(keys, |key| async move { self.get_payload(bucket, &key).await }).await
    }
}

/// Fetches every key with at most [`MAX_CONCURRENT_GETS`] reads outstanding.
/// Results keep the order of `keys`; the first failure ends the listing.
async fn fetch_in_order<F, Fut>(keys: Vec<String>, fetch: F) -> StorageResult<Vec<String>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = StorageResult<String>>,
{
    stream::iter(keys)
        .map(fetch)
        .buffered(MAX_CONCURRENT_GETS)
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fetches_are_bounded_and_ordered() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let keys: Vec<String> = (0..100).map(|i| format!("key-{i}")).collect();

        let fetched = fetch_in_order(keys.clone(), |key| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(key)
            }
        })
        .await
        .unwrap();

        assert_eq!(fetched, keys);
        assert!(peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_GETS);
    }

    #[tokio::test]
    async fn test_first_failure_ends_listing() {
        let keys: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        let err = fetch_in_order(keys, |key| async move {
            if key == "7" {
                Err(StorageError::ObjectStore("gone".into()))
            } else {
                Ok(key)
            }
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("gone"));
    }
}
