//! Object-storage capability for the pipelines.
//!
//! Pipelines see blob storage as a small trait: list a prefix, fetch and
//! store bytes, delete, archive. The production implementation wraps the
//! AWS S3 client; tests substitute an in-memory store.

use crate::config::BlobConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors crossing the storage boundary; all of them are transport
/// failures and fatal for the current run
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("failed to list objects under '{0}': {1}")]
    List(String, String),

    #[error("failed to fetch object '{0}': {1}")]
    Get(String, String),

    #[error("failed to store object '{0}': {1}")]
    Put(String, String),

    #[error("failed to delete object '{0}': {1}")]
    Delete(String, String),

    #[error("failed to copy object '{0}' to '{1}': {2}")]
    Copy(String, String, String),
}

/// A listed object
#[derive(Debug, Clone)]
pub struct ObjectRef {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object-storage capability
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List objects under a prefix, in storage-listing order
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRef>, BlobError>;

    /// Fetch an object's bytes
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Store bytes under a key
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), BlobError>;

    /// Delete an object
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Copy an object to a new key, then delete the original
    async fn archive(&self, key: &str, dest_key: &str) -> Result<(), BlobError>;
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &BlobConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRef>, BlobError> {
        let mut refs = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| BlobError::List(prefix.to_string(), e.to_string()))?;
            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                let last_modified = obj.last_modified().and_then(|ts| {
                    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
                });
                refs.push(ObjectRef {
                    key: key.to_string(),
                    last_modified,
                });
            }
        }

        debug!(prefix = %prefix, count = refs.len(), "Listed objects");
        Ok(refs)
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::Get(key.to_string(), e.to_string()))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| BlobError::Get(key.to_string(), e.to_string()))?;

        Ok(bytes.into_bytes().to_vec())
    }

    #[instrument(skip(self, body))]
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| BlobError::Put(key.to_string(), e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::Delete(key.to_string(), e.to_string()))?;

        debug!(key = %key, "Object deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn archive(&self, key: &str, dest_key: &str) -> Result<(), BlobError> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, key))
            .key(dest_key)
            .send()
            .await
            .map_err(|e| {
                BlobError::Copy(key.to_string(), dest_key.to_string(), e.to_string())
            })?;

        self.delete(key).await
    }
}
