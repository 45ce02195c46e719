//! Ephemeral manifest descriptors.
//!
//! A manifest enumerates the object URLs of one job for the bulk-load
//! command. It is published to a well-known S3 location keyed by job
//! sequence before the load and removed after the attempt, success or
//! failure — never persisted as a model entity.

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::info;

use strload_core::config::AwsConfig;

use crate::error::LoaderError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    pub mandatory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// One mandatory entry per object URL, preserving order.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: urls
                .into_iter()
                .map(|url| ManifestEntry {
                    url: url.into(),
                    mandatory: true,
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, LoaderError> {
        serde_json::to_string_pretty(self).map_err(|e| LoaderError::Manifest(e.to_string()))
    }

    pub fn parse(json: &str) -> Result<Self, LoaderError> {
        serde_json::from_str(json).map_err(|e| LoaderError::Manifest(e.to_string()))
    }
}

/// S3-backed manifest location, keyed by job sequence.
pub struct ManifestStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl ManifestStore {
    pub fn new(aws: &AwsConfig) -> Result<Self, LoaderError> {
        let bucket = aws
            .manifest_bucket
            .as_deref()
            .ok_or_else(|| LoaderError::Manifest("MANIFEST_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new().with_region(&aws.region);

        if let Some(ref key) = aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = aws.session_token {
            builder = builder.with_token(token);
        }

        if let Some(ref endpoint) = aws.endpoint_url {
            if !endpoint.is_empty() {
                // object_store requires absolute endpoint URLs
                let endpoint_url =
                    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                        endpoint.clone()
                    } else {
                        format!("https://{}", endpoint)
                    };
                builder = builder
                    .with_bucket_name(bucket)
                    .with_endpoint(&endpoint_url)
                    .with_allow_http(endpoint_url.starts_with("http://"));
            }
        } else {
            builder = builder.with_url(&format!("s3://{}", bucket));
        }

        let store = builder
            .build()
            .map_err(|e| LoaderError::Manifest(e.to_string()))?;

        let prefix = aws
            .manifest_prefix
            .as_deref()
            .unwrap_or("")
            .trim_matches('/')
            .to_string();

        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
            prefix,
        })
    }

    fn key(&self, job_seq: i64) -> String {
        if self.prefix.is_empty() {
            format!("manifest-{}.json", job_seq)
        } else {
            format!("{}/manifest-{}.json", self.prefix, job_seq)
        }
    }

    /// Full S3 URL as referenced by the bulk-load command.
    pub fn url(&self, job_seq: i64) -> String {
        format!("s3://{}/{}", self.bucket, self.key(job_seq))
    }

    pub async fn put(&self, job_seq: i64, manifest: &Manifest) -> Result<(), LoaderError> {
        let key = self.key(job_seq);
        info!(url = %self.url(job_seq), "s3: put manifest");

        let body = manifest.to_json()?;
        let path = object_store::path::Path::from(key.as_str());
        self.store
            .put(&path, bytes::Bytes::from(body).into())
            .await
            .map_err(|e| LoaderError::Manifest(e.to_string()))?;

        Ok(())
    }

    pub async fn delete(&self, job_seq: i64) -> Result<(), LoaderError> {
        let key = self.key(job_seq);
        info!(url = %self.url(job_seq), "s3: delete manifest");

        let path = object_store::path::Path::from(key.as_str());
        self.store
            .delete(&path)
            .await
            .map_err(|e| LoaderError::Manifest(e.to_string()))?;

        Ok(())
    }
}
