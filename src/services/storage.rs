use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::Path;

use crate::config::AppConfig;

/// Object store holding source images and transform results.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download the object at `key` into `local_path`.
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Upload the file at `local_path` under `key`.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError>;

    /// Keys under `prefix`, in listing order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Client for S3-compatible object storage.
pub struct S3BlobStore {
    bucket: Box<Bucket>,
}

impl S3BlobStore {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key: Option<&str>,
        secret_key: Option<&str>,
        path_style: bool,
    ) -> Result<Self, StorageError> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.to_string(),
                endpoint: endpoint.to_string(),
            },
            None => region
                .parse::<Region>()
                .map_err(|e| StorageError::Config(e.to_string()))?,
        };

        let credentials = Credentials::new(access_key, secret_key, None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        let bucket = if path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self { bucket })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, StorageError> {
        Self::new(
            &config.bucket_name,
            &config.s3_region,
            config.s3_endpoint.as_deref(),
            config.s3_access_key.as_deref(),
            config.s3_secret_key.as_deref(),
            config.s3_path_style,
        )
    }

    fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
        match status {
            200..=299 => Ok(()),
            404 => Err(StorageError::NotFound(key.to_string())),
            _ => Err(StorageError::Status {
                key: key.to_string(),
                status,
            }),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let response = self.bucket.get_object(key).await?;
        Self::check_status(key, response.status_code())?;
        tokio::fs::write(local_path, response.bytes()).await?;
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let data = tokio::fs::read(local_path).await?;
        let response = self
            .bucket
            .put_object_with_content_type(key, &data, "image/png")
            .await?;
        Self::check_status(key, response.status_code())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let pages = self.bucket.list(prefix.to_string(), None).await?;
        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents.into_iter().map(|object| object.key))
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("S3 returned status {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
