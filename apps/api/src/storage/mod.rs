//! Object storage used for uploaded documents and S3 job sources.
//!
//! Every bucket configuration gets its own `S3Store`; uploads go to either the
//! filesystem or the service default bucket depending on `STORAGE_TYPE`.

pub mod fs;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::{Config, S3Defaults, StorageKind};
use crate::models::bucket::BucketConfigRow;

pub use fs::FsStore;
pub use s3::{S3Settings, S3Store};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),
}

/// A listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>)
        -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Lists every object under `prefix`, following pagination.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    /// Creates the backing bucket or directory if it is missing.
    async fn ensure_bucket(&self) -> Result<(), StorageError>;

    /// Stable location string for `key`, stored as a document's `file_path`.
    fn location(&self, key: &str) -> String;
}

/// Builds stores for bucket configurations and for the upload area.
#[derive(Debug, Clone)]
pub struct StoreFactory {
    defaults: S3Defaults,
}

impl StoreFactory {
    pub fn new(defaults: S3Defaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &S3Defaults {
        &self.defaults
    }

    pub async fn for_bucket(&self, config: &BucketConfigRow) -> Arc<dyn ObjectStore> {
        Arc::new(S3Store::connect(S3Settings::from_bucket_config(config, &self.defaults)).await)
    }

    /// The store that receives direct uploads.
    pub async fn uploads(&self, config: &Config) -> Arc<dyn ObjectStore> {
        match config.storage {
            StorageKind::Filesystem => Arc::new(FsStore::new(&config.uploads_dir)),
            StorageKind::S3 => {
                Arc::new(S3Store::connect(S3Settings::from_defaults(&self.defaults)).await)
            }
        }
    }
}

/// Turns a user-entered source path into an S3 list prefix.
/// `"/"`, `""` and `"/reports/2024"` become `""`, `""` and `"reports/2024/"`.
pub fn normalize_prefix(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Public URL of an object for the given bucket settings.
pub fn object_url(settings: &S3Settings, key: &str) -> String {
    let key = key.trim_start_matches('/');
    match settings.endpoint.as_deref() {
        Some(endpoint) if settings.path_style => {
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), settings.bucket, key)
        }
        Some(endpoint) => {
            let (scheme, host) = endpoint
                .split_once("://")
                .unwrap_or(("https", endpoint));
            format!(
                "{scheme}://{}.{}/{key}",
                settings.bucket,
                host.trim_end_matches('/')
            )
        }
        None => format!(
            "https://{}.s3.{}.amazonaws.com/{key}",
            settings.bucket, settings.region
        ),
    }
}
