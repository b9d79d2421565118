use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, info};

use crate::config::S3Defaults;
use crate::models::bucket::BucketConfigRow;
use crate::storage::{ObjectInfo, ObjectStore, StorageError};

/// Resolved connection settings for one bucket.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl S3Settings {
    /// Fields missing from the tenant's configuration fall back to the service defaults.
    pub fn from_bucket_config(config: &BucketConfigRow, defaults: &S3Defaults) -> Self {
        Self {
            bucket: config.bucket_name.clone(),
            endpoint: non_empty(config.endpoint.as_deref()).or_else(|| defaults.endpoint.clone()),
            region: non_empty(config.region.as_deref()).unwrap_or_else(|| defaults.region.clone()),
            access_key: non_empty(config.access_key.as_deref())
                .or_else(|| defaults.access_key.clone()),
            secret_key: non_empty(config.secret_key.as_deref())
                .or_else(|| defaults.secret_key.clone()),
            path_style: config.path_style_access,
        }
    }

    pub fn from_defaults(defaults: &S3Defaults) -> Self {
        Self {
            bucket: defaults.bucket.clone(),
            endpoint: defaults.endpoint.clone(),
            region: defaults.region.clone(),
            access_key: defaults.access_key.clone(),
            secret_key: defaults.secret_key.clone(),
            path_style: defaults.path_style_access,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

pub struct S3Store {
    client: Client,
    bucket: String,
    region: String,
}

impl S3Store {
    /// Constructs a client for S3 or an S3-compatible endpoint (MinIO locally).
    /// Without static credentials the ambient AWS provider chain is used.
    pub async fn connect(settings: S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "docloader-bucket-config",
            ));
        }
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: settings.bucket,
            region: settings.region,
        }
    }
}

fn s3_error<E>(err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::S3(DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type.map(String::from))
            .send()
            .await
            .map_err(s3_error)?;
        debug!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(StorageError::NotFound(self.location(key)));
                }
                return Err(s3_error(service_error));
            }
        };
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(s3_error)?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                // "Folder" placeholder objects carry no content.
                if key.ends_with('/') {
                    continue;
                }
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0),
                });
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(objects)
    }

    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!("Created bucket {}", self.bucket);
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_bucket_already_owned_by_you() {
                    Ok(())
                } else {
                    Err(s3_error(service_error))
                }
            }
        }
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn defaults() -> S3Defaults {
        S3Defaults {
            bucket: "docloader-documents".into(),
            endpoint: Some("http://minio:9000".into()),
            region: "us-east-1".into(),
            access_key: Some("minio".into()),
            secret_key: Some("minio-secret".into()),
            path_style_access: true,
        }
    }

    fn row(endpoint: Option<&str>, access_key: Option<&str>) -> BucketConfigRow {
        let now = Utc::now();
        BucketConfigRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Archive".into(),
            bucket_name: "acme-archive".into(),
            is_default: false,
            endpoint: endpoint.map(String::from),
            region: Some("  ".into()),
            access_key: access_key.map(String::from),
            secret_key: None,
            path_style_access: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_settings_fall_back_to_defaults() {
        let settings = S3Settings::from_bucket_config(&row(None, None), &defaults());
        assert_eq!(settings.bucket, "acme-archive");
        assert_eq!(settings.endpoint.as_deref(), Some("http://minio:9000"));
        assert_eq!(settings.region, "us-east-1");
        assert_eq!(settings.access_key.as_deref(), Some("minio"));
        assert!(!settings.path_style);
    }

    #[test]
    fn test_settings_prefer_tenant_values() {
        let settings = S3Settings::from_bucket_config(
            &row(Some("https://s3.eu-central-1.amazonaws.com"), Some("AKIATENANT")),
            &defaults(),
        );
        assert_eq!(
            settings.endpoint.as_deref(),
            Some("https://s3.eu-central-1.amazonaws.com")
        );
        assert_eq!(settings.access_key.as_deref(), Some("AKIATENANT"));
        // Secret falls back independently of the access key.
        assert_eq!(settings.secret_key.as_deref(), Some("minio-secret"));
    }
}
