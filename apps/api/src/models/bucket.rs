use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct BucketConfigRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub bucket_name: String,
    pub is_default: bool,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style_access: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bucket configuration as returned to clients. The secret key is reduced to a flag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfigResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub bucket_name: String,
    pub is_default: bool,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub has_secret_key: bool,
    pub path_style_access: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&BucketConfigRow> for BucketConfigResponse {
    fn from(c: &BucketConfigRow) -> Self {
        Self {
            id: c.id,
            tenant_id: c.tenant_id,
            name: c.name.clone(),
            bucket_name: c.bucket_name.clone(),
            is_default: c.is_default,
            endpoint: c.endpoint.clone(),
            region: c.region.clone(),
            access_key: c.access_key.clone(),
            has_secret_key: c.secret_key.as_deref().is_some_and(|s| !s.is_empty()),
            path_style_access: c.path_style_access,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_never_serializes_secret() {
        let now = Utc::now();
        let row = BucketConfigRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Default".into(),
            bucket_name: "acme-docloader-documents".into(),
            is_default: true,
            endpoint: None,
            region: Some("us-east-1".into()),
            access_key: Some("AKIA123".into()),
            secret_key: Some("super-secret".into()),
            path_style_access: false,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&BucketConfigResponse::from(&row)).unwrap();
        assert!(!json.contains("super-secret"));
        assert!(json.contains("\"hasSecretKey\":true"));
        assert!(json.contains("\"bucketName\":\"acme-docloader-documents\""));
    }
}
