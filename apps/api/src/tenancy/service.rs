use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::auth::password::{hash_password, validate_password};
use crate::buckets::service::{
    insert_config, validate_bucket_name, validate_connection_fields, BucketConfigRequest,
    NewBucketConfig,
};
use crate::config::S3Defaults;
use crate::errors::AppError;
use crate::models::bucket::BucketConfigRow;
use crate::models::tenant::TenantRow;
use crate::models::user::{Role, UserRow};
use crate::tenancy::{db_name_for, validate_subdomain};
use crate::users::service::{insert_user, NewUser};
use crate::validation::{blank_to_none, max_len, require_len, validate_email};

/// Tenant registration: organisation, first administrator and optional S3 settings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRequest {
    pub name: String,
    pub subdomain: String,
    pub admin_username: String,
    pub admin_password: String,
    pub admin_email: String,
    pub s3_endpoint: Option<String>,
    pub s3_region: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_bucket_name: Option<String>,
    pub s3_path_style_access: Option<bool>,
}

impl TenantRequest {
    fn bucket_request(&self) -> BucketConfigRequest {
        BucketConfigRequest {
            name: None,
            bucket_name: blank_to_none(self.s3_bucket_name.clone()),
            is_default: Some(true),
            endpoint: self.s3_endpoint.clone(),
            region: self.s3_region.clone(),
            access_key: self.s3_access_key.clone(),
            secret_key: self.s3_secret_key.clone(),
            path_style_access: self.s3_path_style_access,
        }
    }
}

/// Rename payload. Subdomain and database name never change; S3 fields
/// patch the default bucket configuration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantUpdateRequest {
    pub name: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_region: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_bucket_name: Option<String>,
    pub s3_path_style_access: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct TenantValidationRequest {
    pub name: String,
    pub subdomain: String,
}

pub struct CreatedTenant {
    pub tenant: TenantRow,
    pub admin: UserRow,
    pub bucket: BucketConfigRow,
}

pub fn validate_tenant_fields(name: &str, subdomain: &str) -> Result<(), AppError> {
    require_len("Tenant name", name, 3, 100)?;
    validate_subdomain(subdomain.trim())
}

pub fn validate_tenant_request(req: &TenantRequest) -> Result<(), AppError> {
    validate_tenant_fields(&req.name, &req.subdomain)?;
    require_len("Admin username", &req.admin_username, 3, 50)?;
    validate_password(&req.admin_password)?;
    validate_email(&req.admin_email)?;
    max_len("S3 bucket name", req.s3_bucket_name.as_deref(), 255)?;
    validate_connection_fields(&req.bucket_request())
}

const MAX_BUCKET_NAME: usize = 63;
const BUCKET_SUFFIX_HEX: usize = 8;

/// Default bucket name for a new tenant: `<subdomain>-<service default bucket>`.
/// Names over the S3 limit are cut and end in a short hash of the full name,
/// so distinct subdomains keep distinct buckets.
pub fn default_bucket_name(subdomain: &str, defaults: &S3Defaults) -> String {
    let full: String = format!("{subdomain}-{}", defaults.bucket)
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    if full.len() <= MAX_BUCKET_NAME {
        return full.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_string();
    }

    let digest = hex::encode(Sha256::digest(full.as_bytes()));
    let head = full[..MAX_BUCKET_NAME - BUCKET_SUFFIX_HEX - 1]
        .trim_matches(|c: char| !c.is_ascii_alphanumeric());
    format!("{head}-{}", &digest[..BUCKET_SUFFIX_HEX])
}

pub async fn subdomain_taken(pool: &PgPool, subdomain: &str) -> Result<bool, AppError> {
    Ok(
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tenants WHERE subdomain = $1)")
            .bind(subdomain.trim())
            .fetch_one(pool)
            .await?,
    )
}

/// Creates the tenant, its default bucket configuration and its `ADMIN` user atomically.
pub async fn create_tenant(
    pool: &PgPool,
    req: &TenantRequest,
    defaults: &S3Defaults,
) -> Result<CreatedTenant, AppError> {
    validate_tenant_request(req)?;
    let subdomain = req.subdomain.trim();

    if subdomain_taken(pool, subdomain).await? {
        return Err(AppError::Conflict(format!(
            "Subdomain '{subdomain}' is already taken"
        )));
    }

    let bucket_req = req.bucket_request();
    let bucket_name = match &bucket_req.bucket_name {
        Some(name) => {
            validate_bucket_name(name)?;
            name.clone()
        }
        None => default_bucket_name(subdomain, defaults),
    };

    let password_hash = hash_password(&req.admin_password).await?;

    let mut tx = pool.begin().await?;

    let tenant: TenantRow = sqlx::query_as(
        r#"
        INSERT INTO tenants (id, name, subdomain, db_name)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.name.trim())
    .bind(subdomain)
    .bind(db_name_for(subdomain))
    .fetch_one(&mut *tx)
    .await?;

    let new_bucket =
        NewBucketConfig::with_defaults("Default".to_string(), bucket_name, &bucket_req, defaults);
    let bucket = insert_config(&mut *tx, tenant.id, &new_bucket).await?;

    let admin = insert_user(
        &mut *tx,
        &NewUser {
            tenant_id: tenant.id,
            username: &req.admin_username,
            email: &req.admin_email,
            password_hash: &password_hash,
            role: Role::Admin,
        },
    )
    .await?;

    tx.commit().await?;

    info!(
        "Registered tenant '{}' ({}) with admin {}",
        tenant.name, tenant.subdomain, admin.username
    );
    Ok(CreatedTenant {
        tenant,
        admin,
        bucket,
    })
}

pub async fn list(pool: &PgPool) -> Result<Vec<TenantRow>, AppError> {
    Ok(sqlx::query_as("SELECT * FROM tenants ORDER BY name")
        .fetch_all(pool)
        .await?)
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<TenantRow, AppError> {
    sqlx::query_as("SELECT * FROM tenants WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Tenant {id} not found")))
}

pub async fn find_by_subdomain(
    pool: &PgPool,
    subdomain: &str,
) -> Result<Option<TenantRow>, AppError> {
    Ok(sqlx::query_as("SELECT * FROM tenants WHERE subdomain = $1")
        .bind(subdomain.trim().to_ascii_lowercase())
        .fetch_optional(pool)
        .await?)
}

/// Looks a tenant up by id or by subdomain, whichever `key` is.
pub async fn find_by_key(pool: &PgPool, key: &str) -> Result<Option<TenantRow>, AppError> {
    match Uuid::parse_str(key.trim()) {
        Ok(id) => Ok(sqlx::query_as("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?),
        Err(_) => find_by_subdomain(pool, key).await,
    }
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    req: &TenantUpdateRequest,
) -> Result<TenantRow, AppError> {
    if let Some(name) = &req.name {
        require_len("Tenant name", name, 3, 100)?;
    }
    let bucket_patch = BucketConfigRequest {
        name: None,
        bucket_name: blank_to_none(req.s3_bucket_name.clone()),
        is_default: None,
        endpoint: req.s3_endpoint.clone(),
        region: req.s3_region.clone(),
        access_key: req.s3_access_key.clone(),
        secret_key: req.s3_secret_key.clone(),
        path_style_access: req.s3_path_style_access,
    };
    if let Some(bucket_name) = &bucket_patch.bucket_name {
        validate_bucket_name(bucket_name)?;
    }
    validate_connection_fields(&bucket_patch)?;

    let mut tx = pool.begin().await?;

    let tenant: TenantRow = sqlx::query_as(
        r#"
        UPDATE tenants SET name = COALESCE($2, name), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Tenant {id} not found")))?;

    let touches_bucket = bucket_patch.bucket_name.is_some()
        || bucket_patch.endpoint.is_some()
        || bucket_patch.region.is_some()
        || bucket_patch.access_key.is_some()
        || bucket_patch.secret_key.is_some()
        || bucket_patch.path_style_access.is_some();
    if touches_bucket {
        sqlx::query(
            r#"
            UPDATE s3_bucket_configs SET
                bucket_name = COALESCE($2, bucket_name),
                endpoint = COALESCE($3, endpoint),
                region = COALESCE($4, region),
                access_key = COALESCE($5, access_key),
                secret_key = COALESCE($6, secret_key),
                path_style_access = COALESCE($7, path_style_access),
                updated_at = NOW()
            WHERE tenant_id = $1 AND is_default
            "#,
        )
        .bind(id)
        .bind(bucket_patch.bucket_name.as_deref())
        .bind(bucket_patch.endpoint.as_deref())
        .bind(bucket_patch.region.as_deref())
        .bind(bucket_patch.access_key.as_deref())
        .bind(bucket_patch.secret_key.as_deref())
        .bind(bucket_patch.path_style_access)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!("Updated tenant {} ({})", tenant.name, tenant.subdomain);
    Ok(tenant)
}

/// Deletes a tenant and, through cascades, everything it owns.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Tenant {id} not found")));
    }
    info!("Deleted tenant {id}");
    Ok(())
}

/// The tenant that owns the bootstrap system administrator.
pub const SYSTEM_TENANT_SUBDOMAIN: &str = "system";

/// Creates the system tenant and administrator on first start. Idempotent.
pub async fn ensure_system_admin(
    pool: &PgPool,
    username: &str,
    email: &str,
    password: &str,
) -> Result<(), AppError> {
    let tenant: TenantRow = sqlx::query_as(
        r#"
        INSERT INTO tenants (id, name, subdomain, db_name)
        VALUES ($1, 'System', $2, $3)
        ON CONFLICT (subdomain) DO UPDATE SET subdomain = EXCLUDED.subdomain
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(SYSTEM_TENANT_SUBDOMAIN)
    .bind(db_name_for(SYSTEM_TENANT_SUBDOMAIN))
    .fetch_one(pool)
    .await?;

    if crate::users::service::find_in_tenant(pool, tenant.id, username)
        .await?
        .is_some()
    {
        return Ok(());
    }

    validate_password(password)?;
    let password_hash = hash_password(password).await?;
    insert_user(
        pool,
        &NewUser {
            tenant_id: tenant.id,
            username,
            email,
            password_hash: &password_hash,
            role: Role::SystemAdmin,
        },
    )
    .await?;
    info!("Bootstrapped system administrator '{username}'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TenantRequest {
        TenantRequest {
            name: "Acme Corp".into(),
            subdomain: "acme".into(),
            admin_username: "acme-admin".into(),
            admin_password: "s3cret!".into(),
            admin_email: "admin@acme.test".into(),
            s3_endpoint: None,
            s3_region: None,
            s3_access_key: None,
            s3_secret_key: None,
            s3_bucket_name: None,
            s3_path_style_access: None,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate_tenant_request(&request()).is_ok());
    }

    #[test]
    fn test_invalid_fields_are_rejected() {
        let mut req = request();
        req.name = "AC".into();
        assert!(validate_tenant_request(&req).is_err());

        let mut req = request();
        req.subdomain = "Acme Corp".into();
        assert!(validate_tenant_request(&req).is_err());

        let mut req = request();
        req.admin_password = "123".into();
        assert!(validate_tenant_request(&req).is_err());

        let mut req = request();
        req.admin_email = "not-an-email".into();
        assert!(validate_tenant_request(&req).is_err());
    }

    #[test]
    fn test_default_bucket_name_is_prefixed_with_subdomain() {
        let defaults = S3Defaults {
            bucket: "docloader-documents".into(),
            endpoint: None,
            region: "us-east-1".into(),
            access_key: None,
            secret_key: None,
            path_style_access: false,
        };
        assert_eq!(
            default_bucket_name("acme", &defaults),
            "acme-docloader-documents"
        );
    }

    #[test]
    fn test_default_bucket_name_fits_s3_limit_for_long_subdomains() {
        let defaults = S3Defaults {
            bucket: "docloader-documents".into(),
            endpoint: None,
            region: "us-east-1".into(),
            access_key: None,
            secret_key: None,
            path_style_access: false,
        };
        let long = "a".repeat(50);
        assert!(validate_subdomain(&long).is_ok());

        let name = default_bucket_name(&long, &defaults);
        assert!(name.len() <= 63, "{name} is {} chars", name.len());
        assert!(validate_bucket_name(&name).is_ok());

        let other = default_bucket_name(&format!("{}b", "a".repeat(49)), &defaults);
        assert_ne!(name, other);
        // Deterministic, so a retried registration picks the same bucket.
        assert_eq!(name, default_bucket_name(&long, &defaults));
    }

    #[test]
    fn test_long_subdomain_request_passes_validation() {
        let mut req = request();
        req.subdomain = "x".repeat(50);
        assert!(validate_tenant_request(&req).is_ok());
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let req: TenantRequest = serde_json::from_str(
            r#"{"name":"Acme Corp","subdomain":"acme","adminUsername":"root",
                "adminPassword":"secret1","adminEmail":"a@acme.test",
                "s3BucketName":"acme-files","s3PathStyleAccess":true}"#,
        )
        .unwrap();
        assert_eq!(req.admin_username, "root");
        assert_eq!(req.s3_bucket_name.as_deref(), Some("acme-files"));
        assert_eq!(req.bucket_request().path_style_access, Some(true));
    }
}
