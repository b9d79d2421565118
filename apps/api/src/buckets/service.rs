use serde::Deserialize;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::S3Defaults;
use crate::errors::AppError;
use crate::models::bucket::BucketConfigRow;
use crate::storage::StoreFactory;
use crate::validation::{blank_to_none, max_len, require_len};

/// Create and update payload. On update, absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfigRequest {
    pub name: Option<String>,
    pub bucket_name: Option<String>,
    pub is_default: Option<bool>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style_access: Option<bool>,
}

/// A fully-resolved configuration ready to insert.
#[derive(Debug, Clone)]
pub struct NewBucketConfig {
    pub name: String,
    pub bucket_name: String,
    pub is_default: bool,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style_access: bool,
}

impl NewBucketConfig {
    /// Fills unspecified connection fields from the service defaults.
    pub fn with_defaults(
        name: String,
        bucket_name: String,
        req: &BucketConfigRequest,
        defaults: &S3Defaults,
    ) -> Self {
        Self {
            name,
            bucket_name,
            is_default: req.is_default.unwrap_or(false),
            endpoint: blank_to_none(req.endpoint.clone()).or_else(|| defaults.endpoint.clone()),
            region: blank_to_none(req.region.clone()).or_else(|| Some(defaults.region.clone())),
            access_key: blank_to_none(req.access_key.clone())
                .or_else(|| defaults.access_key.clone()),
            secret_key: blank_to_none(req.secret_key.clone())
                .or_else(|| defaults.secret_key.clone()),
            path_style_access: req.path_style_access.unwrap_or(defaults.path_style_access),
        }
    }
}

/// S3 bucket naming: lowercase letters, digits, `-` and `.`, starting and
/// ending with a letter or digit.
pub fn validate_bucket_name(bucket_name: &str) -> Result<(), AppError> {
    require_len("Bucket name", bucket_name, 3, 63)?;
    let valid_chars = bucket_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_edges = bucket_name
        .chars()
        .next()
        .zip(bucket_name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    if !valid_chars || !valid_edges {
        return Err(AppError::Validation(format!(
            "Bucket name '{bucket_name}' is not a valid S3 bucket name"
        )));
    }
    Ok(())
}

pub fn validate_connection_fields(req: &BucketConfigRequest) -> Result<(), AppError> {
    max_len("Endpoint", req.endpoint.as_deref(), 255)?;
    max_len("Region", req.region.as_deref(), 50)?;
    max_len("Access key", req.access_key.as_deref(), 255)?;
    max_len("Secret key", req.secret_key.as_deref(), 255)?;
    Ok(())
}

pub async fn insert_config<'e, E>(
    executor: E,
    tenant_id: Uuid,
    new: &NewBucketConfig,
) -> Result<BucketConfigRow, AppError>
where
    E: PgExecutor<'e>,
{
    Ok(sqlx::query_as(
        r#"
        INSERT INTO s3_bucket_configs
            (id, tenant_id, name, bucket_name, is_default, endpoint, region,
             access_key, secret_key, path_style_access)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind(new.name.trim())
    .bind(new.bucket_name.trim())
    .bind(new.is_default)
    .bind(new.endpoint.as_deref())
    .bind(new.region.as_deref())
    .bind(new.access_key.as_deref())
    .bind(new.secret_key.as_deref())
    .bind(new.path_style_access)
    .fetch_one(executor)
    .await?)
}

pub async fn list(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<BucketConfigRow>, AppError> {
    Ok(sqlx::query_as(
        "SELECT * FROM s3_bucket_configs WHERE tenant_id = $1 ORDER BY is_default DESC, created_at",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?)
}

/// Every tenant's configurations, oldest first.
pub async fn list_all(pool: &PgPool) -> Result<Vec<BucketConfigRow>, AppError> {
    Ok(
        sqlx::query_as("SELECT * FROM s3_bucket_configs ORDER BY created_at")
            .fetch_all(pool)
            .await?,
    )
}

pub async fn get(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<BucketConfigRow, AppError> {
    sqlx::query_as("SELECT * FROM s3_bucket_configs WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("S3 bucket configuration {id} not found")))
}

/// The default configuration, falling back to the oldest one.
pub async fn find_default(
    pool: &PgPool,
    tenant_id: Uuid,
) -> Result<Option<BucketConfigRow>, AppError> {
    Ok(sqlx::query_as(
        r#"
        SELECT * FROM s3_bucket_configs
        WHERE tenant_id = $1
        ORDER BY is_default DESC, created_at
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?)
}

pub async fn get_default(pool: &PgPool, tenant_id: Uuid) -> Result<BucketConfigRow, AppError> {
    find_default(pool, tenant_id).await?.ok_or_else(|| {
        AppError::NotFound(format!(
            "No S3 bucket configuration found for tenant {tenant_id}"
        ))
    })
}

async fn name_taken(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    name: &str,
    except: Option<Uuid>,
) -> Result<bool, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM s3_bucket_configs
            WHERE tenant_id = $1 AND name = $2 AND ($3::uuid IS NULL OR id <> $3)
        )
        "#,
    )
    .bind(tenant_id)
    .bind(name.trim())
    .bind(except)
    .fetch_one(&mut **tx)
    .await?)
}

async fn clear_default(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE s3_bucket_configs SET is_default = FALSE, updated_at = NOW() WHERE tenant_id = $1 AND is_default",
    )
    .bind(tenant_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn create(
    pool: &PgPool,
    tenant_id: Uuid,
    req: &BucketConfigRequest,
    defaults: &S3Defaults,
) -> Result<BucketConfigRow, AppError> {
    let name = req.name.as_deref().unwrap_or_default();
    let bucket_name = req.bucket_name.as_deref().unwrap_or_default();
    require_len("Name", name, 3, 50)?;
    validate_bucket_name(bucket_name.trim())?;
    validate_connection_fields(req)?;

    let mut tx = pool.begin().await?;

    if name_taken(&mut tx, tenant_id, name, None).await? {
        return Err(AppError::Conflict(format!(
            "S3 bucket configuration with name '{}' already exists",
            name.trim()
        )));
    }

    let has_default: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM s3_bucket_configs WHERE tenant_id = $1 AND is_default)",
    )
    .bind(tenant_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut new = NewBucketConfig::with_defaults(
        name.trim().to_string(),
        bucket_name.trim().to_string(),
        req,
        defaults,
    );
    if new.is_default {
        clear_default(&mut tx, tenant_id).await?;
    } else if !has_default {
        new.is_default = true;
    }

    let config = insert_config(&mut *tx, tenant_id, &new).await?;
    tx.commit().await?;

    info!(
        "Created S3 bucket configuration '{}' ({}) for tenant {tenant_id}",
        config.name, config.bucket_name
    );
    Ok(config)
}

pub async fn update(
    pool: &PgPool,
    tenant_id: Uuid,
    id: Uuid,
    req: &BucketConfigRequest,
) -> Result<BucketConfigRow, AppError> {
    if let Some(name) = &req.name {
        require_len("Name", name, 3, 50)?;
    }
    if let Some(bucket_name) = &req.bucket_name {
        validate_bucket_name(bucket_name.trim())?;
    }
    validate_connection_fields(req)?;

    let mut tx = pool.begin().await?;

    let existing: BucketConfigRow = sqlx::query_as(
        "SELECT * FROM s3_bucket_configs WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(tenant_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("S3 bucket configuration {id} not found")))?;

    if let Some(name) = &req.name {
        if name.trim() != existing.name && name_taken(&mut tx, tenant_id, name, Some(id)).await? {
            return Err(AppError::Conflict(format!(
                "S3 bucket configuration with name '{}' already exists",
                name.trim()
            )));
        }
    }

    let is_default = match req.is_default {
        Some(false) if existing.is_default => {
            return Err(AppError::Validation(
                "The default configuration cannot be unset; make another configuration the default instead"
                    .to_string(),
            ));
        }
        Some(true) if !existing.is_default => {
            clear_default(&mut tx, tenant_id).await?;
            true
        }
        _ => existing.is_default,
    };

    let config: BucketConfigRow = sqlx::query_as(
        r#"
        UPDATE s3_bucket_configs SET
            name = COALESCE($3, name),
            bucket_name = COALESCE($4, bucket_name),
            is_default = $5,
            endpoint = COALESCE($6, endpoint),
            region = COALESCE($7, region),
            access_key = COALESCE($8, access_key),
            secret_key = COALESCE($9, secret_key),
            path_style_access = COALESCE($10, path_style_access),
            updated_at = NOW()
        WHERE id = $1 AND tenant_id = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.bucket_name.as_deref().map(str::trim))
    .bind(is_default)
    .bind(req.endpoint.as_deref())
    .bind(req.region.as_deref())
    .bind(req.access_key.as_deref())
    .bind(req.secret_key.as_deref())
    .bind(req.path_style_access)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    info!("Updated S3 bucket configuration {id} for tenant {tenant_id}");
    Ok(config)
}

/// Deletes a configuration. The last one of a tenant is kept; deleting the
/// default promotes the oldest remaining configuration.
pub async fn delete(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let existing: BucketConfigRow = sqlx::query_as(
        "SELECT * FROM s3_bucket_configs WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(tenant_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("S3 bucket configuration {id} not found")))?;

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM s3_bucket_configs WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&mut *tx)
            .await?;
    if count <= 1 {
        return Err(AppError::Validation(
            "Cannot delete the only S3 bucket configuration of a tenant".to_string(),
        ));
    }

    sqlx::query("DELETE FROM s3_bucket_configs WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if existing.is_default {
        sqlx::query(
            r#"
            UPDATE s3_bucket_configs SET is_default = TRUE, updated_at = NOW()
            WHERE id = (
                SELECT id FROM s3_bucket_configs
                WHERE tenant_id = $1
                ORDER BY created_at
                LIMIT 1
            )
            "#,
        )
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(
        "Deleted S3 bucket configuration '{}' for tenant {tenant_id}",
        existing.name
    );
    Ok(())
}

/// Creates the bucket in object storage in the background. Failures are only logged.
pub fn provision_bucket(stores: &StoreFactory, config: &BucketConfigRow) {
    let stores = stores.clone();
    let config = config.clone();
    tokio::spawn(async move {
        let store = stores.for_bucket(&config).await;
        match store.ensure_bucket().await {
            Ok(()) => info!("Bucket '{}' is ready", config.bucket_name),
            Err(e) => warn!(
                "Could not create bucket '{}' for configuration {}: {e}",
                config.bucket_name, config.id
            ),
        }
    });
}

/// Starts provisioning for every configured bucket and returns how many were found.
pub async fn provision_all(pool: &PgPool, stores: &StoreFactory) -> Result<usize, AppError> {
    let configs = list_all(pool).await?;
    for config in &configs {
        provision_bucket(stores, config);
    }
    Ok(configs.len())
}
