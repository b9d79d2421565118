use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::bucket::BucketConfigRow;
use crate::models::document::{DocumentRow, DocumentStatus};
use crate::storage::{ObjectStore, StoreFactory};

pub struct NewDocument<'a> {
    pub tenant_id: Uuid,
    pub job_id: Option<Uuid>,
    pub uploaded_by: Option<Uuid>,
    pub filename: &'a str,
    pub file_path: &'a str,
    pub file_size: i64,
    pub content_type: Option<&'a str>,
    pub content_hash: &'a str,
    pub status: DocumentStatus,
}

/// Reduces a client-supplied name to its last path component.
pub fn sanitize_filename(raw: &str) -> Result<String, AppError> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name.contains("..") {
        return Err(AppError::Validation(format!("Invalid filename '{raw}'")));
    }
    Ok(name.to_string())
}

/// Hex-encoded SHA-256 of the content.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Storage key for a direct upload: `uploads/<tenant>/<user>/<uuid>_<filename>`.
pub fn upload_key(tenant_id: Uuid, user_id: Uuid, filename: &str) -> String {
    format!("uploads/{tenant_id}/{user_id}/{}_{filename}", Uuid::new_v4())
}

/// Splits `s3://bucket/key` into its parts.
pub fn parse_s3_location(location: &str) -> Option<(&str, &str)> {
    let rest = location.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

pub async fn insert_document<'e, E>(
    executor: E,
    new: &NewDocument<'_>,
) -> Result<DocumentRow, AppError>
where
    E: PgExecutor<'e>,
{
    Ok(sqlx::query_as(
        r#"
        INSERT INTO documents
            (id, tenant_id, job_id, uploaded_by, filename, file_path, file_size,
             content_type, content_hash, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.tenant_id)
    .bind(new.job_id)
    .bind(new.uploaded_by)
    .bind(new.filename)
    .bind(new.file_path)
    .bind(new.file_size)
    .bind(new.content_type)
    .bind(new.content_hash)
    .bind(new.status.as_str())
    .fetch_one(executor)
    .await?)
}

pub async fn get(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<DocumentRow, AppError> {
    sqlx::query_as("SELECT * FROM documents WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))
}

pub async fn list_uploaded_by(
    pool: &PgPool,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<Vec<DocumentRow>, AppError> {
    Ok(sqlx::query_as(
        "SELECT * FROM documents WHERE tenant_id = $1 AND uploaded_by = $2 ORDER BY created_at DESC",
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

pub async fn list_for_job(
    pool: &PgPool,
    tenant_id: Uuid,
    job_id: Uuid,
) -> Result<Vec<DocumentRow>, AppError> {
    Ok(sqlx::query_as(
        "SELECT * FROM documents WHERE tenant_id = $1 AND job_id = $2 ORDER BY created_at",
    )
    .bind(tenant_id)
    .bind(job_id)
    .fetch_all(pool)
    .await?)
}

/// A processed document at the same location with identical content, if any.
pub async fn find_processed_duplicate(
    pool: &PgPool,
    tenant_id: Uuid,
    file_path: &str,
    content_hash: &str,
) -> Result<Option<DocumentRow>, AppError> {
    Ok(sqlx::query_as(
        r#"
        SELECT * FROM documents
        WHERE tenant_id = $1 AND file_path = $2 AND content_hash = $3 AND status = $4
        ORDER BY processed_at DESC NULLS LAST
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(file_path)
    .bind(content_hash)
    .bind(DocumentStatus::Processed.as_str())
    .fetch_optional(pool)
    .await?)
}

/// The document a job already created for `file_path` on an earlier run.
pub async fn find_job_document(
    pool: &PgPool,
    job_id: Uuid,
    file_path: &str,
) -> Result<Option<DocumentRow>, AppError> {
    Ok(sqlx::query_as(
        "SELECT * FROM documents WHERE job_id = $1 AND file_path = $2 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(job_id)
    .bind(file_path)
    .fetch_optional(pool)
    .await?)
}

/// Points an existing row at new content and resets it to `PENDING`.
pub async fn refresh_content(
    pool: &PgPool,
    id: Uuid,
    file_size: i64,
    content_hash: &str,
) -> Result<DocumentRow, AppError> {
    Ok(sqlx::query_as(
        r#"
        UPDATE documents SET
            file_size = $2, content_hash = $3, status = 'PENDING',
            error_message = NULL, processed_at = NULL
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(file_size)
    .bind(content_hash)
    .fetch_one(pool)
    .await?)
}

/// Records a processing outcome. Terminal statuses stamp `processed_at`.
pub async fn set_status(
    pool: &PgPool,
    id: Uuid,
    status: DocumentStatus,
    error_message: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE documents SET
            status = $2,
            error_message = $3,
            processed_at = CASE WHEN $2 = 'PENDING' THEN NULL ELSE NOW() END
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Attaches unattached documents of the tenant to `job_id`; returns how many were attached.
pub async fn attach_to_job<'e, E>(
    executor: E,
    tenant_id: Uuid,
    job_id: Uuid,
    document_ids: &[Uuid],
) -> Result<u64, AppError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE documents SET job_id = $2
        WHERE tenant_id = $1 AND id = ANY($3) AND (job_id IS NULL OR job_id = $2)
        "#,
    )
    .bind(tenant_id)
    .bind(job_id)
    .bind(document_ids)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn detach_from_job<'e, E>(executor: E, job_id: Uuid) -> Result<u64, AppError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("UPDATE documents SET job_id = NULL WHERE job_id = $1")
        .bind(job_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_row(pool: &PgPool, id: Uuid) -> Result<(), AppError> {
    sqlx::query("DELETE FROM documents WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Documents in scope: `None` filters match every tenant or every user.
pub async fn count_visible(
    pool: &PgPool,
    tenant_id: Option<Uuid>,
    user_id: Option<Uuid>,
) -> Result<i64, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM documents d
        LEFT JOIN document_jobs j ON j.id = d.job_id
        WHERE ($1::uuid IS NULL OR d.tenant_id = $1)
          AND ($2::uuid IS NULL OR d.uploaded_by = $2 OR j.created_by = $2)
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?)
}

async fn bucket_by_name(
    pool: &PgPool,
    tenant_id: Uuid,
    bucket_name: &str,
) -> Result<Option<BucketConfigRow>, AppError> {
    Ok(sqlx::query_as(
        r#"
        SELECT * FROM s3_bucket_configs
        WHERE tenant_id = $1 AND bucket_name = $2
        ORDER BY is_default DESC, created_at
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(bucket_name)
    .fetch_optional(pool)
    .await?)
}

/// Reads a document's stored bytes: `s3://` locations from the tenant's
/// matching bucket configuration, everything else from the upload store.
pub async fn read_content(
    pool: &PgPool,
    stores: &StoreFactory,
    uploads: &Arc<dyn ObjectStore>,
    doc: &DocumentRow,
) -> Result<Bytes, AppError> {
    match parse_s3_location(&doc.file_path) {
        Some((bucket, key)) => {
            let config = bucket_by_name(pool, doc.tenant_id, bucket)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "No S3 bucket configuration for bucket '{bucket}'"
                    ))
                })?;
            let store = stores.for_bucket(&config).await;
            Ok(store.get(key).await?)
        }
        None => Ok(uploads.get(&doc.file_path).await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_last_component() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("C:\\Users\\ada\\report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("a/b/notes.txt").unwrap(), "notes.txt");
    }

    #[test]
    fn test_sanitize_rejects_traversal_and_empty() {
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("evil..txt").is_err());
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_upload_key_layout() {
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let key = upload_key(tenant, user, "a.pdf");
        assert!(key.starts_with(&format!("uploads/{tenant}/{user}/")));
        assert!(key.ends_with("_a.pdf"));
    }

    #[test]
    fn test_parse_s3_location() {
        assert_eq!(
            parse_s3_location("s3://acme-docs/reports/a.pdf"),
            Some(("acme-docs", "reports/a.pdf"))
        );
        assert_eq!(parse_s3_location("uploads/t/u/a.pdf"), None);
        assert_eq!(parse_s3_location("s3://acme-docs/"), None);
    }
}
