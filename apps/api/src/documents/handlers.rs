use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::documents::service::{self as documents, NewDocument};
use crate::errors::AppError;
use crate::jobs::service as jobs;
use crate::models::document::{DocumentResponse, DocumentRow, DocumentStatus};
use crate::processing::extract::effective_content_type;
use crate::state::AppState;
use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub document_ids: Vec<Uuid>,
}

struct UploadedFile {
    filename: String,
    content_type: String,
    data: Bytes,
}

async fn read_files(mut multipart: Multipart) -> Result<Vec<UploadedFile>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if !matches!(field.name(), Some("files") | Some("file")) {
            continue;
        }
        let raw_name = field.file_name().unwrap_or_default().to_string();
        let filename = documents::sanitize_filename(&raw_name)?;
        let content_type = effective_content_type(field.content_type(), &filename);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read '{filename}': {e}")))?;
        if data.is_empty() {
            return Err(AppError::Validation(format!("File '{filename}' is empty")));
        }
        files.push(UploadedFile {
            filename,
            content_type,
            data,
        });
    }
    Ok(files)
}

/// Stores one file and records it. The stored object is removed again when
/// the row cannot be written.
async fn store_upload(
    pool: &PgPool,
    uploads: &dyn ObjectStore,
    auth: &AuthUser,
    file: UploadedFile,
) -> Result<DocumentRow, AppError> {
    let key = documents::upload_key(auth.tenant_id, auth.user_id, &file.filename);
    let hash = documents::content_hash(&file.data);
    let size = i64::try_from(file.data.len()).unwrap_or(i64::MAX);

    uploads
        .put(&key, file.data, Some(&file.content_type))
        .await?;

    let inserted = documents::insert_document(
        pool,
        &NewDocument {
            tenant_id: auth.tenant_id,
            job_id: None,
            uploaded_by: Some(auth.user_id),
            filename: &file.filename,
            file_path: &key,
            file_size: size,
            content_type: Some(&file.content_type),
            content_hash: &hash,
            status: DocumentStatus::Pending,
        },
    )
    .await;

    if inserted.is_err() {
        if let Err(e) = uploads.delete(&key).await {
            warn!("Could not remove orphaned upload {key}: {e}");
        }
    }
    inserted
}

/// POST /api/documents/upload
pub async fn handle_upload(
    State(state): State<AppState>,
    auth: AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let files = read_files(multipart).await?;
    if files.is_empty() {
        return Err(AppError::Validation("No files were uploaded".to_string()));
    }

    let mut document_ids = Vec::with_capacity(files.len());
    for file in files {
        let doc = store_upload(&state.db, state.uploads.as_ref(), &auth, file).await?;
        document_ids.push(doc.id);
    }

    info!(
        "User {} uploaded {} document(s)",
        auth.username,
        document_ids.len()
    );
    Ok((StatusCode::CREATED, Json(UploadResponse { document_ids })))
}

/// GET /api/documents
pub async fn handle_list(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<DocumentResponse>>, AppError> {
    let rows = documents::list_uploaded_by(&state.db, auth.tenant_id, auth.user_id).await?;
    Ok(Json(rows.iter().map(DocumentResponse::from).collect()))
}

/// GET /api/documents/:id
pub async fn handle_get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let doc = documents::get(&state.db, auth.tenant_id, id).await?;
    Ok(Json(DocumentResponse::from(&doc)))
}

/// GET /api/documents/:id/download
pub async fn handle_download(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let doc = documents::get(&state.db, auth.tenant_id, id).await?;
    let data = documents::read_content(&state.db, &state.stores, &state.uploads, &doc).await?;

    let content_type = doc
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let disposition = format!(
        "attachment; filename=\"{}\"",
        doc.filename.replace('"', "")
    );

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build download response: {e}")))
}

/// GET /api/documents/job/:job_id and GET /api/jobs/:id/documents
pub async fn handle_list_for_job(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Vec<DocumentResponse>>, AppError> {
    let job = jobs::get_accessible(&state.db, &auth, job_id).await?;
    let rows = documents::list_for_job(&state.db, job.tenant_id, job.id).await?;
    Ok(Json(rows.iter().map(DocumentResponse::from).collect()))
}

/// DELETE /api/documents/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let doc = documents::get(&state.db, auth.tenant_id, id).await?;

    let is_owner = doc.uploaded_by == Some(auth.user_id);
    if !is_owner && !auth.can_admin_tenant(doc.tenant_id) {
        return Err(AppError::Forbidden(
            "Only the uploader or a tenant admin may delete this document".to_string(),
        ));
    }
    if let Some(job_id) = doc.job_id {
        return Err(AppError::Validation(format!(
            "Document is attached to job {job_id}; delete or detach the job first"
        )));
    }

    if documents::parse_s3_location(&doc.file_path).is_none() {
        match state.uploads.delete(&doc.file_path).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => warn!("Could not remove stored object for document {id}: {e}"),
        }
    }
    documents::delete_row(&state.db, id).await?;

    info!("User {} deleted document {id}", auth.username);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use crate::storage::FsStore;
    use crate::test_support::{auth_for, seed_tenant, seed_user};

    fn text_file(name: &str) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            content_type: "text/plain".to_string(),
            data: Bytes::from_static(b"meeting notes"),
        }
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_upload_is_stored_and_recorded(pool: PgPool) {
        let dir = tempfile::tempdir().unwrap();
        let uploads = FsStore::new(dir.path());
        let tenant = seed_tenant(&pool, "acme").await;
        let ada = auth_for(&seed_user(&pool, tenant, "ada", Role::User).await);

        let doc = store_upload(&pool, &uploads, &ada, text_file("notes.txt"))
            .await
            .unwrap();
        assert_eq!(doc.status(), DocumentStatus::Pending);
        assert_eq!(
            uploads.get(&doc.file_path).await.unwrap(),
            Bytes::from_static(b"meeting notes")
        );
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_failed_insert_removes_stored_object(pool: PgPool) {
        let dir = tempfile::tempdir().unwrap();
        let uploads = FsStore::new(dir.path());
        // No such tenant or user, so the row violates its foreign keys.
        let ghost = AuthUser {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            username: "ghost".to_string(),
            role: Role::User,
        };

        assert!(store_upload(&pool, &uploads, &ghost, text_file("notes.txt"))
            .await
            .is_err());
        assert!(uploads.list("").await.unwrap().is_empty());
    }
}
