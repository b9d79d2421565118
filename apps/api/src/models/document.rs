use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processed,
    Failed,
    Skipped,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processed => "PROCESSED",
            DocumentStatus::Failed => "FAILED",
            DocumentStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DocumentStatus::Pending),
            "PROCESSED" => Some(DocumentStatus::Processed),
            "FAILED" => Some(DocumentStatus::Failed),
            "SKIPPED" => Some(DocumentStatus::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub job_id: Option<Uuid>,
    pub uploaded_by: Option<Uuid>,
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: Option<String>,
    pub content_hash: String,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl DocumentRow {
    pub fn status(&self) -> DocumentStatus {
        DocumentStatus::parse(&self.status).unwrap_or(DocumentStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub filename: String,
    pub content_type: Option<String>,
    pub file_size: i64,
    pub content_hash: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<&DocumentRow> for DocumentResponse {
    fn from(d: &DocumentRow) -> Self {
        Self {
            id: d.id,
            job_id: d.job_id,
            filename: d.filename.clone(),
            content_type: d.content_type.clone(),
            file_size: d.file_size,
            content_hash: d.content_hash.clone(),
            status: d.status(),
            error_message: d.error_message.clone(),
            uploaded_by: d.uploaded_by,
            created_at: d.created_at,
            processed_at: d.processed_at,
        }
    }
}
