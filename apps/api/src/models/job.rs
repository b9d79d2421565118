use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::bucket::BucketConfigResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Scheduled,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Jobs that have not started yet may still have their source edited.
    pub fn is_editable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Scheduled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    S3,
    Upload,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::S3 => "S3",
            SourceType::Upload => "UPLOAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Some(SourceType::S3),
            "upload" => Some(SourceType::Upload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub job_type: Option<String>,
    pub config: Option<Value>,
    pub source_type: Option<String>,
    pub source_location: String,
    pub s3_bucket_config_id: Option<Uuid>,
    pub status: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub started_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl JobRow {
    /// Rows are only ever written through `JobStatus::as_str`; anything else is treated as failed.
    pub fn status(&self) -> JobStatus {
        JobStatus::parse(&self.status).unwrap_or(JobStatus::Failed)
    }

    pub fn source_type(&self) -> Option<SourceType> {
        self.source_type.as_deref().and_then(SourceType::parse)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub job_type: Option<String>,
    pub config: Option<Value>,
    pub source_type: Option<SourceType>,
    pub source_location: String,
    pub status: JobStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub started_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub s3_bucket_config: Option<BucketConfigResponse>,
}

impl JobResponse {
    pub fn new(job: &JobRow, bucket: Option<BucketConfigResponse>) -> Self {
        Self {
            id: job.id,
            tenant_id: job.tenant_id,
            name: job.name.clone(),
            description: job.description.clone(),
            job_type: job.job_type.clone(),
            config: job.config.clone(),
            source_type: job.source_type(),
            source_location: job.source_location.clone(),
            status: job.status(),
            created_by: job.created_by,
            created_at: job.created_at,
            updated_at: job.updated_at,
            scheduled_time: job.scheduled_time,
            started_time: job.started_time,
            completed_time: job.completed_time,
            error_message: job.error_message.clone(),
            s3_bucket_config: bucket,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct JobEventRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub level: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(JobStatus::parse("pending"), Some(JobStatus::Pending));
        assert_eq!(JobStatus::parse("CANCELLED"), Some(JobStatus::Cancelled));
        assert_eq!(JobStatus::parse("RUNNING"), None);
    }

    #[test]
    fn test_editable_states() {
        assert!(JobStatus::Pending.is_editable());
        assert!(JobStatus::Scheduled.is_editable());
        assert!(!JobStatus::Processing.is_editable());
        assert!(!JobStatus::Completed.is_editable());
    }

    #[test]
    fn test_source_type_parse() {
        assert_eq!(SourceType::parse("S3"), Some(SourceType::S3));
        assert_eq!(SourceType::parse("upload"), Some(SourceType::Upload));
        assert_eq!(SourceType::parse("ftp"), None);
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            "\"PROCESSING\""
        );
    }
}
