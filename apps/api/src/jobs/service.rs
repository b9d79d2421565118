use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::buckets::service as buckets;
use crate::config::ChunkingSettings;
use crate::documents::service as documents;
use crate::errors::AppError;
use crate::models::bucket::BucketConfigResponse;
use crate::models::job::{JobEventRow, JobResponse, JobRow, JobStatus, SourceType};
use crate::processing::chunker::settings_for_job;
use crate::validation::{max_len, require_len};

/// Accepts RFC 3339 timestamps as well as the zone-less
/// `YYYY-MM-DDTHH:MM[:SS]` a `datetime-local` input sends, read as UTC.
fn deserialize_flexible_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, format) {
            return Ok(Some(naive.and_utc()));
        }
    }
    Err(serde::de::Error::custom(format!(
        "invalid scheduledTime '{raw}'"
    )))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub source_location: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flexible_datetime")]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub config: Option<Value>,
    pub source_type: Option<String>,
    pub s3_bucket_id: Option<Uuid>,
    pub s3_source_path: Option<String>,
    pub document_ids: Option<Vec<Uuid>>,
}

impl JobRequest {
    fn names_source(&self) -> bool {
        self.source_type.is_some()
            || self.source_location.is_some()
            || self.s3_bucket_id.is_some()
            || self.s3_source_path.is_some()
            || self.document_ids.is_some()
    }
}

/// Where a job reads its documents from, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub source_type: Option<SourceType>,
    pub source_location: String,
    pub bucket_id: Option<Uuid>,
    pub document_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Start,
    Cancel,
    Restart,
}

impl JobAction {
    /// `resume` is accepted as an alias of `restart`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Some(JobAction::Start),
            "cancel" => Some(JobAction::Cancel),
            "restart" | "resume" => Some(JobAction::Restart),
            _ => None,
        }
    }

    /// States an action may be taken from.
    pub fn allowed_from(&self) -> &'static [JobStatus] {
        match self {
            JobAction::Start => &[JobStatus::Pending, JobStatus::Scheduled],
            JobAction::Cancel => &[
                JobStatus::Pending,
                JobStatus::Scheduled,
                JobStatus::Processing,
            ],
            JobAction::Restart => &[
                JobStatus::Failed,
                JobStatus::Cancelled,
                JobStatus::Completed,
            ],
        }
    }

    pub fn target(&self) -> JobStatus {
        match self {
            JobAction::Start => JobStatus::Processing,
            JobAction::Cancel => JobStatus::Cancelled,
            JobAction::Restart => JobStatus::Pending,
        }
    }

    pub fn check(&self, from: JobStatus) -> Result<JobStatus, AppError> {
        if self.allowed_from().contains(&from) {
            Ok(self.target())
        } else {
            Err(AppError::Validation(format!(
                "Cannot {} a job that is {}",
                self.verb(),
                from.as_str()
            )))
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            JobAction::Start => "start",
            JobAction::Cancel => "cancel",
            JobAction::Restart => "restart",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "INFO",
            EventLevel::Warn => "WARN",
            EventLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total_jobs: i64,
    pub pending_jobs: i64,
    pub scheduled_jobs: i64,
    pub processing_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub cancelled_jobs: i64,
}

fn status_list(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn validate_common(req: &JobRequest, defaults: ChunkingSettings) -> Result<(), AppError> {
    max_len("Description", req.description.as_deref(), 500)?;
    max_len("Type", req.job_type.as_deref(), 50)?;
    settings_for_job(req.config.as_ref(), defaults).map_err(AppError::Validation)?;
    Ok(())
}

/// Validates the source fields of a request against the caller's tenant.
/// `job_id` is set when re-pointing an existing job.
pub async fn resolve_source(
    pool: &PgPool,
    tenant_id: Uuid,
    req: &JobRequest,
    job_id: Option<Uuid>,
) -> Result<ResolvedSource, AppError> {
    let source_type = match req.source_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            SourceType::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("Unknown source type '{raw}'")))?,
        ),
    };

    match source_type {
        Some(SourceType::S3) => {
            let bucket_id = req.s3_bucket_id.ok_or_else(|| {
                AppError::Validation("s3BucketId is required for S3 jobs".to_string())
            })?;
            let bucket = buckets::get(pool, tenant_id, bucket_id).await?;
            let path = req
                .s3_source_path
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .unwrap_or("/");
            max_len("S3 source path", Some(path), 1000)?;
            Ok(ResolvedSource {
                source_type,
                source_location: path.to_string(),
                bucket_id: Some(bucket.id),
                document_ids: Vec::new(),
            })
        }
        Some(SourceType::Upload) => {
            let ids = req.document_ids.clone().unwrap_or_default();
            if ids.is_empty() {
                return Err(AppError::Validation(
                    "documentIds must name at least one uploaded document".to_string(),
                ));
            }
            let available: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM documents
                WHERE tenant_id = $1 AND id = ANY($2)
                  AND (job_id IS NULL OR job_id = $3)
                "#,
            )
            .bind(tenant_id)
            .bind(&ids)
            .bind(job_id)
            .fetch_one(pool)
            .await?;
            let mut unique = ids.clone();
            unique.sort();
            unique.dedup();
            if available != unique.len() as i64 {
                return Err(AppError::Validation(
                    "Some documents do not exist or already belong to another job".to_string(),
                ));
            }
            Ok(ResolvedSource {
                source_type,
                source_location: unique
                    .iter()
                    .map(Uuid::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
                bucket_id: None,
                document_ids: unique,
            })
        }
        None => {
            let location = req.source_location.as_deref().unwrap_or_default();
            require_len("Source location", location, 3, 1000)?;
            Ok(ResolvedSource {
                source_type: None,
                source_location: location.trim().to_string(),
                bucket_id: None,
                document_ids: Vec::new(),
            })
        }
    }
}

pub async fn record_event<'e, E>(
    executor: E,
    job_id: Uuid,
    level: EventLevel,
    message: &str,
) -> Result<(), AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query("INSERT INTO job_events (id, job_id, level, message) VALUES ($1, $2, $3, $4)")
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(level.as_str())
        .bind(message)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn list_events(pool: &PgPool, job_id: Uuid) -> Result<Vec<JobEventRow>, AppError> {
    Ok(
        sqlx::query_as("SELECT * FROM job_events WHERE job_id = $1 ORDER BY created_at, id")
            .bind(job_id)
            .fetch_all(pool)
            .await?,
    )
}

pub async fn create(
    pool: &PgPool,
    auth: &AuthUser,
    req: &JobRequest,
    chunking: ChunkingSettings,
) -> Result<JobRow, AppError> {
    require_len("Name", req.name.as_deref().unwrap_or_default(), 3, 100)?;
    validate_common(req, chunking)?;
    let source = resolve_source(pool, auth.tenant_id, req, None).await?;

    let status = if req.scheduled_time.is_some() {
        JobStatus::Scheduled
    } else {
        JobStatus::Pending
    };

    let mut tx = pool.begin().await?;

    let job: JobRow = sqlx::query_as(
        r#"
        INSERT INTO document_jobs
            (id, tenant_id, name, description, job_type, config, source_type,
             source_location, s3_bucket_config_id, status, created_by, scheduled_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(auth.tenant_id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.description.as_deref())
    .bind(req.job_type.as_deref())
    .bind(req.config.as_ref())
    .bind(source.source_type.map(|s| s.as_str()))
    .bind(&source.source_location)
    .bind(source.bucket_id)
    .bind(status.as_str())
    .bind(auth.user_id)
    .bind(req.scheduled_time)
    .fetch_one(&mut *tx)
    .await?;

    if !source.document_ids.is_empty() {
        let attached =
            documents::attach_to_job(&mut *tx, auth.tenant_id, job.id, &source.document_ids)
                .await?;
        if attached != source.document_ids.len() as u64 {
            return Err(AppError::Conflict(
                "Some documents were attached to another job concurrently".to_string(),
            ));
        }
    }

    record_event(
        &mut *tx,
        job.id,
        EventLevel::Info,
        &format!("Job created by {} ({})", auth.username, status.as_str()),
    )
    .await?;

    tx.commit().await?;
    info!("User {} created job {} '{}'", auth.username, job.id, job.name);
    Ok(job)
}

/// Loads a job the caller may see: other tenants get 404, other users'
/// jobs 403 unless the caller administers the tenant.
pub async fn get_accessible(pool: &PgPool, auth: &AuthUser, id: Uuid) -> Result<JobRow, AppError> {
    let job: JobRow = sqlx::query_as("SELECT * FROM document_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .filter(|j: &JobRow| auth.is_system_admin() || j.tenant_id == auth.tenant_id)
        .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))?;

    if job.created_by != auth.user_id && !auth.can_admin_tenant(job.tenant_id) {
        return Err(AppError::Forbidden(
            "You do not have access to this job".to_string(),
        ));
    }
    Ok(job)
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<JobRow>, AppError> {
    Ok(sqlx::query_as("SELECT * FROM document_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

/// Jobs visible to the caller: system admins see all, tenant admins their
/// tenant's, everyone else their own.
pub async fn list(
    pool: &PgPool,
    auth: &AuthUser,
    status: Option<JobStatus>,
) -> Result<Vec<JobRow>, AppError> {
    let (tenant, creator) = scope(auth);
    Ok(sqlx::query_as(
        r#"
        SELECT * FROM document_jobs
        WHERE ($1::uuid IS NULL OR tenant_id = $1)
          AND ($2::uuid IS NULL OR created_by = $2)
          AND ($3::text IS NULL OR status = $3)
        ORDER BY created_at DESC
        "#,
    )
    .bind(tenant)
    .bind(creator)
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?)
}

/// `(tenant filter, creator filter)` for list-style queries.
pub fn scope(auth: &AuthUser) -> (Option<Uuid>, Option<Uuid>) {
    if auth.is_system_admin() {
        (None, None)
    } else if auth.is_tenant_admin() {
        (Some(auth.tenant_id), None)
    } else {
        (Some(auth.tenant_id), Some(auth.user_id))
    }
}

pub async fn stats(pool: &PgPool, auth: &AuthUser) -> Result<JobStats, AppError> {
    let (tenant, creator) = scope(auth);
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*) FROM document_jobs
        WHERE ($1::uuid IS NULL OR tenant_id = $1)
          AND ($2::uuid IS NULL OR created_by = $2)
        GROUP BY status
        "#,
    )
    .bind(tenant)
    .bind(creator)
    .fetch_all(pool)
    .await?;

    let mut stats = JobStats::default();
    for (status, count) in rows {
        stats.total_jobs += count;
        match JobStatus::parse(&status) {
            Some(JobStatus::Pending) => stats.pending_jobs += count,
            Some(JobStatus::Scheduled) => stats.scheduled_jobs += count,
            Some(JobStatus::Processing) => stats.processing_jobs += count,
            Some(JobStatus::Completed) => stats.completed_jobs += count,
            Some(JobStatus::Failed) | None => stats.failed_jobs += count,
            Some(JobStatus::Cancelled) => stats.cancelled_jobs += count,
        }
    }
    Ok(stats)
}

pub async fn update(
    pool: &PgPool,
    auth: &AuthUser,
    id: Uuid,
    req: &JobRequest,
    chunking: ChunkingSettings,
) -> Result<JobRow, AppError> {
    let job = get_accessible(pool, auth, id).await?;
    let status = job.status();
    if status == JobStatus::Processing {
        return Err(AppError::Validation(
            "Cannot update a job while it is processing".to_string(),
        ));
    }
    if let Some(name) = &req.name {
        require_len("Name", name, 3, 100)?;
    }
    validate_common(req, chunking)?;

    let touches_execution = req.names_source()
        || req.job_type.is_some()
        || req.config.is_some()
        || req.scheduled_time.is_some();
    if touches_execution && !status.is_editable() {
        return Err(AppError::Validation(format!(
            "Source, type, config and schedule can only change while a job is PENDING or SCHEDULED (job is {})",
            status.as_str()
        )));
    }

    let source = if req.names_source() {
        Some(resolve_source(pool, job.tenant_id, req, Some(job.id)).await?)
    } else {
        None
    };
    let new_status = if req.scheduled_time.is_some() {
        JobStatus::Scheduled
    } else {
        status
    };

    let mut tx = pool.begin().await?;

    let updated: JobRow = sqlx::query_as(
        r#"
        UPDATE document_jobs SET
            name = COALESCE($2, name),
            description = COALESCE($3, description),
            job_type = COALESCE($4, job_type),
            config = COALESCE($5, config),
            source_type = CASE WHEN $6 THEN $7 ELSE source_type END,
            source_location = COALESCE($8, source_location),
            s3_bucket_config_id = CASE WHEN $6 THEN $9 ELSE s3_bucket_config_id END,
            scheduled_time = COALESCE($10, scheduled_time),
            status = $11,
            updated_at = NOW()
        WHERE id = $1 AND status = $12
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.description.as_deref())
    .bind(req.job_type.as_deref())
    .bind(req.config.as_ref())
    .bind(source.is_some())
    .bind(source.as_ref().and_then(|s| s.source_type).map(|s| s.as_str()))
    .bind(source.as_ref().map(|s| s.source_location.as_str()))
    .bind(source.as_ref().and_then(|s| s.bucket_id))
    .bind(req.scheduled_time)
    .bind(new_status.as_str())
    .bind(status.as_str())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Conflict(format!("Job {id} changed state during the update")))?;

    if let Some(source) = &source {
        documents::detach_from_job(&mut *tx, id).await?;
        if !source.document_ids.is_empty() {
            let attached =
                documents::attach_to_job(&mut *tx, job.tenant_id, id, &source.document_ids)
                    .await?;
            if attached != source.document_ids.len() as u64 {
                return Err(AppError::Conflict(
                    "Some documents were attached to another job concurrently".to_string(),
                ));
            }
        }
    }

    record_event(
        &mut *tx,
        id,
        EventLevel::Info,
        &format!("Job updated by {}", auth.username),
    )
    .await?;
    tx.commit().await?;

    info!("User {} updated job {id}", auth.username);
    Ok(updated)
}

pub async fn delete(pool: &PgPool, auth: &AuthUser, id: Uuid) -> Result<(), AppError> {
    let job = get_accessible(pool, auth, id).await?;
    if job.status() == JobStatus::Processing {
        return Err(AppError::Validation(
            "Cannot delete a job while it is processing".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    documents::detach_from_job(&mut *tx, id).await?;
    let result = sqlx::query("DELETE FROM document_jobs WHERE id = $1 AND status <> $2")
        .bind(id)
        .bind(JobStatus::Processing.as_str())
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::Validation(
            "Cannot delete a job while it is processing".to_string(),
        ));
    }
    tx.commit().await?;

    info!("User {} deleted job {id}", auth.username);
    Ok(())
}

/// Atomically moves a job from one of `expected` to `PROCESSING`.
/// `None` when another caller got there first.
pub async fn claim(
    pool: &PgPool,
    id: Uuid,
    expected: &[JobStatus],
) -> Result<Option<JobRow>, AppError> {
    Ok(sqlx::query_as(
        r#"
        UPDATE document_jobs SET
            status = 'PROCESSING',
            started_time = NOW(),
            completed_time = NULL,
            error_message = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status = ANY($2)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status_list(expected))
    .fetch_optional(pool)
    .await?)
}

pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<Option<JobRow>, AppError> {
    Ok(sqlx::query_as(
        r#"
        UPDATE document_jobs SET
            status = 'CANCELLED',
            completed_time = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = ANY($2)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status_list(JobAction::Cancel.allowed_from()))
    .fetch_optional(pool)
    .await?)
}

pub async fn restart(pool: &PgPool, id: Uuid) -> Result<Option<JobRow>, AppError> {
    Ok(sqlx::query_as(
        r#"
        UPDATE document_jobs SET
            status = 'PENDING',
            started_time = NULL,
            completed_time = NULL,
            error_message = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status = ANY($2)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status_list(JobAction::Restart.allowed_from()))
    .fetch_optional(pool)
    .await?)
}

/// Final status write of a run. Only lands while the job is still
/// `PROCESSING`, so a cancellation is never overwritten.
pub async fn finish(
    pool: &PgPool,
    id: Uuid,
    status: JobStatus,
    error_message: Option<&str>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE document_jobs SET
            status = $2,
            error_message = $3,
            completed_time = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'PROCESSING'
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn current_status(pool: &PgPool, id: Uuid) -> Result<Option<JobStatus>, AppError> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM document_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(status.and_then(|s| JobStatus::parse(&s)))
}

/// Marks jobs left `PROCESSING` by a previous run as failed.
pub async fn fail_interrupted(pool: &PgPool) -> Result<Vec<Uuid>, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        UPDATE document_jobs SET
            status = 'FAILED',
            error_message = 'interrupted by restart',
            completed_time = NOW(),
            updated_at = NOW()
        WHERE status = 'PROCESSING'
        RETURNING id
        "#,
    )
    .fetch_all(pool)
    .await?)
}

pub async fn due_scheduled(pool: &PgPool, limit: i64) -> Result<Vec<Uuid>, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT id FROM document_jobs
        WHERE status = 'SCHEDULED' AND scheduled_time <= NOW()
        ORDER BY scheduled_time
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

pub async fn pending(pool: &PgPool, limit: i64) -> Result<Vec<Uuid>, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT id FROM document_jobs
        WHERE status = 'PENDING'
        ORDER BY created_at
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

/// API view of a job with its bucket configuration, if any.
pub async fn to_response(pool: &PgPool, job: &JobRow) -> Result<JobResponse, AppError> {
    let bucket = match job.s3_bucket_config_id {
        Some(bucket_id) => buckets::get(pool, job.tenant_id, bucket_id)
            .await
            .ok()
            .map(|b| BucketConfigResponse::from(&b)),
        None => None,
    };
    Ok(JobResponse::new(job, bucket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::models::user::Role;
    use crate::test_support::{auth_for, seed_job, seed_tenant, seed_user};

    #[test]
    fn test_action_parse_and_alias() {
        assert_eq!(JobAction::parse("START"), Some(JobAction::Start));
        assert_eq!(JobAction::parse("resume"), Some(JobAction::Restart));
        assert_eq!(JobAction::parse("pause"), None);
    }

    #[test]
    fn test_transition_table() {
        use JobStatus::*;
        assert_eq!(JobAction::Start.check(Pending).unwrap(), Processing);
        assert_eq!(JobAction::Start.check(Scheduled).unwrap(), Processing);
        assert!(JobAction::Start.check(Processing).is_err());
        assert!(JobAction::Start.check(Completed).is_err());

        assert_eq!(JobAction::Cancel.check(Processing).unwrap(), Cancelled);
        assert!(JobAction::Cancel.check(Cancelled).is_err());
        assert!(JobAction::Cancel.check(Failed).is_err());

        for from in [Failed, Cancelled, Completed] {
            assert_eq!(JobAction::Restart.check(from).unwrap(), Pending);
        }
        assert!(JobAction::Restart.check(Pending).is_err());
        assert!(JobAction::Restart.check(Processing).is_err());
    }

    #[test]
    fn test_request_accepts_datetime_local_and_rfc3339() {
        let req: JobRequest =
            serde_json::from_str(r#"{"name":"Nightly","scheduledTime":"2030-01-02T03:04"}"#)
                .unwrap();
        assert_eq!(
            req.scheduled_time.unwrap().to_rfc3339(),
            "2030-01-02T03:04:00+00:00"
        );

        let req: JobRequest =
            serde_json::from_str(r#"{"scheduledTime":"2030-01-02T03:04:05+02:00"}"#).unwrap();
        assert_eq!(
            req.scheduled_time.unwrap().to_rfc3339(),
            "2030-01-02T01:04:05+00:00"
        );

        let req: JobRequest = serde_json::from_str(r#"{"scheduledTime":""}"#).unwrap();
        assert!(req.scheduled_time.is_none());

        assert!(serde_json::from_str::<JobRequest>(r#"{"scheduledTime":"tomorrow"}"#).is_err());
    }

    #[test]
    fn test_request_type_field_is_renamed() {
        let req: JobRequest = serde_json::from_str(
            r#"{"name":"Import","type":"EMBEDDING","sourceType":"s3","s3BucketId":"6f1c8a4e-52b4-4c1f-9a55-7d6f2ddc1a10"}"#,
        )
        .unwrap();
        assert_eq!(req.job_type.as_deref(), Some("EMBEDDING"));
        assert!(req.names_source());
    }

    #[test]
    fn test_validate_common_checks_config() {
        let defaults = ChunkingSettings {
            chunk_size: 1000,
            chunk_overlap: 200,
        };
        let req = JobRequest {
            config: Some(serde_json::json!({"chunkSize": 50})),
            ..Default::default()
        };
        assert!(matches!(
            validate_common(&req, defaults),
            Err(AppError::Validation(_))
        ));
        let req = JobRequest {
            description: Some("d".repeat(501)),
            ..Default::default()
        };
        assert!(validate_common(&req, defaults).is_err());
    }

    #[test]
    fn test_scope_by_role() {
        use crate::auth::Claims;
        let claims = |role: &str| Claims {
            sub: "u".into(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            roles: vec![role.into()],
            iat: 0,
            exp: 0,
        };
        let user = AuthUser::from_claims(claims("USER"));
        assert_eq!(scope(&user), (Some(user.tenant_id), Some(user.user_id)));
        let admin = AuthUser::from_claims(claims("ADMIN"));
        assert_eq!(scope(&admin), (Some(admin.tenant_id), None));
        let root = AuthUser::from_claims(claims("SYSTEM_ADMIN"));
        assert_eq!(scope(&root), (None, None));
    }

    async fn upload(pool: &PgPool, owner: &crate::models::user::UserRow, name: &str) -> Uuid {
        let doc = documents::insert_document(
            pool,
            &documents::NewDocument {
                tenant_id: owner.tenant_id,
                job_id: None,
                uploaded_by: Some(owner.id),
                filename: name,
                file_path: &format!("uploads/{name}"),
                file_size: 4,
                content_type: Some("text/plain"),
                content_hash: &documents::content_hash(name.as_bytes()),
                status: crate::models::document::DocumentStatus::Pending,
            },
        )
        .await
        .unwrap();
        doc.id
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_finish_never_overwrites_cancellation(pool: PgPool) {
        let tenant = seed_tenant(&pool, "acme").await;
        let ada = seed_user(&pool, tenant, "ada", Role::User).await;
        let job = seed_job(&pool, &ada, SourceType::Upload, JobStatus::Processing).await;

        assert!(cancel(&pool, job.id).await.unwrap().is_some());
        assert!(!finish(&pool, job.id, JobStatus::Completed, None).await.unwrap());
        assert_eq!(
            current_status(&pool, job.id).await.unwrap(),
            Some(JobStatus::Cancelled)
        );
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_claim_succeeds_once(pool: PgPool) {
        let tenant = seed_tenant(&pool, "acme").await;
        let ada = seed_user(&pool, tenant, "ada", Role::User).await;
        let job = seed_job(&pool, &ada, SourceType::Upload, JobStatus::Pending).await;

        let allowed = JobAction::Start.allowed_from();
        assert!(claim(&pool, job.id, allowed).await.unwrap().is_some());
        assert!(claim(&pool, job.id, allowed).await.unwrap().is_none());
        assert!(finish(&pool, job.id, JobStatus::Completed, None).await.unwrap());
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_upload_job_attaches_and_delete_detaches(pool: PgPool) {
        let tenant = seed_tenant(&pool, "acme").await;
        let ada = seed_user(&pool, tenant, "ada", Role::User).await;
        let auth = auth_for(&ada);
        let docs = vec![upload(&pool, &ada, "a.txt").await, upload(&pool, &ada, "b.txt").await];

        let req = JobRequest {
            name: Some("Uploads".to_string()),
            source_type: Some("UPLOAD".to_string()),
            document_ids: Some(docs.clone()),
            ..Default::default()
        };
        let job = create(&pool, &auth, &req, test_config().chunking).await.unwrap();
        assert_eq!(documents::list_for_job(&pool, tenant, job.id).await.unwrap().len(), 2);

        // A document belongs to one job at a time.
        let err = create(&pool, &auth, &req, test_config().chunking).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        delete(&pool, &auth, job.id).await.unwrap();
        for id in docs {
            let doc = documents::get(&pool, tenant, id).await.unwrap();
            assert_eq!(doc.job_id, None);
        }
    }
}
