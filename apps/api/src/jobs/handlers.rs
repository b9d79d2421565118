use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::jobs::service::{self as jobs, EventLevel, JobAction, JobRequest, JobStats};
use crate::models::job::{JobEventRow, JobResponse, JobStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// GET /api/jobs
pub async fn handle_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobResponse>>, AppError> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            JobStatus::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("Unknown job status '{raw}'")))?,
        ),
    };

    let rows = jobs::list(&state.db, &auth, status).await?;
    let mut responses = Vec::with_capacity(rows.len());
    for job in &rows {
        responses.push(jobs::to_response(&state.db, job).await?);
    }
    Ok(Json(responses))
}

/// GET /api/jobs/stats
pub async fn handle_stats(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<JobStats>, AppError> {
    Ok(Json(jobs::stats(&state.db, &auth).await?))
}

/// GET /api/jobs/:id
pub async fn handle_get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, AppError> {
    let job = jobs::get_accessible(&state.db, &auth, id).await?;
    Ok(Json(jobs::to_response(&state.db, &job).await?))
}

/// POST /api/jobs
///
/// New jobs wait for the scheduler or an explicit `start`.
pub async fn handle_create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<JobRequest>,
) -> Result<(StatusCode, Json<JobResponse>), AppError> {
    let job = jobs::create(&state.db, &auth, &req, state.config.chunking).await?;
    Ok((
        StatusCode::CREATED,
        Json(jobs::to_response(&state.db, &job).await?),
    ))
}

/// PUT /api/jobs/:id
pub async fn handle_update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobResponse>, AppError> {
    let job = jobs::update(&state.db, &auth, id, &req, state.config.chunking).await?;
    Ok(Json(jobs::to_response(&state.db, &job).await?))
}

/// DELETE /api/jobs/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    jobs::delete(&state.db, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/jobs/:id/:action
pub async fn handle_action(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, action)): Path<(Uuid, String)>,
) -> Result<Json<JobResponse>, AppError> {
    let action = JobAction::parse(&action)
        .ok_or_else(|| AppError::Validation(format!("Unknown job action '{action}'")))?;
    let job = jobs::get_accessible(&state.db, &auth, id).await?;
    action.check(job.status())?;

    let updated = match action {
        JobAction::Start => jobs::claim(&state.db, id, action.allowed_from()).await?,
        JobAction::Cancel => jobs::cancel(&state.db, id).await?,
        JobAction::Restart => jobs::restart(&state.db, id).await?,
    };
    // The status moved between the read and the conditional update.
    let updated = match updated {
        Some(job) => job,
        None => {
            let current = jobs::current_status(&state.db, id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))?;
            action.check(current)?;
            return Err(AppError::Conflict(format!(
                "Job {id} changed state concurrently, try again"
            )));
        }
    };

    if action == JobAction::Start {
        state.runner.dispatch(id);
    }

    let message = format!(
        "{} by {}: {} -> {}",
        action_label(action),
        auth.username,
        job.status,
        updated.status
    );
    if let Err(e) = jobs::record_event(&state.db, id, EventLevel::Info, &message).await {
        warn!("Could not record event for job {id}: {e}");
    }
    info!(
        "User {} moved job {id} from {} to {}",
        auth.username, job.status, updated.status
    );

    Ok(Json(jobs::to_response(&state.db, &updated).await?))
}

fn action_label(action: JobAction) -> &'static str {
    match action {
        JobAction::Start => "Started",
        JobAction::Cancel => "Cancelled",
        JobAction::Restart => "Restarted",
    }
}

/// GET /api/jobs/:id/logs
pub async fn handle_logs(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<JobEventRow>>, AppError> {
    let job = jobs::get_accessible(&state.db, &auth, id).await?;
    Ok(Json(jobs::list_events(&state.db, job.id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use sqlx::PgPool;

    use crate::models::job::SourceType;
    use crate::models::user::Role;
    use crate::test_support::{app_state, auth_for, seed_job, seed_tenant, seed_user, RecordingExecutor};

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_start_dispatches_even_when_event_log_fails(pool: PgPool) {
        let dir = tempfile::tempdir().unwrap();
        let tenant = seed_tenant(&pool, "acme").await;
        let ada = seed_user(&pool, tenant, "ada", Role::User).await;
        let job = seed_job(&pool, &ada, SourceType::Upload, JobStatus::Pending).await;
        sqlx::query("DROP TABLE job_events").execute(&pool).await.unwrap();

        let (executor, mut ran) = RecordingExecutor::new();
        let state = app_state(pool.clone(), dir.path(), executor);
        let Json(response) = handle_action(
            State(state),
            auth_for(&ada),
            Path((job.id, "start".to_string())),
        )
        .await
        .unwrap();

        assert_eq!(response.status, JobStatus::Processing);
        let dispatched = tokio::time::timeout(Duration::from_secs(5), ran.recv())
            .await
            .unwrap();
        assert_eq!(dispatched, Some(job.id));
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_start_twice_is_rejected(pool: PgPool) {
        let dir = tempfile::tempdir().unwrap();
        let tenant = seed_tenant(&pool, "acme").await;
        let ada = seed_user(&pool, tenant, "ada", Role::User).await;
        let job = seed_job(&pool, &ada, SourceType::Upload, JobStatus::Pending).await;

        let (executor, _ran) = RecordingExecutor::new();
        let state = app_state(pool.clone(), dir.path(), executor);
        let start = || {
            handle_action(
                State(state.clone()),
                auth_for(&ada),
                Path((job.id, "start".to_string())),
            )
        };
        assert!(start().await.is_ok());
        assert!(matches!(start().await, Err(AppError::Validation(_))));
    }
}
