use axum::{extract::State, Json};
use serde::Serialize;
use sqlx::PgPool;

use crate::auth::AuthUser;
use crate::documents::service as documents;
use crate::errors::AppError;
use crate::jobs::service::{self as jobs, JobStats};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    #[serde(flatten)]
    pub jobs: JobStats,
    pub total_documents: i64,
}

/// GET /api/dashboard
///
/// Job and document counts share one scope: the caller's own, the whole tenant
/// for tenant admins, every tenant for system admins.
pub async fn handle_dashboard(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<DashboardStats>, AppError> {
    Ok(Json(dashboard_stats(&state.db, &auth).await?))
}

async fn dashboard_stats(pool: &PgPool, auth: &AuthUser) -> Result<DashboardStats, AppError> {
    let job_stats = jobs::stats(pool, auth).await?;
    let (tenant, creator) = jobs::scope(auth);
    let total_documents = documents::count_visible(pool, tenant, creator).await?;
    Ok(DashboardStats {
        jobs: job_stats,
        total_documents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::service::NewDocument;
    use crate::models::document::DocumentStatus;
    use crate::models::job::{JobStatus, SourceType};
    use crate::models::user::{Role, UserRow};
    use crate::test_support::{auth_for, seed_job, seed_tenant, seed_user};

    #[test]
    fn test_stats_are_flattened() {
        let stats = DashboardStats {
            jobs: JobStats {
                total_jobs: 3,
                completed_jobs: 2,
                failed_jobs: 1,
                ..Default::default()
            },
            total_documents: 7,
        };
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["totalJobs"], 3);
        assert_eq!(value["completedJobs"], 2);
        assert_eq!(value["pendingJobs"], 0);
        assert_eq!(value["totalDocuments"], 7);
    }

    async fn upload(pool: &PgPool, owner: &UserRow) {
        documents::insert_document(
            pool,
            &NewDocument {
                tenant_id: owner.tenant_id,
                job_id: None,
                uploaded_by: Some(owner.id),
                filename: "notes.txt",
                file_path: "uploads/notes.txt",
                file_size: 5,
                content_type: Some("text/plain"),
                content_hash: "abc",
                status: DocumentStatus::Pending,
            },
        )
        .await
        .unwrap();
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_document_count_follows_job_scope(pool: PgPool) {
        let acme = seed_tenant(&pool, "acme").await;
        let globex = seed_tenant(&pool, "globex").await;
        let ada = seed_user(&pool, acme, "ada", Role::User).await;
        let boss = seed_user(&pool, acme, "boss", Role::Admin).await;
        let hal = seed_user(&pool, globex, "hal", Role::User).await;
        let root = seed_user(&pool, acme, "root", Role::SystemAdmin).await;

        upload(&pool, &ada).await;
        upload(&pool, &boss).await;
        upload(&pool, &hal).await;
        seed_job(&pool, &ada, SourceType::Upload, JobStatus::Pending).await;
        seed_job(&pool, &hal, SourceType::Upload, JobStatus::Completed).await;

        let mine = dashboard_stats(&pool, &auth_for(&ada)).await.unwrap();
        assert_eq!((mine.jobs.total_jobs, mine.total_documents), (1, 1));

        let tenant = dashboard_stats(&pool, &auth_for(&boss)).await.unwrap();
        assert_eq!((tenant.jobs.total_jobs, tenant.total_documents), (1, 2));

        let everything = dashboard_stats(&pool, &auth_for(&root)).await.unwrap();
        assert_eq!((everything.jobs.total_jobs, everything.total_documents), (2, 3));
    }
}
