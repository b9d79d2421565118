pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::cors::cors_layer;
use crate::state::AppState;
use crate::tenancy::tenant_context;
use crate::{auth, buckets, dashboard, documents, jobs, processing, tenancy, users};

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors);
    let body_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/health", get(health::health_handler))
        // Auth
        .route("/api/auth/login", post(auth::handlers::handle_login))
        .route("/api/auth/register", post(auth::handlers::handle_register))
        .route("/api/auth/me", get(auth::handlers::handle_me))
        .route("/api/auth/ping", get(auth::handlers::handle_ping))
        // Users
        .route("/api/users", get(users::handlers::handle_list_users))
        .route(
            "/api/users/me",
            get(users::handlers::handle_get_me).put(users::handlers::handle_update_me),
        )
        .route(
            "/api/users/change-password",
            post(users::handlers::handle_change_password),
        )
        // Tenants
        .route(
            "/api/tenants",
            get(tenancy::handlers::handle_list).post(tenancy::handlers::handle_create),
        )
        .route("/api/tenants/register", post(tenancy::handlers::handle_register))
        .route("/api/tenants/validate", post(tenancy::handlers::handle_validate))
        .route(
            "/api/tenants/:tenant_id",
            get(tenancy::handlers::handle_get)
                .put(tenancy::handlers::handle_update)
                .delete(tenancy::handlers::handle_delete),
        )
        // S3 bucket configurations
        .route(
            "/api/tenants/:tenant_id/s3-configs",
            get(buckets::handlers::handle_list).post(buckets::handlers::handle_create),
        )
        .route(
            "/api/tenants/:tenant_id/s3-configs/default",
            get(buckets::handlers::handle_get_default),
        )
        .route(
            "/api/tenants/:tenant_id/s3-configs/:id",
            get(buckets::handlers::handle_get)
                .put(buckets::handlers::handle_update)
                .delete(buckets::handlers::handle_delete),
        )
        .route(
            "/api/tenants/:tenant_id/buckets",
            get(buckets::handlers::handle_list),
        )
        // Documents
        .route("/api/documents", get(documents::handlers::handle_list))
        .route("/api/documents/upload", post(documents::handlers::handle_upload))
        .route(
            "/api/documents/job/:job_id",
            get(documents::handlers::handle_list_for_job),
        )
        .route(
            "/api/documents/:id",
            get(documents::handlers::handle_get).delete(documents::handlers::handle_delete),
        )
        .route(
            "/api/documents/:id/download",
            get(documents::handlers::handle_download),
        )
        // Jobs
        .route(
            "/api/jobs",
            get(jobs::handlers::handle_list).post(jobs::handlers::handle_create),
        )
        .route("/api/jobs/stats", get(jobs::handlers::handle_stats))
        .route(
            "/api/jobs/:id",
            get(jobs::handlers::handle_get)
                .put(jobs::handlers::handle_update)
                .delete(jobs::handlers::handle_delete),
        )
        .route("/api/jobs/:id/logs", get(jobs::handlers::handle_logs))
        .route(
            "/api/jobs/:id/documents",
            get(documents::handlers::handle_list_for_job),
        )
        .route("/api/jobs/:id/:action", post(jobs::handlers::handle_action))
        // Search & dashboard
        .route("/api/search", post(processing::search::handle_search))
        .route("/api/dashboard", get(dashboard::handle_dashboard))
        .layer(body_limit)
        .layer(middleware::from_fn_with_state(state.clone(), tenant_context))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use crate::auth::{Claims, JwtKeys};
    use crate::config::test_config;
    use crate::processing::{
        embedder::{Embedder, HashingEmbedder},
        JobRunner, Processor,
    };
    use crate::tenancy::TENANT_HEADER;
    use crate::storage::{FsStore, ObjectStore, StoreFactory};

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let config = test_config();
        // Never connects unless a handler touches the database.
        let db = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        let stores = StoreFactory::new(config.s3.clone());
        let uploads: Arc<dyn ObjectStore> = Arc::new(FsStore::new(dir.path()));
        let embedder: Arc<dyn Embedder> =
            Arc::new(HashingEmbedder::new(config.embedding.dimensions));
        let processor = Processor::new(
            db.clone(),
            stores.clone(),
            uploads.clone(),
            embedder.clone(),
            config.chunking,
        );
        let runner = JobRunner::new(
            Arc::new(processor),
            config.scheduler.max_concurrent_jobs,
        );
        AppState {
            db,
            jwt: JwtKeys::new(&config.jwt_secret, config.jwt_expiration_secs),
            config: Arc::new(config),
            uploads,
            stores,
            embedder,
            runner,
        }
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir));
        for path in ["/health", "/api/health"] {
            let response = app
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["status"], "UP");
            assert_eq!(json["service"], "docloader-api");
        }
    }

    #[tokio::test]
    async fn test_ping_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let response = build_router(test_state(&dir))
            .oneshot(Request::get("/api/auth/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_need_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir));
        for path in ["/api/jobs", "/api/dashboard", "/api/documents", "/api/users/me"] {
            let response = app
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
        }
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = build_router(test_state(&dir))
            .oneshot(
                Request::get("/api/jobs")
                    .header("Authorization", "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    fn token_for(state: &AppState, tenant_id: uuid::Uuid, role: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        state
            .jwt
            .encode(&Claims {
                sub: "ada".to_string(),
                user_id: uuid::Uuid::new_v4(),
                tenant_id,
                roles: vec![role.to_string()],
                iat: now,
                exp: now + 600,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_token_for_another_tenant_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let token = token_for(&state, uuid::Uuid::new_v4(), "USER");

        let response = build_router(state)
            .oneshot(
                Request::get("/api/jobs")
                    .header("Authorization", format!("Bearer {token}"))
                    .header(TENANT_HEADER, uuid::Uuid::new_v4().to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_tenant_admin_token_is_checked_too() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let token = token_for(&state, uuid::Uuid::new_v4(), "ADMIN");

        let response = build_router(state)
            .oneshot(
                Request::get("/api/dashboard")
                    .header("Authorization", format!("Bearer {token}"))
                    .header(TENANT_HEADER, uuid::Uuid::new_v4().to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
