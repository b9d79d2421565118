//! Database fixtures for the `#[sqlx::test]` suites. Those suites are ignored by
//! default; run them with `DATABASE_URL` set and `cargo test -- --ignored`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::auth::{AuthUser, JwtKeys};
use crate::buckets::service::{insert_config, BucketConfigRequest, NewBucketConfig};
use crate::config::test_config;
use crate::models::bucket::BucketConfigRow;
use crate::models::job::{JobRow, JobStatus, SourceType};
use crate::models::user::{Role, UserRow};
use crate::processing::embedder::HashingEmbedder;
use crate::processing::runner::{JobExecutor, JobRunner};
use crate::state::AppState;
use crate::storage::{FsStore, StoreFactory};
use crate::tenancy::db_name_for;
use crate::users::service::{insert_user, NewUser};

pub const PASSWORD: &str = "secret-password";

/// Cheap bcrypt cost so fixtures stay fast.
pub async fn password_hash() -> String {
    crate::auth::password::hash_password_with_cost(PASSWORD, 4)
        .await
        .unwrap()
}

pub async fn seed_tenant(pool: &PgPool, subdomain: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO tenants (id, name, subdomain, db_name) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(format!("Tenant {subdomain}"))
        .bind(subdomain)
        .bind(db_name_for(subdomain))
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn seed_user(pool: &PgPool, tenant_id: Uuid, username: &str, role: Role) -> UserRow {
    let hash = password_hash().await;
    insert_user(
        pool,
        &NewUser {
            tenant_id,
            username,
            email: &format!("{username}@{tenant_id}.test"),
            password_hash: &hash,
            role,
        },
    )
    .await
    .unwrap()
}

pub async fn seed_bucket(
    pool: &PgPool,
    tenant_id: Uuid,
    name: &str,
    is_default: bool,
) -> BucketConfigRow {
    let new = NewBucketConfig::with_defaults(
        name.to_string(),
        format!("{}-docs", name.to_ascii_lowercase()),
        &BucketConfigRequest {
            is_default: Some(is_default),
            ..Default::default()
        },
        &test_config().s3,
    );
    insert_config(pool, tenant_id, &new).await.unwrap()
}

pub async fn seed_job(
    pool: &PgPool,
    user: &UserRow,
    source_type: SourceType,
    status: JobStatus,
) -> JobRow {
    sqlx::query_as(
        r#"
        INSERT INTO document_jobs
            (id, tenant_id, name, source_type, source_location, status, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.tenant_id)
    .bind("Nightly import")
    .bind(source_type.as_str())
    .bind("/reports")
    .bind(status.as_str())
    .bind(user.id)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub fn auth_for(user: &UserRow) -> AuthUser {
    AuthUser {
        user_id: user.id,
        tenant_id: user.tenant_id,
        username: user.username.clone(),
        role: user.role(),
    }
}

/// Reports every job it is asked to run instead of running it.
pub struct RecordingExecutor(UnboundedSender<Uuid>);

impl RecordingExecutor {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<Uuid>) {
        let (tx, rx) = unbounded_channel();
        (Arc::new(Self(tx)), rx)
    }
}

#[async_trait]
impl JobExecutor for RecordingExecutor {
    async fn execute(&self, job_id: Uuid) {
        let _ = self.0.send(job_id);
    }
}

pub fn app_state(pool: PgPool, uploads_dir: &Path, executor: Arc<dyn JobExecutor>) -> AppState {
    let config = test_config();
    AppState {
        db: pool,
        jwt: JwtKeys::new(&config.jwt_secret, config.jwt_expiration_secs),
        uploads: Arc::new(FsStore::new(uploads_dir)),
        stores: StoreFactory::new(config.s3.clone()),
        embedder: Arc::new(HashingEmbedder::new(config.embedding.dimensions)),
        runner: JobRunner::new(executor, config.scheduler.max_concurrent_jobs),
        config: Arc::new(config),
    }
}
