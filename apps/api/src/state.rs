use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::processing::{embedder::Embedder, JobRunner};
use crate::storage::{ObjectStore, StoreFactory};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtKeys,
    /// Where direct uploads are kept (filesystem or the default bucket).
    pub uploads: Arc<dyn ObjectStore>,
    /// Builds per-bucket S3 stores from tenant configurations.
    pub stores: StoreFactory,
    /// Embeds search queries; the processor holds its own handle.
    pub embedder: Arc<dyn Embedder>,
    pub runner: JobRunner,
}
