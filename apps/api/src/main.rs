mod auth;
mod buckets;
mod config;
mod cors;
mod dashboard;
mod db;
mod documents;
mod errors;
mod jobs;
mod models;
mod processing;
mod routes;
mod scheduler;
mod state;
mod storage;
mod tenancy;
#[cfg(test)]
mod test_support;
mod users;
mod validation;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::processing::{embedder, JobRunner, Processor};
use crate::routes::build_router;
use crate::scheduler::Scheduler;
use crate::state::AppState;
use crate::storage::StoreFactory;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={},tower_http={}",
                env!("CARGO_CRATE_NAME"),
                &config.rust_log,
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting DocLoader API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    run_migrations(&db).await?;

    if let Some(admin) = &config.bootstrap_admin {
        tenancy::service::ensure_system_admin(&db, &admin.username, &admin.email, &admin.password)
            .await?;
    }

    // Initialize object storage
    let stores = StoreFactory::new(config.s3.clone());
    let uploads = stores.uploads(&config).await;
    if let Err(e) = uploads.ensure_bucket().await {
        warn!("Upload storage is not ready yet: {e}");
    }
    info!("Upload storage: {:?}", config.storage);

    // Tenant buckets may have been configured while storage was down
    match buckets::service::provision_all(&db, &stores).await {
        Ok(count) => info!("Provisioning {count} tenant bucket(s)"),
        Err(e) => warn!("Could not list tenant buckets to provision: {e}"),
    }

    // Initialize embedder
    let embedder: Arc<dyn embedder::Embedder> = Arc::from(embedder::from_settings(&config.embedding)?);
    match &config.embedding.api_url {
        Some(url) => info!("Embedding via {url} (model: {})", config.embedding.model),
        None => info!(
            "Embedding with the built-in hashing embedder ({} dimensions)",
            embedder.dimensions()
        ),
    }

    // Initialize job runner
    let processor = Processor::new(
        db.clone(),
        stores.clone(),
        uploads.clone(),
        embedder.clone(),
        config.chunking,
    );
    let runner = JobRunner::new(Arc::new(processor), config.scheduler.max_concurrent_jobs);

    if config.scheduler.enabled {
        let scheduler = Scheduler::new(db.clone(), runner.clone(), config.scheduler.clone());
        tokio::spawn(scheduler.run());
    } else {
        info!("Scheduler disabled; jobs run only when started explicitly");
    }

    let port = config.port;
    let state = AppState {
        db,
        jwt: JwtKeys::new(&config.jwt_secret, config.jwt_expiration_secs),
        config: Arc::new(config),
        uploads,
        stores,
        embedder,
        runner,
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
