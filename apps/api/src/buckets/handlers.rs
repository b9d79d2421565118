use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::buckets::service::{self as buckets, BucketConfigRequest};
use crate::errors::AppError;
use crate::models::bucket::BucketConfigResponse;
use crate::state::AppState;
use crate::tenancy::service as tenants;

async fn authorize(state: &AppState, auth: &AuthUser, tenant_id: Uuid) -> Result<(), AppError> {
    auth.require_tenant_admin(tenant_id)?;
    // 404 rather than an empty list for tenants that do not exist.
    tenants::get(&state.db, tenant_id).await?;
    Ok(())
}

/// GET /api/tenants/:tenant_id/s3-configs
pub async fn handle_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<BucketConfigResponse>>, AppError> {
    authorize(&state, &auth, tenant_id).await?;
    let rows = buckets::list(&state.db, tenant_id).await?;
    Ok(Json(rows.iter().map(BucketConfigResponse::from).collect()))
}

/// GET /api/tenants/:tenant_id/s3-configs/default
pub async fn handle_get_default(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<BucketConfigResponse>, AppError> {
    authorize(&state, &auth, tenant_id).await?;
    let config = buckets::get_default(&state.db, tenant_id).await?;
    Ok(Json(BucketConfigResponse::from(&config)))
}

/// GET /api/tenants/:tenant_id/s3-configs/:id
pub async fn handle_get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<BucketConfigResponse>, AppError> {
    authorize(&state, &auth, tenant_id).await?;
    let config = buckets::get(&state.db, tenant_id, id).await?;
    Ok(Json(BucketConfigResponse::from(&config)))
}

/// POST /api/tenants/:tenant_id/s3-configs
pub async fn handle_create(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<BucketConfigRequest>,
) -> Result<(StatusCode, Json<BucketConfigResponse>), AppError> {
    authorize(&state, &auth, tenant_id).await?;
    let config = buckets::create(&state.db, tenant_id, &req, state.stores.defaults()).await?;
    buckets::provision_bucket(&state.stores, &config);
    Ok((StatusCode::CREATED, Json(BucketConfigResponse::from(&config))))
}

/// PUT /api/tenants/:tenant_id/s3-configs/:id
pub async fn handle_update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
    Json(req): Json<BucketConfigRequest>,
) -> Result<Json<BucketConfigResponse>, AppError> {
    authorize(&state, &auth, tenant_id).await?;
    let config = buckets::update(&state.db, tenant_id, id, &req).await?;
    if req.bucket_name.is_some() {
        buckets::provision_bucket(&state.stores, &config);
    }
    Ok(Json(BucketConfigResponse::from(&config)))
}

/// DELETE /api/tenants/:tenant_id/s3-configs/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &auth, tenant_id).await?;
    buckets::delete(&state.db, tenant_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
