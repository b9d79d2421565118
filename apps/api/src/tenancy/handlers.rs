use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::buckets::service::provision_bucket;
use crate::errors::AppError;
use crate::models::bucket::BucketConfigResponse;
use crate::models::tenant::TenantRow;
use crate::models::user::UserProfile;
use crate::state::AppState;
use crate::tenancy::service::{
    self as tenants, TenantRequest, TenantUpdateRequest, TenantValidationRequest,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRegistrationResponse {
    #[serde(flatten)]
    pub tenant: TenantRow,
    pub admin: UserProfile,
    pub s3_bucket_config: BucketConfigResponse,
}

async fn register(state: &AppState, req: &TenantRequest) -> Result<TenantRegistrationResponse, AppError> {
    let created = tenants::create_tenant(&state.db, req, state.stores.defaults()).await?;
    provision_bucket(&state.stores, &created.bucket);
    Ok(TenantRegistrationResponse {
        admin: UserProfile::from(&created.admin),
        s3_bucket_config: BucketConfigResponse::from(&created.bucket),
        tenant: created.tenant,
    })
}

/// POST /api/tenants/register
pub async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<TenantRequest>,
) -> Result<(StatusCode, Json<TenantRegistrationResponse>), AppError> {
    let response = register(&state, &req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/tenants/validate
pub async fn handle_validate(
    State(state): State<AppState>,
    Json(req): Json<TenantValidationRequest>,
) -> Result<Json<Value>, AppError> {
    tenants::validate_tenant_fields(&req.name, &req.subdomain)?;
    if tenants::subdomain_taken(&state.db, &req.subdomain).await? {
        return Err(AppError::Conflict(format!(
            "Subdomain '{}' is already taken",
            req.subdomain.trim()
        )));
    }
    Ok(Json(json!({ "valid": true })))
}

/// POST /api/tenants
pub async fn handle_create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<TenantRequest>,
) -> Result<(StatusCode, Json<TenantRegistrationResponse>), AppError> {
    auth.require_system_admin()?;
    let response = register(&state, &req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/tenants
pub async fn handle_list(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<TenantRow>>, AppError> {
    auth.require_system_admin()?;
    Ok(Json(tenants::list(&state.db).await?))
}

/// GET /api/tenants/:id
pub async fn handle_get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TenantRow>, AppError> {
    if !auth.is_system_admin() && auth.tenant_id != id {
        return Err(AppError::Forbidden("Access denied".to_string()));
    }
    Ok(Json(tenants::get(&state.db, id).await?))
}

/// PUT /api/tenants/:id
pub async fn handle_update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<TenantUpdateRequest>,
) -> Result<Json<TenantRow>, AppError> {
    auth.require_tenant_admin(id)?;
    Ok(Json(tenants::update(&state.db, id, &req).await?))
}

/// DELETE /api/tenants/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.require_system_admin()?;
    if id == auth.tenant_id {
        return Err(AppError::Validation(
            "The system tenant cannot delete itself".to_string(),
        ));
    }
    tenants::delete(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
