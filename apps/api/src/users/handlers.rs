use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::password::{hash_password, validate_password, verify_password};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::user::UserProfile;
use crate::state::AppState;
use crate::users::service::{self as users, ProfilePatch};
use crate::validation::{blank_to_none, max_len, validate_email};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// GET /api/users/me
pub async fn handle_get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserProfile>, AppError> {
    let user = users::get_by_id(&state.db, auth.user_id).await?;
    Ok(Json(UserProfile::from(&user)))
}

/// PUT /api/users/me
pub async fn handle_update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, AppError> {
    let patch = ProfilePatch {
        email: blank_to_none(req.email),
        first_name: blank_to_none(req.first_name),
        last_name: blank_to_none(req.last_name),
        phone: blank_to_none(req.phone),
    };
    max_len("First name", patch.first_name.as_deref(), 50)?;
    max_len("Last name", patch.last_name.as_deref(), 50)?;
    max_len("Phone", patch.phone.as_deref(), 20)?;

    if let Some(email) = &patch.email {
        validate_email(email)?;
        if users::email_taken(&state.db, auth.tenant_id, email, Some(auth.user_id)).await? {
            return Err(AppError::Conflict("Email is already in use".to_string()));
        }
    }

    let user = users::update_profile(&state.db, auth.user_id, &patch).await?;
    Ok(Json(UserProfile::from(&user)))
}

/// POST /api/users/change-password
pub async fn handle_change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, AppError> {
    let user = users::get_by_id(&state.db, auth.user_id).await?;
    if !verify_password(&req.current_password, &user.password_hash).await? {
        return Err(AppError::Validation(
            "Current password is incorrect".to_string(),
        ));
    }
    validate_password(&req.new_password)?;

    let password_hash = hash_password(&req.new_password).await?;
    users::update_password_hash(&state.db, auth.user_id, &password_hash).await?;
    Ok(Json(json!({ "message": "Password changed successfully" })))
}

/// GET /api/users
pub async fn handle_list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<UserProfile>>, AppError> {
    auth.require_tenant_admin(auth.tenant_id)?;
    let rows = users::list_by_tenant(&state.db, auth.tenant_id).await?;
    Ok(Json(rows.iter().map(UserProfile::from).collect()))
}
