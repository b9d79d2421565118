use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::password::{hash_password, validate_password, verify_password};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::user::{Role, UserProfile, UserRow};
use crate::state::AppState;
use crate::tenancy::{service as tenants, TenantHint};
use crate::users::service::{self as users, NewUser};
use crate::validation::{require_len, validate_email};

const BAD_CREDENTIALS: &str = "Invalid username or password";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Subdomain or id of the tenant to sign in to.
    pub tenant: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub tenant_subdomain: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub token_type: &'static str,
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
}

impl AuthResponse {
    fn new(token: String, user: &UserRow) -> Self {
        Self {
            token,
            token_type: "Bearer",
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            tenant_id: user.tenant_id,
            roles: vec![user.role().as_str().to_string()],
        }
    }
}

/// The tenant a login targets: a non-blank body `tenant` beats the request hint.
fn login_tenant_key<'a>(explicit: Option<&'a str>, hint: &'a TenantHint) -> Option<&'a str> {
    explicit
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or(hint.0.as_deref())
}

/// Finds the account a login names. An explicit tenant wins over the request's
/// tenant hint; without either the username must be unique across tenants.
async fn find_login_user(
    pool: &PgPool,
    username: &str,
    tenant_key: Option<&str>,
) -> Result<Option<UserRow>, AppError> {
    match tenant_key {
        Some(key) => {
            let in_tenant = match tenants::find_by_key(pool, key).await? {
                Some(tenant) => users::find_in_tenant(pool, tenant.id, username).await?,
                None => None,
            };
            match in_tenant {
                Some(user) => Ok(Some(user)),
                // System administrators sign in from any tenant's host.
                None => users::find_system_admin(pool, username).await,
            }
        }
        None => {
            let mut candidates = users::find_all_by_username(pool, username).await?;
            match candidates.len() {
                0 => Ok(None),
                1 => Ok(candidates.pop()),
                _ => Err(AppError::Validation(
                    "Username exists in several tenants; specify the tenant to sign in to"
                        .to_string(),
                )),
            }
        }
    }
}

/// POST /api/auth/login
pub async fn handle_login(
    State(state): State<AppState>,
    Extension(hint): Extension<TenantHint>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::Validation(
            "Username and password are required".to_string(),
        ));
    }

    let tenant_key = login_tenant_key(req.tenant.as_deref(), &hint);

    let Some(user) = find_login_user(&state.db, &req.username, tenant_key).await? else {
        warn!("Login failed for unknown user '{}'", req.username.trim());
        return Err(AppError::Unauthorized(BAD_CREDENTIALS.to_string()));
    };

    if !verify_password(&req.password, &user.password_hash).await? {
        warn!("Login failed for user '{}': wrong password", user.username);
        return Err(AppError::Unauthorized(BAD_CREDENTIALS.to_string()));
    }

    let token = state.jwt.issue(&user)?;
    info!("User {} logged in to tenant {}", user.username, user.tenant_id);
    Ok(Json(AuthResponse::new(token, &user)))
}

/// POST /api/auth/register
pub async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    require_len("Username", &req.username, 3, 50)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let tenant = tenants::find_by_subdomain(&state.db, &req.tenant_subdomain)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Tenant '{}' not found", req.tenant_subdomain.trim()))
        })?;

    if users::username_taken(&state.db, tenant.id, &req.username).await? {
        return Err(AppError::Conflict("Username is already taken".to_string()));
    }
    if users::email_taken(&state.db, tenant.id, &req.email, None).await? {
        return Err(AppError::Conflict("Email is already in use".to_string()));
    }

    let password_hash = hash_password(&req.password).await?;
    let user = users::insert_user(
        &state.db,
        &NewUser {
            tenant_id: tenant.id,
            username: &req.username,
            email: &req.email,
            password_hash: &password_hash,
            role: Role::User,
        },
    )
    .await?;

    let token = state.jwt.issue(&user)?;
    Ok((StatusCode::CREATED, Json(AuthResponse::new(token, &user))))
}

/// GET /api/auth/me
pub async fn handle_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserProfile>, AppError> {
    let user = users::get_by_id(&state.db, auth.user_id).await?;
    Ok(Json(UserProfile::from(&user)))
}

/// GET /api/auth/ping
pub async fn handle_ping() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Auth service is running"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_tenant, seed_user};

    #[test]
    fn test_body_tenant_beats_hint() {
        let hint = TenantHint(Some("globex".to_string()));
        assert_eq!(login_tenant_key(Some(" acme "), &hint), Some("acme"));
        assert_eq!(login_tenant_key(Some("  "), &hint), Some("globex"));
        assert_eq!(login_tenant_key(None, &hint), Some("globex"));
        assert_eq!(login_tenant_key(None, &TenantHint::default()), None);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_login_prefers_named_tenant(pool: PgPool) {
        let acme = seed_tenant(&pool, "acme").await;
        let globex = seed_tenant(&pool, "globex").await;
        seed_user(&pool, acme, "ada", Role::User).await;
        let in_globex = seed_user(&pool, globex, "ada", Role::User).await;

        let found = find_login_user(&pool, "ada", Some("globex")).await.unwrap().unwrap();
        assert_eq!(found.id, in_globex.id);

        let by_id = find_login_user(&pool, "ada", Some(&globex.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.id, in_globex.id);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_ambiguous_username_without_tenant_is_rejected(pool: PgPool) {
        let acme = seed_tenant(&pool, "acme").await;
        let globex = seed_tenant(&pool, "globex").await;
        seed_user(&pool, acme, "ada", Role::User).await;
        seed_user(&pool, globex, "ada", Role::User).await;

        let err = find_login_user(&pool, "ada", None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_unique_username_needs_no_tenant(pool: PgPool) {
        let acme = seed_tenant(&pool, "acme").await;
        let ada = seed_user(&pool, acme, "ada", Role::User).await;

        let found = find_login_user(&pool, "ada", None).await.unwrap().unwrap();
        assert_eq!(found.id, ada.id);
        assert!(find_login_user(&pool, "grace", None).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn test_system_admin_signs_in_from_any_tenant(pool: PgPool) {
        let system = seed_tenant(&pool, "system").await;
        seed_tenant(&pool, "acme").await;
        let root = seed_user(&pool, system, "root", Role::SystemAdmin).await;

        let found = find_login_user(&pool, "root", Some("acme")).await.unwrap().unwrap();
        assert_eq!(found.id, root.id);
        // Unknown tenants still fall back to the system admin lookup.
        let found = find_login_user(&pool, "root", Some("nowhere")).await.unwrap().unwrap();
        assert_eq!(found.id, root.id);
    }
}
