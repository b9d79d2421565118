pub mod handlers;
pub mod jwt;
pub mod password;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::Role;
use crate::state::AppState;
use crate::tenancy::{service as tenants, TenantHint};

pub use jwt::{Claims, JwtKeys};

/// The authenticated caller, taken from a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub role: Role,
}

impl AuthUser {
    pub fn from_claims(claims: Claims) -> Self {
        let role = claims
            .roles
            .iter()
            .filter_map(|r| Role::parse(r))
            .min_by_key(|r| match r {
                Role::SystemAdmin => 0,
                Role::Admin => 1,
                Role::TenantAdmin => 2,
                Role::User => 3,
            })
            .unwrap_or(Role::User);
        Self {
            user_id: claims.user_id,
            tenant_id: claims.tenant_id,
            username: claims.sub,
            role,
        }
    }

    pub fn is_system_admin(&self) -> bool {
        self.role == Role::SystemAdmin
    }

    /// `ADMIN`, `TENANT_ADMIN` and `SYSTEM_ADMIN` all administer a tenant.
    pub fn is_tenant_admin(&self) -> bool {
        matches!(self.role, Role::SystemAdmin | Role::Admin | Role::TenantAdmin)
    }

    /// System admins administer every tenant; tenant admins only their own.
    pub fn can_admin_tenant(&self, tenant_id: Uuid) -> bool {
        self.is_system_admin() || (self.is_tenant_admin() && self.tenant_id == tenant_id)
    }

    pub fn require_system_admin(&self) -> Result<(), AppError> {
        if self.is_system_admin() {
            Ok(())
        } else {
            warn!("User {} denied system admin operation", self.username);
            Err(AppError::Forbidden("Access denied".to_string()))
        }
    }

    pub fn require_tenant_admin(&self, tenant_id: Uuid) -> Result<(), AppError> {
        if self.can_admin_tenant(tenant_id) {
            Ok(())
        } else {
            warn!(
                "User {} denied admin operation on tenant {tenant_id}",
                self.username
            );
            Err(AppError::Forbidden("Access denied".to_string()))
        }
    }
}

pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;
        let user = AuthUser::from_claims(state.jwt.validate(token)?);

        let hint = parts
            .extensions
            .get::<TenantHint>()
            .and_then(|h| h.0.clone());
        if let Some(hint) = hint {
            if !user.is_system_admin() && !hint_matches(state, &hint, user.tenant_id).await? {
                warn!(
                    "User {} of tenant {} sent a request for tenant '{hint}'",
                    user.username, user.tenant_id
                );
                return Err(AppError::Forbidden(
                    "Token does not belong to the requested tenant".to_string(),
                ));
            }
        }

        Ok(user)
    }
}

async fn hint_matches(state: &AppState, hint: &str, tenant_id: Uuid) -> Result<bool, AppError> {
    if let Ok(id) = Uuid::parse_str(hint) {
        return Ok(id == tenant_id);
    }
    Ok(tenants::find_by_subdomain(&state.db, hint)
        .await?
        .is_some_and(|t| t.id == tenant_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn claims(roles: &[&str]) -> Claims {
        Claims {
            sub: "ada".into(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn test_highest_role_wins() {
        let user = AuthUser::from_claims(claims(&["USER", "ROLE_ADMIN"]));
        assert_eq!(user.role, Role::Admin);
        let user = AuthUser::from_claims(claims(&["bogus"]));
        assert_eq!(user.role, Role::User);
    }

    #[test]
    fn test_tenant_admin_scope() {
        let admin = AuthUser::from_claims(claims(&["TENANT_ADMIN"]));
        assert!(admin.can_admin_tenant(admin.tenant_id));
        assert!(!admin.can_admin_tenant(Uuid::new_v4()));
        assert!(admin.require_system_admin().is_err());

        let user = AuthUser::from_claims(claims(&["USER"]));
        assert!(!user.can_admin_tenant(user.tenant_id));

        let root = AuthUser::from_claims(claims(&["SYSTEM_ADMIN"]));
        assert!(root.can_admin_tenant(Uuid::new_v4()));
        assert!(root.require_system_admin().is_ok());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Bearer abc.def.ghi")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("abc.def.ghi"));

        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Basic Zm9vOmJhcg==")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), None);
    }
}
