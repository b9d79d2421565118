use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    /// Unknown role strings degrade to `User`, the least privileged role.
    pub fn role(&self) -> Role {
        Role::parse(&self.role).unwrap_or(Role::User)
    }
}

/// User roles. `Admin` and `TenantAdmin` both administer their own tenant;
/// `SystemAdmin` administers every tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SystemAdmin,
    Admin,
    TenantAdmin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SystemAdmin => "SYSTEM_ADMIN",
            Role::Admin => "ADMIN",
            Role::TenantAdmin => "TENANT_ADMIN",
            Role::User => "USER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix("ROLE_").unwrap_or(s);
        match s.to_ascii_uppercase().as_str() {
            "SYSTEM_ADMIN" => Some(Role::SystemAdmin),
            "ADMIN" => Some(Role::Admin),
            "TENANT_ADMIN" => Some(Role::TenantAdmin),
            "USER" => Some(Role::User),
            _ => None,
        }
    }
}

/// Public view of a user. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&UserRow> for UserProfile {
    fn from(u: &UserRow) -> Self {
        Self {
            id: u.id,
            tenant_id: u.tenant_id,
            username: u.username.clone(),
            email: u.email.clone(),
            roles: vec![u.role().as_str().to_string()],
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            phone: u.phone.clone(),
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_accepts_spring_style_authorities() {
        assert_eq!(Role::parse("ROLE_ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("system_admin"), Some(Role::SystemAdmin));
        assert_eq!(Role::parse("TENANT_ADMIN"), Some(Role::TenantAdmin));
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn test_role_round_trips_through_as_str() {
        for role in [Role::SystemAdmin, Role::Admin, Role::TenantAdmin, Role::User] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
    }
}
