use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::{Role, UserRow};

pub struct NewUser<'a> {
    pub tenant_id: Uuid,
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}

/// Profile fields a user may change about themselves. `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

pub async fn insert_user<'e, E>(executor: E, new: &NewUser<'_>) -> Result<UserRow, AppError>
where
    E: PgExecutor<'e>,
{
    let user: UserRow = sqlx::query_as(
        r#"
        INSERT INTO users (id, tenant_id, username, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.tenant_id)
    .bind(new.username.trim())
    .bind(new.email.trim())
    .bind(new.password_hash)
    .bind(new.role.as_str())
    .fetch_one(executor)
    .await?;

    info!(
        "Created user {} ({}) in tenant {}",
        user.username,
        new.role.as_str(),
        user.tenant_id
    );
    Ok(user)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<UserRow>, AppError> {
    Ok(sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<UserRow, AppError> {
    find_by_id(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {id} not found")))
}

pub async fn find_in_tenant(
    pool: &PgPool,
    tenant_id: Uuid,
    username: &str,
) -> Result<Option<UserRow>, AppError> {
    Ok(
        sqlx::query_as("SELECT * FROM users WHERE tenant_id = $1 AND username = $2")
            .bind(tenant_id)
            .bind(username.trim())
            .fetch_optional(pool)
            .await?,
    )
}

/// Every account with this username, across tenants.
pub async fn find_all_by_username(pool: &PgPool, username: &str) -> Result<Vec<UserRow>, AppError> {
    Ok(
        sqlx::query_as("SELECT * FROM users WHERE username = $1 ORDER BY created_at")
            .bind(username.trim())
            .fetch_all(pool)
            .await?,
    )
}

pub async fn find_system_admin(pool: &PgPool, username: &str) -> Result<Option<UserRow>, AppError> {
    Ok(
        sqlx::query_as("SELECT * FROM users WHERE username = $1 AND role = $2 LIMIT 1")
            .bind(username.trim())
            .bind(Role::SystemAdmin.as_str())
            .fetch_optional(pool)
            .await?,
    )
}

pub async fn username_taken(
    pool: &PgPool,
    tenant_id: Uuid,
    username: &str,
) -> Result<bool, AppError> {
    Ok(find_in_tenant(pool, tenant_id, username).await?.is_some())
}

pub async fn email_taken(
    pool: &PgPool,
    tenant_id: Uuid,
    email: &str,
    except_user: Option<Uuid>,
) -> Result<bool, AppError> {
    let taken: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM users
            WHERE tenant_id = $1 AND lower(email) = lower($2)
              AND ($3::uuid IS NULL OR id <> $3)
        )
        "#,
    )
    .bind(tenant_id)
    .bind(email.trim())
    .bind(except_user)
    .fetch_one(pool)
    .await?;
    Ok(taken)
}

pub async fn list_by_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<UserRow>, AppError> {
    Ok(
        sqlx::query_as("SELECT * FROM users WHERE tenant_id = $1 ORDER BY username")
            .bind(tenant_id)
            .fetch_all(pool)
            .await?,
    )
}

pub async fn update_profile(
    pool: &PgPool,
    user_id: Uuid,
    patch: &ProfilePatch,
) -> Result<UserRow, AppError> {
    let user: UserRow = sqlx::query_as(
        r#"
        UPDATE users SET
            email = COALESCE($2, email),
            first_name = COALESCE($3, first_name),
            last_name = COALESCE($4, last_name),
            phone = COALESCE($5, phone),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(patch.email.as_deref())
    .bind(patch.first_name.as_deref())
    .bind(patch.last_name.as_deref())
    .bind(patch.phone.as_deref())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

    info!("Updated profile of user {}", user.username);
    Ok(user)
}

pub async fn update_password_hash(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<(), AppError> {
    let result =
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(pool)
            .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User {user_id} not found")));
    }
    info!("Password changed for user {user_id}");
    Ok(())
}
