use anyhow::anyhow;
use bcrypt::{hash, verify, DEFAULT_COST};

use crate::errors::AppError;

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// bcrypt ignores everything past 72 bytes.
pub const MAX_PASSWORD_LENGTH: usize = 72;

/// Hashes a password with bcrypt on the blocking pool.
pub async fn hash_password(password: &str) -> Result<String, AppError> {
    hash_password_with_cost(password, DEFAULT_COST).await
}

pub async fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .map_err(|e| anyhow!("Password hashing task failed: {e}"))?
        .map_err(|e| AppError::Internal(anyhow!("Password hashing failed: {e}")))
}

/// `Ok(false)` on mismatch. A malformed stored hash also counts as a mismatch.
pub async fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let password_hash = password_hash.to_string();
    let matched = tokio::task::spawn_blocking(move || verify(password, &password_hash))
        .await
        .map_err(|e| anyhow!("Password verification task failed: {e}"))?;
    Ok(matched.unwrap_or(false))
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} bytes"
        )));
    }
    Ok(())
}
