//! Tenant resolution and tenant lifecycle.
//!
//! Isolation is row-level: every tenant-owned table carries `tenant_id`, and
//! every query the handlers run is scoped by the caller's tenant. The hint
//! read off the request by [`tenant_context`] only selects a tenant at login
//! and cross-checks the token on authenticated routes.

pub mod handlers;
pub mod service;

use axum::{
    extract::{Request, State},
    http::{header::HOST, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::config::TenantResolverStrategy;
use crate::errors::AppError;
use crate::state::AppState;

pub const TENANT_HEADER: &str = "X-TenantID";

/// Tenant named by the incoming request, before any authentication.
/// Holds a subdomain or a tenant id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantHint(pub Option<String>);

pub fn resolve_tenant_hint(
    strategy: TenantResolverStrategy,
    host: Option<&str>,
    headers: &HeaderMap,
    path: &str,
) -> Option<String> {
    match strategy {
        TenantResolverStrategy::Subdomain => {
            let host = host?.split(':').next()?;
            let (first, rest) = host.split_once('.')?;
            if first.is_empty() || rest.is_empty() {
                return None;
            }
            Some(first.to_ascii_lowercase())
        }
        TenantResolverStrategy::Header => headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from),
        TenantResolverStrategy::Path => {
            let first = path.trim_start_matches('/').split('/').next()?;
            if first.is_empty() || first == "api" || first.starts_with('$') {
                None
            } else {
                Some(first.to_string())
            }
        }
        TenantResolverStrategy::None => None,
    }
}

/// Stores the request's [`TenantHint`] in its extensions.
pub async fn tenant_context(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let hint = resolve_tenant_hint(
        state.config.tenant_resolver,
        host.as_deref(),
        request.headers(),
        request.uri().path(),
    );
    if let Some(tenant) = &hint {
        debug!("Request {} resolved tenant hint '{tenant}'", request.uri().path());
    }
    request.extensions_mut().insert(TenantHint(hint));
    next.run(request).await
}

/// Name of the logical database recorded for a tenant.
pub fn db_name_for(subdomain: &str) -> String {
    format!("tenant_{subdomain}")
}

pub fn validate_subdomain(subdomain: &str) -> Result<(), AppError> {
    let len = subdomain.chars().count();
    if !(3..=50).contains(&len) {
        return Err(AppError::Validation(
            "Subdomain must be between 3 and 50 characters".to_string(),
        ));
    }
    if !subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::Validation(
            "Subdomain can only contain lowercase letters, numbers, and hyphens".to_string(),
        ));
    }
    if subdomain.starts_with('-') || subdomain.ends_with('-') {
        return Err(AppError::Validation(
            "Subdomain cannot start or end with a hyphen".to_string(),
        ));
    }
    Ok(())
}
