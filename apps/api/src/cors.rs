use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

use crate::config::CorsSettings;

/// CORS for the browser client. `*` in the origin list allows any origin;
/// credentials are only allowed for an explicit origin list.
pub fn cors_layer(settings: &CorsSettings) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        // X-TenantID
        header::HeaderName::from_static("x-tenantid"),
    ];

    let cors = CorsLayer::new()
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers([header::CONTENT_DISPOSITION])
        .max_age(Duration::from_secs(settings.max_age_secs));

    if settings.allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    cors.allow_origin(origins).allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_for_explicit_and_wildcard_origins() {
        let _ = cors_layer(&CorsSettings {
            allowed_origins: vec!["http://localhost:3000".into(), "not a header\n".into()],
            max_age_secs: 60,
        });
        let _ = cors_layer(&CorsSettings {
            allowed_origins: vec!["*".into()],
            max_age_secs: 60,
        });
    }
}
