//! Router assembly.
//!
//! Each route group carries its own [`SecurityOptions`], so the pipeline's
//! policy is visible in one place. Health probes deliberately sit outside
//! the pipeline: orchestrators must never be rate limited or asked for
//! credentials.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{RequestIdLayer, SecurityOptions};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;
    let cors = build_cors_layer(&config.cors_allowed_origins);

    let probes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready));

    let auth_routes = Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route_layer(state.security_layer(SecurityOptions::auth_flow()));

    info!(
        max_body_bytes = config.max_request_body_size,
        "Router configured"
    );

    probes
        .merge(auth_routes)
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(RequestIdLayer::new())
        .with_state(state)
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin and is intended for development only.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_cors_layer_any() {
        let _layer = build_cors_layer(&["*".to_string()]);
    }

    #[test]
    fn test_build_cors_layer_specific() {
        let _layer = build_cors_layer(&[
            "https://memoria.example".to_string(),
            "https://app.memoria.example".to_string(),
        ]);
    }
}
