use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints with no Permission Gate: health, sign-up, login and the token endpoints.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Load balancer health check.
        .route("/health", get(|| async { "ok" }))
        // POST /api/v1/user
        // Sign-up. GET on the same path is the authenticated listing.
        .route("/api/v1/user", post(handlers::create_user))
        .route("/api/v1/user/login", post(handlers::login))
        .route("/api/v1/auth/verify", post(handlers::verify_token))
        .route("/api/v1/auth/refresh", post(handlers::refresh_token))
}
