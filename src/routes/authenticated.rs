use std::sync::Arc;

use crate::{
    AppState, handlers,
    permission::{IsAuthenticated, PermissionGate, enforce_permissions},
};
use axum::{Router, middleware, routing::get};

/// Authenticated Router Module
///
/// Routes open to any identified caller. The gate runs as a route layer, after the
/// `authenticate` middleware has attached the request identity.
pub fn authenticated_routes() -> Router<AppState> {
    let gate = PermissionGate::new(vec![Arc::new(IsAuthenticated)]);

    Router::<AppState>::new()
        // GET /api/v1/user?limit=&prev=
        .route("/api/v1/user", get(handlers::get_user_list))
        // GET /api/v1/user/{user_id}
        .route("/api/v1/user/{user_id}", get(handlers::get_user))
        .route_layer(middleware::from_fn_with_state(gate, enforce_permissions))
}
