use std::sync::Arc;

use crate::{
    AppState, handlers,
    permission::{IsAdmin, IsAuthenticated, PermissionGate, enforce_permissions},
};
use axum::{Router, middleware, routing::delete};

/// Admin Router Module
///
/// Routes restricted to administrators. `IsAuthenticated` comes first so anonymous callers
/// are turned away before `IsAdmin` looks anyone up.
pub fn admin_routes(state: &AppState) -> Router<AppState> {
    let gate = PermissionGate::new(vec![
        Arc::new(IsAuthenticated),
        Arc::new(IsAdmin::new(state.users.clone())),
    ]);

    Router::<AppState>::new()
        // DELETE /api/v1/user/{user_id}
        // GET on the same path lives in the authenticated router; merge joins the two.
        .route("/api/v1/user/{user_id}", delete(handlers::delete_user))
        .route_layer(middleware::from_fn_with_state(gate, enforce_permissions))
}
