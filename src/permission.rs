use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{auth::RequestIdentity, error::ApiError, service::UserService};

/// Permission Trait
///
/// A capability check evaluated against the request identity before a handler runs.
/// `denial` is the error raised when the check answers no. An `Err` means the check itself
/// could not be made and is passed through untouched.
#[async_trait]
pub trait Permission: Send + Sync {
    async fn has_permission(&self, identity: &RequestIdentity) -> Result<bool, ApiError>;

    fn denial(&self) -> ApiError {
        ApiError::unauthorized()
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Any request carrying a resolved user.
pub struct IsAuthenticated;

#[async_trait]
impl Permission for IsAuthenticated {
    async fn has_permission(&self, identity: &RequestIdentity) -> Result<bool, ApiError> {
        Ok(identity.user_id.is_some())
    }
}

/// IsAdmin
///
/// The identity names an existing user flagged as administrator. Looks the user up, so list
/// `IsAuthenticated` first to keep anonymous requests away from the lookup.
pub struct IsAdmin {
    users: UserService,
}

impl IsAdmin {
    pub fn new(users: UserService) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Permission for IsAdmin {
    async fn has_permission(&self, identity: &RequestIdentity) -> Result<bool, ApiError> {
        let Some(user_id) = identity.user_id else {
            return Ok(false);
        };
        Ok(self.users.is_admin(user_id).await?)
    }
}

/// Always grants.
pub struct AllowAll;

#[async_trait]
impl Permission for AllowAll {
    async fn has_permission(&self, _identity: &RequestIdentity) -> Result<bool, ApiError> {
        Ok(true)
    }
}

/// PermissionGate
///
/// An ordered permission list. `check` evaluates it front to back and stops at the first
/// denial or failure, returning that error; later permissions are never evaluated.
#[derive(Clone, Default)]
pub struct PermissionGate {
    permissions: Vec<Arc<dyn Permission>>,
}

impl PermissionGate {
    pub fn new(permissions: Vec<Arc<dyn Permission>>) -> Self {
        Self { permissions }
    }

    pub async fn check(&self, identity: &RequestIdentity) -> Result<(), ApiError> {
        for permission in &self.permissions {
            if !permission.has_permission(identity).await? {
                tracing::debug!(
                    permission = permission.name(),
                    user_id = ?identity.user_id,
                    "permission denied"
                );
                return Err(permission.denial());
            }
        }
        Ok(())
    }
}

/// enforce_permissions
///
/// Route-layer middleware running the gate before the handler. Denials are rendered by
/// `ApiError` as `{"error_code", "message"}` with the permission's status.
pub async fn enforce_permissions(
    State(gate): State<PermissionGate>,
    identity: RequestIdentity,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    gate.check(&identity).await?;
    Ok(next.run(request).await)
}
