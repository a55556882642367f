use std::{cell::RefCell, fmt, future::Future, sync::Arc};

use super::DbError;

tokio::task_local! {
    static SESSION_CONTEXT: RefCell<Option<ContextId>>;
}

/// ContextId
///
/// Opaque identifier of one logical unit of work, normally the inbound request's id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(Arc<str>);

impl ContextId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContextId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ContextId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ContextToken
///
/// Returned by `set_session_context`; hands the previous id back to `reset_session_context`.
#[must_use = "pass the token to reset_session_context to restore the previous id"]
#[derive(Debug)]
pub struct ContextToken {
    previous: Option<ContextId>,
}

/// scope
///
/// Runs `future` with `id` as the ambient context id. The id is visible to everything the
/// future awaits on the same task and to nothing else: concurrent requests and tasks spawned
/// from inside the scope each see their own (or no) id.
pub async fn scope<F: Future>(id: ContextId, future: F) -> F::Output {
    SESSION_CONTEXT.scope(RefCell::new(Some(id)), future).await
}

/// Returns the current task's context id.
pub fn get_session_context() -> Result<ContextId, DbError> {
    SESSION_CONTEXT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
        .ok_or(DbError::ContextMissing)
}

/// set_session_context
///
/// Replaces the id for the rest of the enclosing scope. Fails with `ContextMissing` when
/// called outside any `scope`, since there is no task-local slot to write to.
pub fn set_session_context(id: ContextId) -> Result<ContextToken, DbError> {
    SESSION_CONTEXT
        .try_with(|slot| ContextToken {
            previous: slot.replace(Some(id)),
        })
        .map_err(|_| DbError::ContextMissing)
}

/// Restores the id that was current when `token` was issued.
pub fn reset_session_context(token: ContextToken) {
    let restored = SESSION_CONTEXT.try_with(|slot| {
        slot.replace(token.previous);
    });
    if restored.is_err() {
        tracing::warn!("reset_session_context called outside of a session scope");
    }
}
