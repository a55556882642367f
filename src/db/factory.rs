use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{
    DbError,
    context::{self, ContextId},
    engine::EngineSet,
    session::Session,
};

/// Live sessions, plus how many scopes currently hold each id.
#[derive(Default)]
struct Registry {
    sessions: HashMap<ContextId, Arc<Session>>,
    leases: HashMap<ContextId, usize>,
}

impl Registry {
    fn acquire(&mut self, id: &ContextId) {
        *self.leases.entry(id.clone()).or_default() += 1;
    }

    /// Drops one lease on `id`. Hands back the session only when that was the last lease,
    /// so an inner scope reusing an id never tears down the outer scope's session.
    fn release(&mut self, id: &ContextId) -> Option<Arc<Session>> {
        match self.leases.get_mut(id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                None
            }
            _ => {
                self.leases.remove(id);
                self.sessions.remove(id)
            }
        }
    }
}

/// SessionFactory
///
/// Hands out exactly one `Session` per execution-context id and forgets it when the context
/// ends. Cloning is cheap; every clone sees the same registry and engines.
#[derive(Clone)]
pub struct SessionFactory {
    engines: Arc<EngineSet>,
    registry: Arc<Mutex<Registry>>,
}

impl SessionFactory {
    pub fn new(engines: EngineSet) -> Self {
        Self {
            engines: Arc::new(engines),
            registry: Arc::default(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// resolve
    ///
    /// The ambient session: the one bound to the current task's context id, created on first
    /// use. Fails with `ContextMissing` outside of a scope.
    pub fn resolve(&self) -> Result<Arc<Session>, DbError> {
        let id = context::get_session_context()?;
        let session = self
            .registry()
            .sessions
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!(context = %id, "opening scoped session");
                Arc::new(Session::scoped(id, self.engines.clone()))
            })
            .clone();
        Ok(session)
    }

    /// A fresh session outside of any context. Callers own its lifetime; prefer `isolated`.
    pub fn session(&self) -> Session {
        Session::unscoped(self.engines.clone())
    }

    /// isolated
    ///
    /// Runs `op` with its own disposable session, one that does not join the ambient unit of
    /// work. The session is closed whether `op` succeeds or fails; if the returned future is
    /// dropped early, the session goes with it and rolls back anything it had open.
    pub async fn isolated<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let session = Arc::new(self.session());
        let result = op(session.clone()).await;
        if let Err(err) = session.close().await {
            tracing::warn!(error = %err, "failed to close isolated session");
        }
        result
    }

    /// scope
    ///
    /// Runs `future` as one unit of work identified by `id`, then releases that id's session.
    /// Scopes nested under the same id share one session; it is released when the outermost
    /// of them ends.
    pub async fn scope<F: Future>(&self, id: ContextId, future: F) -> F::Output {
        self.registry().acquire(&id);
        let guard = ScopeGuard {
            factory: self.clone(),
            id: Some(id.clone()),
        };
        context::scope(id, async move {
            let output = future.await;
            guard.release().await;
            output
        })
        .await
    }

    /// Closes and forgets the session bound to `id`, if there is one.
    pub async fn remove(&self, id: &ContextId) {
        let session = self.registry().sessions.remove(id);
        Self::close(id, session).await;
    }

    async fn close(id: &ContextId, session: Option<Arc<Session>>) {
        if let Some(session) = session {
            if let Err(err) = session.close().await {
                tracing::warn!(context = %id, error = %err, "failed to close scoped session");
            }
            tracing::debug!(context = %id, "released scoped session");
        }
    }

    /// Number of contexts that currently own a session.
    pub fn active_sessions(&self) -> usize {
        self.registry().sessions.len()
    }
}

/// Tears a scope down. `release` does it properly; `Drop` covers cancellation, where all
/// that can be done synchronously is forgetting the id. The session then drops with its
/// last reference and its open transaction rolls back.
struct ScopeGuard {
    factory: SessionFactory,
    id: Option<ContextId>,
}

impl ScopeGuard {
    async fn release(mut self) {
        if let Some(id) = self.id.take() {
            let session = self.factory.registry().release(&id);
            SessionFactory::close(&id, session).await;
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            tracing::debug!(context = %id, "scope cancelled before teardown");
            self.factory.registry().release(&id);
        }
    }
}
