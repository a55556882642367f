use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::{
    DbError,
    context::ContextId,
    engine::{EngineSet, EngineTransaction, EngineType},
    statement::{QueryResult, Statement, StatementKind},
};

/// route
///
/// Picks the endpoint for one statement. Anything issued while the session is flushing,
/// and every mutation, goes to the Writer; free-standing reads go to the Reader.
pub fn route(flushing: bool, kind: StatementKind) -> EngineType {
    if flushing || kind.is_mutation() {
        EngineType::Writer
    } else {
        EngineType::Reader
    }
}

#[derive(Default)]
struct SessionState {
    pending: Vec<Statement>,
    // Set by the first flush and held until the transaction is finalized: the flushed rows
    // only exist inside the writer transaction until then.
    flushing: bool,
    transaction: Option<Box<dyn EngineTransaction>>,
    closed: bool,
}

impl SessionState {
    fn ensure_open(&self) -> Result<(), DbError> {
        if self.closed {
            Err(DbError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

/// Session
///
/// A unit of work that routes each statement to the Writer or the Reader.
///
/// Writes never leave the session directly: they are buffered (`add`) or pushed through a
/// flush (`execute`), which opens the writer transaction on first use. Reads autoflush first,
/// so they always observe the session's own changes. Statements are serialized through an
/// async mutex, so program order is the execution order.
pub struct Session {
    scope: Option<ContextId>,
    engines: Arc<EngineSet>,
    state: Mutex<SessionState>,
    depth: AtomicUsize,
}

impl Session {
    /// A session bound to an execution context. Only the factory builds these.
    pub(crate) fn scoped(id: ContextId, engines: Arc<EngineSet>) -> Self {
        Self::build(Some(id), engines)
    }

    /// A session that belongs to no context.
    pub(crate) fn unscoped(engines: Arc<EngineSet>) -> Self {
        Self::build(None, engines)
    }

    fn build(scope: Option<ContextId>, engines: Arc<EngineSet>) -> Self {
        Self {
            scope,
            engines,
            state: Mutex::new(SessionState::default()),
            depth: AtomicUsize::new(0),
        }
    }

    /// The context id this session is bound to (`None` for isolated sessions).
    pub fn context_id(&self) -> Option<&ContextId> {
        self.scope.as_ref()
    }

    pub async fn is_flushing(&self) -> bool {
        self.state.lock().await.flushing
    }

    pub async fn has_pending(&self) -> bool {
        !self.state.lock().await.pending.is_empty()
    }

    /// Buffers a change until the next flush, read, or commit.
    pub async fn add(&self, statement: Statement) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        state.pending.push(statement);
        Ok(())
    }

    /// Sends all buffered changes to the Writer.
    pub async fn flush(&self) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        self.flush_pending(&mut state).await?;
        Ok(())
    }

    /// execute
    ///
    /// Runs one statement. A mutation is appended to the pending buffer and flushed with it,
    /// and its own result is returned. A read first flushes anything pending.
    pub async fn execute(&self, statement: Statement) -> Result<QueryResult, DbError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;

        if statement.is_mutation() {
            state.pending.push(statement);
            let mut results = self.flush_pending(&mut state).await?;
            return Ok(results.pop().unwrap_or_default());
        }

        self.flush_pending(&mut state).await?;
        self.dispatch(&mut state, &statement).await
    }

    pub async fn fetch_all<T: DeserializeOwned>(&self, statement: Statement) -> Result<Vec<T>, DbError> {
        self.execute(statement).await?.decode()
    }

    pub async fn fetch_optional<T: DeserializeOwned>(&self, statement: Statement) -> Result<Option<T>, DbError> {
        self.execute(statement).await?.decode_first()
    }

    /// Flushes what is left and commits the writer transaction, if one was opened.
    pub async fn commit(&self) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        self.flush_pending(&mut state).await?;
        state.flushing = false;
        if let Some(transaction) = state.transaction.take() {
            transaction.commit().await?;
            tracing::debug!(context = ?self.scope, "session committed");
        }
        Ok(())
    }

    /// Discards buffered changes and rolls back the writer transaction, if one was opened.
    pub async fn rollback(&self) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        Self::discard(&mut state).await
    }

    /// Rolls back anything still open and refuses further use.
    pub async fn close(&self) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        Self::discard(&mut state).await
    }

    async fn discard(state: &mut SessionState) -> Result<(), DbError> {
        state.pending.clear();
        state.flushing = false;
        if let Some(transaction) = state.transaction.take() {
            transaction.rollback().await?;
            tracing::debug!("session rolled back");
        }
        Ok(())
    }

    async fn flush_pending(&self, state: &mut SessionState) -> Result<Vec<QueryResult>, DbError> {
        if state.pending.is_empty() {
            return Ok(Vec::new());
        }

        state.flushing = true;
        let pending = std::mem::take(&mut state.pending);
        tracing::trace!(context = ?self.scope, statements = pending.len(), "flushing session");

        let mut results = Vec::with_capacity(pending.len());
        for statement in &pending {
            results.push(self.dispatch(state, statement).await?);
        }
        Ok(results)
    }

    async fn dispatch(&self, state: &mut SessionState, statement: &Statement) -> Result<QueryResult, DbError> {
        let target = route(state.flushing, statement.kind);
        tracing::trace!(engine = %target, kind = ?statement.kind, "routing statement");

        match target {
            EngineType::Writer => {
                let transaction = match state.transaction.take() {
                    Some(transaction) => transaction,
                    None => self.engines.writer().begin().await?,
                };
                state.transaction.insert(transaction).execute(statement).await
            }
            EngineType::Reader => self.engines.reader().execute(statement).await,
        }
    }

    /// Registers one more `Transactional` around this session. Only the guard returned to
    /// the outermost caller reports `is_outermost`.
    pub(crate) fn enter_transaction(&self) -> TransactionDepth<'_> {
        let previous = self.depth.fetch_add(1, Ordering::SeqCst);
        TransactionDepth {
            session: self,
            outermost: previous == 0,
        }
    }
}

pub(crate) struct TransactionDepth<'a> {
    session: &'a Session,
    outermost: bool,
}

impl TransactionDepth<'_> {
    pub(crate) fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for TransactionDepth<'_> {
    fn drop(&mut self) {
        self.session.depth.fetch_sub(1, Ordering::SeqCst);
    }
}
