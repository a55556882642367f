use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use super::{
    DbError,
    engine::{Engine, EngineSet, EngineTransaction, EngineType},
    statement::{QueryResult, Statement, StatementKind},
};

/// EngineEvent
///
/// One observable thing that happened on a mock endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Begin(EngineType),
    Execute {
        engine: EngineType,
        kind: StatementKind,
        sql: String,
    },
    Commit(EngineType),
    Rollback(EngineType),
}

/// EngineJournal
///
/// Ordered log shared by a mock Writer/Reader pair, so tests can assert on routing and
/// finalization across both endpoints at once.
#[derive(Debug, Clone, Default)]
pub struct EngineJournal {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl EngineJournal {
    fn lock(&self) -> MutexGuard<'_, Vec<EngineEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: EngineEvent) {
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.lock().clone()
    }

    /// SQL of every statement executed on `engine`, in order.
    pub fn statements_on(&self, engine: EngineType) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                EngineEvent::Execute { engine: e, sql, .. } if *e == engine => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// The engine a statement containing `fragment` was last executed on.
    pub fn engine_for(&self, fragment: &str) -> Option<EngineType> {
        self.lock().iter().rev().find_map(|event| match event {
            EngineEvent::Execute { engine, sql, .. } if sql.contains(fragment) => Some(*engine),
            _ => None,
        })
    }

    pub fn commits(&self) -> usize {
        self.count(|event| matches!(event, EngineEvent::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|event| matches!(event, EngineEvent::Rollback(_)))
    }

    pub fn count(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        self.lock().iter().filter(|event| predicate(event)).count()
    }
}

/// MockEngine
///
/// In-memory `Engine` for tests. Records every call in its journal, answers statements from
/// a queue of canned results (empty results once the queue runs dry), and can be told to
/// fail statements whose SQL contains a given fragment.
#[derive(Debug, Clone)]
pub struct MockEngine {
    kind: EngineType,
    journal: EngineJournal,
    responses: Arc<Mutex<VecDeque<QueryResult>>>,
    failing: Arc<Mutex<Option<String>>>,
}

impl MockEngine {
    pub fn new(kind: EngineType, journal: EngineJournal) -> Self {
        Self {
            kind,
            journal,
            responses: Arc::default(),
            failing: Arc::default(),
        }
    }

    /// Queues the result for the next statement executed on this engine.
    pub fn push_result(&self, result: QueryResult) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    /// Makes every statement whose SQL contains `fragment` fail.
    pub fn fail_on(&self, fragment: &str) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = Some(fragment.to_string());
    }

    fn answer(&self, statement: &Statement) -> Result<QueryResult, DbError> {
        self.journal.record(EngineEvent::Execute {
            engine: self.kind,
            kind: statement.kind,
            sql: statement.sql.clone(),
        });

        let failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(fragment) = failing.filter(|f| statement.sql.contains(f.as_str())) {
            return Err(DbError::Query(sqlx::Error::Protocol(format!(
                "mock {} rejected statement containing `{fragment}`",
                self.kind
            ))));
        }

        Ok(self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default())
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn kind(&self) -> EngineType {
        self.kind
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryResult, DbError> {
        self.answer(statement)
    }

    async fn begin(&self) -> Result<Box<dyn EngineTransaction>, DbError> {
        self.journal.record(EngineEvent::Begin(self.kind));
        Ok(Box::new(MockTransaction {
            engine: self.clone(),
            finished: false,
        }))
    }
}

struct MockTransaction {
    engine: MockEngine,
    finished: bool,
}

#[async_trait]
impl EngineTransaction for MockTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, DbError> {
        self.engine.answer(statement)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        self.finished = true;
        self.engine.journal.record(EngineEvent::Commit(self.engine.kind));
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DbError> {
        self.finished = true;
        self.engine.journal.record(EngineEvent::Rollback(self.engine.kind));
        Ok(())
    }
}

impl Drop for MockTransaction {
    // Same contract as sqlx: an abandoned transaction is rolled back.
    fn drop(&mut self) {
        if !self.finished {
            self.engine.journal.record(EngineEvent::Rollback(self.engine.kind));
        }
    }
}

/// MockEngines
///
/// A Writer/Reader pair sharing one journal.
#[derive(Debug, Clone)]
pub struct MockEngines {
    pub writer: MockEngine,
    pub reader: MockEngine,
    pub journal: EngineJournal,
}

impl MockEngines {
    pub fn new() -> Self {
        let journal = EngineJournal::default();
        Self {
            writer: MockEngine::new(EngineType::Writer, journal.clone()),
            reader: MockEngine::new(EngineType::Reader, journal.clone()),
            journal,
        }
    }

    pub fn engine_set(&self) -> EngineSet {
        EngineSet::new(Arc::new(self.writer.clone()), Arc::new(self.reader.clone()))
    }
}

impl Default for MockEngines {
    fn default() -> Self {
        Self::new()
    }
}
