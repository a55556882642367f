/// Database Layer
///
/// Request-scoped, transactional data access. The pieces stack leaf-first:
///
/// - `context`: the ambient execution-context id (task-local).
/// - `statement`: what a repository hands to a session.
/// - `engine`: the Writer and Reader endpoints and their pools.
/// - `session`: the routing session deciding Writer vs Reader per statement.
/// - `factory`: one session per context id, torn down with the context.
/// - `transactional`: commit-or-rollback around a use case.
/// - `mock`: recording engines for tests.
pub mod context;
pub mod engine;
pub mod factory;
pub mod mock;
pub mod session;
pub mod statement;
pub mod transactional;

pub use context::{ContextId, ContextToken};
pub use engine::{Engine, EngineSet, EngineTransaction, EngineType, PgEngine};
pub use factory::SessionFactory;
pub use session::{Session, route};
pub use statement::{BindValue, QueryResult, Row, Statement, StatementKind};
pub use transactional::Transactional;

use thiserror::Error;

/// DbError
///
/// Everything the data-access layer can fail with. Routing decisions are pure and never
/// produce one of these.
#[derive(Debug, Error)]
pub enum DbError {
    /// No execution-context id on the current task. A wiring bug, never user-facing.
    #[error("no session context is set on the current task")]
    ContextMissing,

    /// Startup could not reach one of the two endpoints.
    #[error("{engine} engine unavailable: {source}")]
    EngineUnavailable {
        engine: EngineType,
        #[source]
        source: sqlx::Error,
    },

    #[error("session has already been closed")]
    SessionClosed,

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("failed to decode row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("column `{column}` has unsupported type `{type_name}`")]
    UnsupportedColumn { column: String, type_name: String },
}
