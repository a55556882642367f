use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::{
    Column, Executor, PgPool, Postgres, Row as _, Transaction, TypeInfo,
    postgres::{PgArguments, PgPoolOptions, PgRow},
    query::Query,
};
use uuid::Uuid;

use super::{
    DbError,
    statement::{BindValue, QueryResult, Row, Statement},
};
use crate::config::DatabaseConfig;

/// EngineType
///
/// The two logical endpoints. Writer is the system of record; Reader may be a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineType {
    Writer,
    Reader,
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineType::Writer => f.write_str("writer"),
            EngineType::Reader => f.write_str("reader"),
        }
    }
}

/// Engine Trait
///
/// One logical database endpoint with its own connection pool. Implementations must be safe
/// to share between unrelated sessions.
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineType;

    /// Runs a statement on any pooled connection, outside of a transaction.
    async fn execute(&self, statement: &Statement) -> Result<QueryResult, DbError>;

    /// Pins a connection and opens a transaction on it.
    async fn begin(&self) -> Result<Box<dyn EngineTransaction>, DbError>;
}

/// EngineTransaction Trait
///
/// An open transaction. Dropping it without calling `commit` or `rollback` must roll it back.
#[async_trait]
pub trait EngineTransaction: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, DbError>;
    async fn commit(self: Box<Self>) -> Result<(), DbError>;
    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// EngineSet
///
/// The process-wide Writer/Reader pair. Built once at startup and never mutated.
#[derive(Clone)]
pub struct EngineSet {
    writer: Arc<dyn Engine>,
    reader: Arc<dyn Engine>,
}

impl EngineSet {
    pub fn new(writer: Arc<dyn Engine>, reader: Arc<dyn Engine>) -> Self {
        Self { writer, reader }
    }

    /// Connects both endpoints. Either one failing is fatal for the caller.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let (writer, reader) = PgEngine::connect_pair(config).await?;
        Ok(Self::new(Arc::new(writer), Arc::new(reader)))
    }

    pub fn writer(&self) -> &Arc<dyn Engine> {
        &self.writer
    }

    pub fn reader(&self) -> &Arc<dyn Engine> {
        &self.reader
    }
}

/// PgEngine
///
/// Postgres endpoint backed by a `sqlx` pool. The pool-recycle interval becomes the pool's
/// `max_lifetime`, so connections older than it are closed and replaced on checkout.
pub struct PgEngine {
    kind: EngineType,
    pool: PgPool,
}

/// How long startup waits for an endpoint before giving up on it.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl PgEngine {
    pub async fn connect(kind: EngineType, url: &str, pool_recycle: Duration) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .max_lifetime(pool_recycle)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(url)
            .await
            .map_err(|source| DbError::EngineUnavailable { engine: kind, source })?;

        tracing::info!(engine = %kind, recycle_secs = pool_recycle.as_secs(), "database engine connected");

        Ok(Self { kind, pool })
    }

    /// Writer first, then Reader. Returned as concrete engines so startup can still reach the
    /// writer's pool for migrations before they are boxed into an `EngineSet`.
    pub async fn connect_pair(config: &DatabaseConfig) -> Result<(Self, Self), DbError> {
        let writer = Self::connect(EngineType::Writer, &config.writer_url, config.pool_recycle).await?;
        let reader = Self::connect(EngineType::Reader, &config.reader_url, config.pool_recycle).await?;
        Ok((writer, reader))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Engine for PgEngine {
    fn kind(&self) -> EngineType {
        self.kind
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryResult, DbError> {
        run(&self.pool, statement).await
    }

    async fn begin(&self) -> Result<Box<dyn EngineTransaction>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// Open Postgres transaction. `sqlx` rolls it back if it is dropped unfinished.
struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl EngineTransaction for PgTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, DbError> {
        run(&mut *self.tx, statement).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await.map_err(DbError::from)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await.map_err(DbError::from)
    }
}

fn build(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    statement
        .binds
        .iter()
        .fold(sqlx::query(&statement.sql), |query, value| match value {
            BindValue::Int(v) => query.bind(*v),
            BindValue::Float(v) => query.bind(*v),
            BindValue::Bool(v) => query.bind(*v),
            BindValue::Text(v) => query.bind(v.clone()),
            BindValue::Null => query.bind(Option::<String>::None),
        })
}

async fn run<'c, E>(executor: E, statement: &Statement) -> Result<QueryResult, DbError>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = build(statement);
    if statement.returns_rows {
        let rows = query.fetch_all(executor).await?;
        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResult::with_rows(rows))
    } else {
        let done = query.execute(executor).await?;
        Ok(QueryResult::affected(done.rows_affected()))
    }
}

/// Converts a Postgres row into a JSON object keyed by column name.
fn decode_row(row: &PgRow) -> Result<Row, DbError> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let type_name = column.type_info().name();
        let value = match type_name {
            "INT2" => json(row.try_get::<Option<i16>, _>(index)?),
            "INT4" => json(row.try_get::<Option<i32>, _>(index)?),
            "INT8" => json(row.try_get::<Option<i64>, _>(index)?),
            "FLOAT4" => json(row.try_get::<Option<f32>, _>(index)?),
            "FLOAT8" => json(row.try_get::<Option<f64>, _>(index)?),
            "BOOL" => json(row.try_get::<Option<bool>, _>(index)?),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => json(row.try_get::<Option<String>, _>(index)?),
            "TIMESTAMP" => json(row.try_get::<Option<NaiveDateTime>, _>(index)?),
            "TIMESTAMPTZ" => json(row.try_get::<Option<DateTime<Utc>>, _>(index)?),
            "DATE" => json(row.try_get::<Option<NaiveDate>, _>(index)?),
            "UUID" => json(row.try_get::<Option<Uuid>, _>(index)?),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?.unwrap_or(Value::Null),
            other => {
                return Err(DbError::UnsupportedColumn {
                    column: column.name().to_string(),
                    type_name: other.to_string(),
                });
            }
        };
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}

fn json<T: serde::Serialize>(value: Option<T>) -> Value {
    value
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(Value::Null)
}
