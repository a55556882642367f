use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::{
    db::{BindValue, DbError, SessionFactory, Statement},
    models::{NewUser, User},
};

/// Entity Trait
///
/// A table-backed type with a `BIGINT` primary key named `id`.
pub trait Entity: DeserializeOwned + Send + Sync {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> i64;
}

/// Insertable Trait
///
/// Column/value pairs for inserting a new `Entity` row.
pub trait Insertable: Send + Sync {
    type Entity: Entity;

    fn values(&self) -> Vec<(&'static str, BindValue)>;
}

/// SqlRepository
///
/// Generic CRUD over one entity, executed through the ambient (request-scoped) session, so
/// everything it does joins the current unit of work and is finalized by `Transactional`.
pub struct SqlRepository<E> {
    sessions: SessionFactory,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for SqlRepository<E> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> SqlRepository<E> {
    pub fn new(sessions: SessionFactory) -> Self {
        Self {
            sessions,
            _entity: PhantomData,
        }
    }

    fn select_sql() -> String {
        format!("SELECT {} FROM {}", E::COLUMNS.join(", "), E::TABLE)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<E>, DbError> {
        let statement = Statement::select(format!("{} WHERE id = $1", Self::select_sql())).bind(id);
        self.sessions.resolve()?.fetch_optional(statement).await
    }

    /// update_by_id
    ///
    /// Sets the given columns on one row and refreshes `updated_at`. Returns rows affected.
    pub async fn update_by_id(&self, id: i64, params: Vec<(&'static str, BindValue)>) -> Result<u64, DbError> {
        if params.is_empty() {
            return Ok(0);
        }

        let assignments = params
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ${}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments}, updated_at = now() WHERE id = ${}",
            E::TABLE,
            params.len() + 1
        );

        let statement = params
            .into_iter()
            .fold(Statement::update(sql), |statement, (_, value)| statement.bind(value))
            .bind(id);
        Ok(self.sessions.resolve()?.execute(statement).await?.rows_affected)
    }

    pub async fn delete(&self, entity: &E) -> Result<u64, DbError> {
        self.delete_by_id(entity.id()).await
    }

    pub async fn delete_by_id(&self, id: i64) -> Result<u64, DbError> {
        let statement = Statement::delete(format!("DELETE FROM {} WHERE id = $1", E::TABLE)).bind(id);
        Ok(self.sessions.resolve()?.execute(statement).await?.rows_affected)
    }

    /// save
    ///
    /// Buffers the insert in the ambient session; it reaches the Writer on the next flush,
    /// read, or commit.
    pub async fn save<I: Insertable<Entity = E>>(&self, new: &I) -> Result<(), DbError> {
        let values = new.values();
        let columns = values.iter().map(|(column, _)| *column).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=values.len()).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");
        let sql = format!("INSERT INTO {} ({columns}) VALUES ({placeholders})", E::TABLE);

        let statement = values
            .into_iter()
            .fold(Statement::insert(sql), |statement, (_, value)| statement.bind(value));
        self.sessions.resolve()?.add(statement).await
    }
}

/// UserRepository Trait
///
/// Persistence contract for users. Handlers and use cases only ever see this trait, so tests
/// can substitute an in-memory fake for the Postgres-backed adapter.
#[async_trait]
pub trait UserRepository: Send + Sync {
    // Keyset-paginated listing, newest ids first.
    async fn get_users(&self, limit: i64, prev: Option<i64>) -> Result<Vec<User>, DbError>;
    async fn get_user_by_email_or_nickname(&self, email: &str, nickname: &str) -> Result<Option<User>, DbError>;
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, DbError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError>;
    // Joins the ambient unit of work.
    async fn save(&self, user: &NewUser) -> Result<(), DbError>;
    // Joins the ambient unit of work. Returns false when no such user exists.
    async fn delete_user(&self, user_id: i64) -> Result<bool, DbError>;
}

/// RepositoryState
///
/// The type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn UserRepository>;

/// SqlUserRepository
///
/// Lookups run on isolated sessions (they neither need nor join the caller's unit of work);
/// writes go through the ambient session.
#[derive(Clone)]
pub struct SqlUserRepository {
    sessions: SessionFactory,
    base: SqlRepository<User>,
}

impl SqlUserRepository {
    pub fn new(sessions: SessionFactory) -> Self {
        Self {
            base: SqlRepository::new(sessions.clone()),
            sessions,
        }
    }

    async fn find_one(&self, statement: Statement) -> Result<Option<User>, DbError> {
        self.sessions
            .isolated(|session| async move { session.fetch_optional(statement).await })
            .await
    }
}

#[async_trait]
impl UserRepository for SqlUserRepository {
    async fn get_users(&self, limit: i64, prev: Option<i64>) -> Result<Vec<User>, DbError> {
        let base = SqlRepository::<User>::select_sql();
        let statement = match prev {
            Some(prev) => Statement::select(format!("{base} WHERE id < $1 ORDER BY id DESC LIMIT $2"))
                .bind(prev)
                .bind(limit),
            None => Statement::select(format!("{base} ORDER BY id DESC LIMIT $1")).bind(limit),
        };

        self.sessions
            .isolated(|session| async move { session.fetch_all(statement).await })
            .await
    }

    async fn get_user_by_email_or_nickname(&self, email: &str, nickname: &str) -> Result<Option<User>, DbError> {
        let statement = Statement::select(format!(
            "{} WHERE email = $1 OR nickname = $2 LIMIT 1",
            SqlRepository::<User>::select_sql()
        ))
        .bind(email)
        .bind(nickname);
        self.find_one(statement).await
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, DbError> {
        let statement = Statement::select(format!("{} WHERE id = $1", SqlRepository::<User>::select_sql())).bind(user_id);
        self.find_one(statement).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let statement = Statement::select(format!("{} WHERE email = $1", SqlRepository::<User>::select_sql())).bind(email);
        self.find_one(statement).await
    }

    async fn save(&self, user: &NewUser) -> Result<(), DbError> {
        self.base.save(user).await
    }

    async fn delete_user(&self, user_id: i64) -> Result<bool, DbError> {
        match self.base.get_by_id(user_id).await? {
            Some(user) => Ok(self.base.delete(&user).await? > 0),
            None => Ok(false),
        }
    }
}
