#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use user_service::{
    AppState,
    config::AppConfig,
    db::{DbError, Row, SessionFactory, Statement, mock::MockEngines},
    models::{NewUser, User},
    repository::{RepositoryState, UserRepository},
};

pub const PASSWORD: &str = "correct-horse-battery";

pub fn timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .expect("valid timestamp")
}

/// A stored user whose password is `PASSWORD`. Low bcrypt cost keeps the tests fast.
pub fn user(id: i64, email: &str, nickname: &str, is_admin: bool) -> User {
    User {
        id,
        email: email.to_string(),
        password: bcrypt::hash(PASSWORD, 4).expect("hash test password"),
        nickname: nickname.to_string(),
        is_admin,
        lat: 37.5,
        lng: 127.0,
        created_at: timestamp(),
        updated_at: timestamp(),
    }
}

/// The row a database would return for `user`.
pub fn user_row(user: &User) -> Row {
    match serde_json::to_value(user).expect("serialize user") {
        serde_json::Value::Object(row) => row,
        other => panic!("user serialized to {other:?}"),
    }
}

// --- In-memory repository ---

#[derive(Default)]
struct Store {
    users: Vec<User>,
    next_id: i64,
}

/// FakeUserRepository
///
/// In-memory `UserRepository`. Writes apply to the store immediately and also stage a
/// statement on the ambient session, so the unit of work they belong to is observable
/// through the mock engine journal.
pub struct FakeUserRepository {
    sessions: SessionFactory,
    store: Mutex<Store>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
}

impl FakeUserRepository {
    pub fn new(sessions: SessionFactory) -> Self {
        Self {
            sessions,
            store: Mutex::default(),
            lookups: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, user: User) {
        let mut store = self.store.lock().unwrap();
        store.next_id = store.next_id.max(user.id);
        store.users.push(user);
    }

    pub fn users(&self) -> Vec<User> {
        self.store.lock().unwrap().users.clone()
    }

    /// Makes `get_user_by_id` fail the way an unreachable database would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `get_user_by_id` calls so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserRepository for FakeUserRepository {
    async fn get_users(&self, limit: i64, prev: Option<i64>) -> Result<Vec<User>, DbError> {
        let mut users: Vec<User> = self
            .users()
            .into_iter()
            .filter(|user| prev.is_none_or(|prev| user.id < prev))
            .collect();
        users.sort_by(|a, b| b.id.cmp(&a.id));
        users.truncate(limit as usize);
        Ok(users)
    }

    async fn get_user_by_email_or_nickname(&self, email: &str, nickname: &str) -> Result<Option<User>, DbError> {
        Ok(self
            .users()
            .into_iter()
            .find(|user| user.email == email || user.nickname == nickname))
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, DbError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Query(sqlx::Error::PoolTimedOut));
        }
        Ok(self.users().into_iter().find(|user| user.id == user_id))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        Ok(self.users().into_iter().find(|user| user.email == email))
    }

    async fn save(&self, new: &NewUser) -> Result<(), DbError> {
        let statement = Statement::insert("INSERT INTO users (email, nickname) VALUES ($1, $2)")
            .bind(new.email.as_str())
            .bind(new.nickname.as_str());
        self.sessions.resolve()?.add(statement).await?;

        let mut store = self.store.lock().unwrap();
        store.next_id += 1;
        let id = store.next_id;
        store.users.push(User {
            id,
            email: new.email.clone(),
            password: new.password_hash.clone(),
            nickname: new.nickname.clone(),
            is_admin: false,
            lat: new.location.lat,
            lng: new.location.lng,
            created_at: timestamp(),
            updated_at: timestamp(),
        });
        Ok(())
    }

    async fn delete_user(&self, user_id: i64) -> Result<bool, DbError> {
        if !self.users().iter().any(|user| user.id == user_id) {
            return Ok(false);
        }
        let statement = Statement::delete("DELETE FROM users WHERE id = $1").bind(user_id);
        self.sessions.resolve()?.execute(statement).await?;
        self.store.lock().unwrap().users.retain(|user| user.id != user_id);
        Ok(true)
    }
}

// --- Application wiring ---

/// TestContext
///
/// A full `AppState` over recording mock engines and the in-memory repository.
pub struct TestContext {
    pub engines: MockEngines,
    pub sessions: SessionFactory,
    pub repository: Arc<FakeUserRepository>,
    pub state: AppState,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let engines = MockEngines::new();
        let sessions = SessionFactory::new(engines.engine_set());
        let repository = Arc::new(FakeUserRepository::new(sessions.clone()));
        let state = AppState::build(config, sessions.clone(), repository.clone() as RepositoryState);
        Self {
            engines,
            sessions,
            repository,
            state,
        }
    }

    pub fn seed(&self, user: User) -> User {
        self.repository.insert(user.clone());
        user
    }

    pub fn token_for(&self, user_id: i64) -> String {
        self.state.tokens.access_token(user_id).expect("encode access token")
    }
}
