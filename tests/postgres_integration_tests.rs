//! Runs against a real Postgres. Needs `WRITER_DB_URL` (and optionally `READER_DB_URL`,
//! defaulting to the writer) and `cargo test -- --ignored`.

use std::time::Duration;

use sqlx::PgPool;
use user_service::{
    config::DatabaseConfig,
    db::{ContextId, DbError, EngineSet, SessionFactory, Statement, Transactional},
    models::{Location, NewUser, User},
    repository::{SqlUserRepository, UserRepository},
};
use uuid::Uuid;

// --- Test Context and Setup ---

struct DbTestContext {
    sessions: SessionFactory,
    transactional: Transactional,
    repository: SqlUserRepository,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let writer_url = std::env::var("WRITER_DB_URL").expect("WRITER_DB_URL must be set to run integration tests");
        let reader_url = std::env::var("READER_DB_URL").unwrap_or_else(|_| writer_url.clone());

        let pool = PgPool::connect(&writer_url)
            .await
            .expect("Failed to connect to database for integration tests.");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        let engines = EngineSet::connect(&DatabaseConfig {
            writer_url,
            reader_url,
            pool_recycle: Duration::from_secs(60),
        })
        .await
        .expect("Failed to connect the writer and reader engines.");
        let sessions = SessionFactory::new(engines);
        DbTestContext {
            transactional: Transactional::new(sessions.clone()),
            repository: SqlUserRepository::new(sessions.clone()),
            sessions,
        }
    }
}

/// Unique per run so tests can share one database.
fn new_user() -> NewUser {
    let tag = Uuid::new_v4().simple().to_string();
    NewUser {
        email: format!("{tag}@example.com"),
        password_hash: "$2b$04$integration".to_string(),
        nickname: tag,
        location: Location { lat: 37.5, lng: 127.0 },
    }
}

#[tokio::test]
#[ignore]
async fn test_committed_user_is_readable() {
    let ctx = DbTestContext::setup().await;
    let new = new_user();

    ctx.sessions
        .scope(ContextId::from(Uuid::new_v4().to_string()), async {
            ctx.transactional
                .run(|| async { ctx.repository.save(&new).await })
                .await
        })
        .await
        .expect("create user");

    let stored = ctx
        .repository
        .get_user_by_email(&new.email)
        .await
        .unwrap()
        .expect("committed user should be visible");
    assert_eq!(stored.nickname, new.nickname);
    assert!(!stored.is_admin);

    let by_id = ctx.repository.get_user_by_id(stored.id).await.unwrap();
    assert_eq!(by_id.map(|user| user.email), Some(new.email.clone()));
}

#[derive(Debug)]
enum Outcome {
    Db(DbError),
    Aborted,
}

impl From<DbError> for Outcome {
    fn from(err: DbError) -> Self {
        Outcome::Db(err)
    }
}

#[tokio::test]
#[ignore]
async fn test_failed_unit_of_work_leaves_no_row() {
    let ctx = DbTestContext::setup().await;
    let new = new_user();

    let result: Result<(), Outcome> = ctx
        .sessions
        .scope(ContextId::from(Uuid::new_v4().to_string()), async {
            ctx.transactional
                .run(|| async {
                    ctx.repository.save(&new).await?;
                    // Flushed rows are visible to the session's own reads.
                    let own: Option<User> = ctx
                        .sessions
                        .resolve()?
                        .fetch_optional(
                            Statement::select(
                                "SELECT id, email, password, nickname, is_admin, lat, lng, created_at, updated_at \
                                 FROM users WHERE email = $1",
                            )
                            .bind(new.email.as_str()),
                        )
                        .await?;
                    assert!(own.is_some());
                    Err(Outcome::Aborted)
                })
                .await
        })
        .await;

    assert!(matches!(result, Err(Outcome::Aborted)));
    assert!(ctx.repository.get_user_by_email(&new.email).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn test_delete_user_round_trip() {
    let ctx = DbTestContext::setup().await;
    let new = new_user();

    ctx.sessions
        .scope(ContextId::from(Uuid::new_v4().to_string()), async {
            ctx.transactional.run(|| async { ctx.repository.save(&new).await }).await
        })
        .await
        .unwrap();
    let stored = ctx.repository.get_user_by_email(&new.email).await.unwrap().unwrap();

    let deleted = ctx
        .sessions
        .scope(ContextId::from(Uuid::new_v4().to_string()), async {
            ctx.transactional
                .run(|| async { ctx.repository.delete_user(stored.id).await })
                .await
        })
        .await
        .unwrap();

    assert!(deleted);
    assert!(ctx.repository.get_user_by_id(stored.id).await.unwrap().is_none());
}
