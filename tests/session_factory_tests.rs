use std::{sync::Arc, time::Duration};

use tokio::sync::Barrier;
use user_service::db::{
    ContextId, DbError, EngineType, SessionFactory, Statement,
    context::{reset_session_context, set_session_context},
    mock::{EngineEvent, MockEngines},
};

fn factory() -> (MockEngines, SessionFactory) {
    let engines = MockEngines::new();
    let sessions = SessionFactory::new(engines.engine_set());
    (engines, sessions)
}

#[tokio::test]
async fn test_resolve_outside_scope_is_context_missing() {
    let (_engines, sessions) = factory();
    assert!(matches!(sessions.resolve(), Err(DbError::ContextMissing)));
}

#[tokio::test]
async fn test_resolve_is_identity_stable_within_scope() {
    let (_engines, sessions) = factory();

    sessions
        .scope(ContextId::from("req-1"), async {
            let first = sessions.resolve().unwrap();
            let second = sessions.resolve().unwrap();
            assert!(Arc::ptr_eq(&first, &second));
            assert_eq!(first.context_id().map(ContextId::as_str), Some("req-1"));
            assert_eq!(sessions.active_sessions(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_concurrent_contexts_get_distinct_sessions() {
    let (_engines, sessions) = factory();
    let barrier = Arc::new(Barrier::new(2));

    let run = |id: &'static str| {
        let sessions = sessions.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            let factory = sessions.clone();
            factory
                .scope(ContextId::from(id), async move {
                    let session = sessions.resolve().unwrap();
                    barrier.wait().await;
                    let active = sessions.active_sessions();
                    barrier.wait().await;
                    (session, active)
                })
                .await
        })
    };

    let (a, b) = tokio::join!(run("req-a"), run("req-b"));
    let (session_a, active_a) = a.unwrap();
    let (session_b, active_b) = b.unwrap();

    assert!(!Arc::ptr_eq(&session_a, &session_b));
    assert_eq!(active_a, 2);
    assert_eq!(active_b, 2);
    assert_eq!(sessions.active_sessions(), 0);
}

#[tokio::test]
async fn test_teardown_closes_and_forgets_session() {
    let (engines, sessions) = factory();

    let session = sessions
        .scope(ContextId::from("req-1"), async {
            let session = sessions.resolve().unwrap();
            session.execute(Statement::insert("INSERT INTO users VALUES (1)")).await.unwrap();
            session
        })
        .await;

    assert_eq!(sessions.active_sessions(), 0);
    // Nothing committed it, so teardown rolled it back.
    assert_eq!(engines.journal.rollbacks(), 1);
    assert!(matches!(
        session.execute(Statement::select("SELECT 1")).await,
        Err(DbError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_same_id_after_teardown_gets_fresh_session() {
    let (_engines, sessions) = factory();
    let id = ContextId::from("req-1");

    let first = sessions.scope(id.clone(), async { sessions.resolve().unwrap() }).await;
    let second = sessions.scope(id, async { sessions.resolve().unwrap() }).await;

    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_set_session_context_switches_resolved_session() {
    let (_engines, sessions) = factory();

    sessions
        .scope(ContextId::from("outer"), async {
            let outer = sessions.resolve().unwrap();

            let token = set_session_context(ContextId::from("inner")).unwrap();
            let inner = sessions.resolve().unwrap();
            assert!(!Arc::ptr_eq(&outer, &inner));
            sessions.remove(&ContextId::from("inner")).await;

            reset_session_context(token);
            assert!(Arc::ptr_eq(&outer, &sessions.resolve().unwrap()));
        })
        .await;

    assert_eq!(sessions.active_sessions(), 0);
}

#[tokio::test]
async fn test_isolated_session_does_not_join_ambient_work() {
    let (engines, sessions) = factory();

    sessions
        .scope(ContextId::from("req-1"), async {
            let ambient = sessions.resolve().unwrap();
            ambient.execute(Statement::insert("INSERT INTO users VALUES (1)")).await.unwrap();

            let isolated = sessions
                .isolated(|session| async move {
                    assert!(session.context_id().is_none());
                    session.execute(Statement::select("SELECT lookup")).await?;
                    Ok::<_, DbError>(session)
                })
                .await
                .unwrap();

            assert!(matches!(
                isolated.execute(Statement::select("SELECT 1")).await,
                Err(DbError::SessionClosed)
            ));
        })
        .await;

    // The ambient session was flushing, the isolated one was not.
    assert_eq!(engines.journal.engine_for("SELECT lookup"), Some(EngineType::Reader));
}

#[tokio::test]
async fn test_isolated_session_released_on_error() {
    let (engines, sessions) = factory();
    let mut captured = None;

    let result: Result<(), DbError> = sessions
        .isolated(|session| {
            captured = Some(session.clone());
            async move {
                session.execute(Statement::update("UPDATE users SET x = 1")).await?;
                Err(DbError::ContextMissing)
            }
        })
        .await;

    assert!(matches!(result, Err(DbError::ContextMissing)));
    assert_eq!(engines.journal.rollbacks(), 1);
    let session = captured.unwrap();
    assert!(matches!(
        session.execute(Statement::select("SELECT 1")).await,
        Err(DbError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_cancelled_scope_rolls_back_and_releases() {
    let (engines, sessions) = factory();

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        sessions.scope(ContextId::from("req-cancel"), async {
            let session = sessions.resolve().unwrap();
            session.execute(Statement::insert("INSERT INTO users VALUES (1)")).await.unwrap();
            std::future::pending::<()>().await;
        }),
    )
    .await;

    assert!(outcome.is_err(), "scope should have been cancelled");
    assert_eq!(sessions.active_sessions(), 0);
    assert_eq!(engines.journal.commits(), 0);
    assert_eq!(
        engines.journal.count(|event| *event == EngineEvent::Rollback(EngineType::Writer)),
        1
    );
}

#[tokio::test]
async fn test_nested_scope_with_same_id_keeps_outer_session() {
    let (engines, sessions) = factory();

    sessions
        .scope(ContextId::from("req-nested"), async {
            let outer = sessions.resolve().unwrap();
            outer
                .execute(Statement::insert("INSERT INTO users (email) VALUES ($1)").bind("outer@example.com"))
                .await
                .unwrap();

            sessions
                .scope(ContextId::from("req-nested"), async {
                    let inner = sessions.resolve().unwrap();
                    assert!(Arc::ptr_eq(&outer, &inner));
                })
                .await;

            assert_eq!(sessions.active_sessions(), 1);
            assert_eq!(engines.journal.rollbacks(), 0);
            outer
                .execute(Statement::insert("INSERT INTO users (email) VALUES ($1)").bind("again@example.com"))
                .await
                .expect("outer session must survive the inner scope");
            outer.commit().await.unwrap();
        })
        .await;

    assert_eq!(engines.journal.commits(), 1);
    assert_eq!(sessions.active_sessions(), 0);
}
