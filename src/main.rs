use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use user_service::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    db::{EngineSet, PgEngine, SessionFactory},
    repository::{RepositoryState, SqlUserRepository},
};

/// main
///
/// Initializes configuration, logging, both database engines and the HTTP server, in that
/// order. Any startup failure aborts the process.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load().expect("FATAL: Invalid configuration. Check the environment.");

    // 2. Logging Filter Setup
    // RUST_LOG wins; otherwise sensible local defaults.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "user_service=debug,tower_http=info,axum=trace".into());

    // 3. Initialize Logging based on Environment
    match config.env {
        Env::Local => {
            // LOCAL: Pretty print output for human readability.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // PROD: JSON lines for the log aggregator.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. Database Engines (Writer + Reader)
    let database = &config.database;
    let (writer, reader) = PgEngine::connect_pair(database)
        .await
        .expect("FATAL: Failed to connect to the database. Check WRITER_DB_URL and READER_DB_URL.");

    // Schema migrations only ever run against the system of record.
    sqlx::migrate!("./migrations")
        .run(writer.pool())
        .await
        .expect("FATAL: Failed to run database migrations.");

    tracing::info!(
        pool_recycle_secs = database.pool_recycle.as_secs(),
        "writer and reader engines connected"
    );

    let engines = EngineSet::new(Arc::new(writer), Arc::new(reader));
    let sessions = SessionFactory::new(engines);

    // 5. Unified State Assembly
    let repository = Arc::new(SqlUserRepository::new(sessions.clone())) as RepositoryState;
    let bind_address = config.bind_address();
    let app_state = AppState::build(config, sessions, repository);

    // 6. Router and Server Startup
    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_address)
        .await
        .expect("FATAL: Failed to bind the HTTP listener.");

    tracing::info!("HTTP server bound successfully.");
    tracing::info!("Listening on {bind_address}");
    tracing::info!("API Documentation (Swagger UI) available at: http://{bind_address}/swagger-ui");

    axum::serve(listener, app).await.expect("FATAL: HTTP server terminated unexpectedly.");
}
