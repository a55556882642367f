use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod permission;
pub mod repository;
pub mod service;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use auth::{JwtService, TokenHelper};
pub use config::AppConfig;
pub use db::{ContextId, EngineSet, SessionFactory, Transactional};
pub use repository::{RepositoryState, SqlUserRepository};
pub use service::UserService;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// ApiDoc
///
/// Auto-generates the OpenAPI document for every `#[utoipa::path]` handler and
/// `ToSchema` payload. Served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_user_list, handlers::create_user, handlers::login,
        handlers::get_user, handlers::delete_user, handlers::verify_token,
        handlers::refresh_token
    ),
    components(
        schemas(
            models::CreateUserRequest, models::CreateUserResponse, models::LoginRequest,
            models::UserResponse, models::TokenResponse, models::VerifyTokenRequest,
            models::RefreshTokenRequest, error::ErrorResponse,
        )
    ),
    tags(
        (name = "user-service", description = "User accounts and tokens")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, cloneable container of everything requests share. Every field is either
/// immutable or internally synchronized.
#[derive(Clone)]
pub struct AppState {
    /// Per-request sessions over the Writer/Reader engines.
    pub sessions: SessionFactory,
    /// User use cases.
    pub users: UserService,
    /// Token verification and refresh use cases.
    pub jwt: JwtService,
    /// Signing/verification keys, used by the authentication middleware.
    pub tokens: TokenHelper,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the use cases over `sessions` and `repository`.
    pub fn build(config: AppConfig, sessions: SessionFactory, repository: RepositoryState) -> Self {
        let tokens = TokenHelper::new(&config.jwt_secret);
        let users = UserService::new(repository, Transactional::new(sessions.clone()), tokens.clone());
        Self {
            sessions,
            users,
            jwt: JwtService::new(tokens.clone()),
            tokens,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

// Handlers pull only the component they need out of the shared AppState.

impl FromRef<AppState> for SessionFactory {
    fn from_ref(app_state: &AppState) -> SessionFactory {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for UserService {
    fn from_ref(app_state: &AppState) -> UserService {
        app_state.users.clone()
    }
}

impl FromRef<AppState> for JwtService {
    fn from_ref(app_state: &AppState) -> JwtService {
        app_state.jwt.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// session_middleware
///
/// Runs the rest of the request as one unit of work under a freshly minted context id. The
/// client-supplied `x-request-id` is only recorded for correlation; two requests carrying
/// the same header still get separate sessions. The session is created lazily on first use
/// and released when the response is produced, or when the request future is dropped.
async fn session_middleware(State(sessions): State<SessionFactory>, request: Request, next: Next) -> Response {
    let id = ContextId::from(uuid::Uuid::new_v4().to_string());

    if let Some(request_id) = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        tracing::debug!(context = %id, request_id, "opening request scope");
    }

    sessions.scope(id, next.run(request)).await
}

/// create_router
///
/// Assembles the routing structure, applies global and scoped middleware, and registers the
/// application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        // Each of these carries its own Permission Gate as a route layer.
        .merge(authenticated::authenticated_routes())
        .merge(admin::admin_routes(&state))
        // Identity resolution runs inside the request's session scope.
        .layer(middleware::from_fn_with_state(state.clone(), auth::authenticate))
        .layer(middleware::from_fn_with_state(state.sessions.clone(), session_middleware))
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. Every request gets an x-request-id, which also keys its session.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 3b. One tracing span per request, tagged with the request id.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Echo the id back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the `TraceLayer` span: method, URI and the request id, so every log line of one
/// request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
