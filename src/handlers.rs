use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    auth::JwtService,
    error::{ApiError, ErrorResponse},
    models::{
        CreateUserRequest, CreateUserResponse, LoginRequest, RefreshTokenRequest, TokenResponse,
        UserListParams, UserResponse, VerifyTokenRequest,
    },
    service::UserService,
};

const DEFAULT_PAGE_SIZE: i64 = 10;

// --- User Handlers ---

/// get_user_list
///
/// [Authenticated Route] Keyset-paginated user listing, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/user",
    params(UserListParams),
    responses(
        (status = 200, description = "Users", body = [UserResponse]),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    )
)]
pub async fn get_user_list(
    State(users): State<UserService>,
    Query(params): Query<UserListParams>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(users.get_user_list(limit, params.prev).await?))
}

/// create_user
///
/// [Public Route] Sign-up. Runs as a single transaction: the duplicate check and the insert
/// commit or roll back together.
#[utoipa::path(
    post,
    path = "/api/v1/user",
    request_body = CreateUserRequest,
    responses(
        (status = 200, description = "User created", body = CreateUserResponse),
        (status = 400, description = "Duplicate email or nickname", body = ErrorResponse),
        (status = 401, description = "Passwords do not match", body = ErrorResponse)
    )
)]
pub async fn create_user(
    State(users): State<UserService>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let response = CreateUserResponse {
        email: payload.email.clone(),
        nickname: payload.nickname.clone(),
    };
    users.create_user(payload.into()).await?;
    Ok(Json(response))
}

/// login
#[utoipa::path(
    post,
    path = "/api/v1/user/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair", body = TokenResponse),
        (status = 404, description = "Unknown email or wrong password", body = ErrorResponse)
    )
)]
pub async fn login(
    State(users): State<UserService>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    Ok(Json(users.login(&payload.email, &payload.password).await?))
}

/// get_user
///
/// [Authenticated Route] One user by id.
#[utoipa::path(
    get,
    path = "/api/v1/user/{user_id}",
    params(("user_id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn get_user(
    State(users): State<UserService>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(users.get_user(user_id).await?.into()))
}

/// delete_user
///
/// [Admin Route] Removes a user inside one transaction.
#[utoipa::path(
    delete,
    path = "/api/v1/user/{user_id}",
    params(("user_id" = i64, Path, description = "User id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn delete_user(
    State(users): State<UserService>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    users.delete_user(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Token Handlers ---

/// verify_token
///
/// [Public Route] 200 when the access token has a valid signature and has not expired.
#[utoipa::path(
    post,
    path = "/api/v1/auth/verify",
    request_body = VerifyTokenRequest,
    responses(
        (status = 200, description = "Valid token"),
        (status = 400, description = "Undecodable or expired token", body = ErrorResponse)
    )
)]
pub async fn verify_token(
    State(jwt): State<JwtService>,
    Json(payload): Json<VerifyTokenRequest>,
) -> Result<StatusCode, ApiError> {
    jwt.verify_token(&payload.token)?;
    Ok(StatusCode::OK)
}

/// refresh_token
///
/// [Public Route] Exchanges a (possibly expired) access token plus a valid refresh token for
/// a new pair.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenResponse),
        (status = 400, description = "Undecodable or expired token", body = ErrorResponse)
    )
)]
pub async fn refresh_token(
    State(jwt): State<JwtService>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    Ok(Json(jwt.create_refresh_token(&payload.token, &payload.refresh_token)?))
}
