use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};

use crate::{
    db::BindValue,
    repository::{Entity, Insertable},
};

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// A row of the `users` table. `password` holds the bcrypt hash, never the plain text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password: String,
    pub nickname: String,
    pub is_admin: bool,
    pub lat: f64,
    pub lng: f64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "email",
        "password",
        "nickname",
        "is_admin",
        "lat",
        "lng",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> i64 {
        self.id
    }
}

/// Location
///
/// Value object for the user's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// NewUser
///
/// A user that has not been inserted yet. `create` hashes the password.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub nickname: String,
    pub location: Location,
}

impl NewUser {
    pub fn create(
        email: String,
        password: &str,
        nickname: String,
        location: Location,
    ) -> Result<Self, bcrypt::BcryptError> {
        Ok(Self {
            email,
            password_hash: bcrypt::hash(password, bcrypt::DEFAULT_COST)?,
            nickname,
            location,
        })
    }
}

impl Insertable for NewUser {
    type Entity = User;

    fn values(&self) -> Vec<(&'static str, BindValue)> {
        vec![
            ("email", self.email.as_str().into()),
            ("password", self.password_hash.as_str().into()),
            ("nickname", self.nickname.as_str().into()),
            ("is_admin", false.into()),
            ("lat", self.location.lat.into()),
            ("lng", self.location.lng.into()),
        ]
    }
}

// --- Request Payloads (Input Schemas) ---

/// CreateUserRequest
///
/// Input payload for sign-up (POST /api/v1/user). Both password fields must match.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateUserRequest {
    #[schema(example = "hide@example.com")]
    pub email: String,
    pub password1: String,
    pub password2: String,
    pub nickname: String,
    pub lat: f64,
    pub lng: f64,
}

/// LoginRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// RefreshTokenRequest
///
/// The (possibly expired) access token plus a still-valid refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RefreshTokenRequest {
    pub token: String,
    pub refresh_token: String,
}

/// VerifyTokenRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct VerifyTokenRequest {
    pub token: String,
}

/// UserListParams
///
/// Query parameters for GET /api/v1/user. Keyset pagination: `prev` is the smallest id of
/// the previous page.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct UserListParams {
    /// Page size. Defaults to 10, capped at 12.
    pub limit: Option<i64>,
    /// Only users with an id below this one.
    pub prev: Option<i64>,
}

// --- Response Payloads (Output Schemas) ---

/// CreateUserResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct CreateUserResponse {
    pub email: String,
    pub nickname: String,
}

/// UserResponse
///
/// Public view of a user; never includes the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub nickname: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            nickname: user.nickname,
        }
    }
}

/// TokenResponse
///
/// Returned by login and token refresh.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
    pub refresh_token: String,
}
