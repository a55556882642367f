use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    AppState,
    config::Env,
    error::ApiError,
    models::TokenResponse,
};

const TOKEN_TTL_SECS: i64 = 60 * 60;
const REFRESH_SUBJECT: &str = "refresh";

/// AccessClaims
///
/// Payload of an access token: whose token it is and when it stops being accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: i64,
    pub exp: usize,
}

/// RefreshClaims
///
/// Payload of a refresh token. It names no user; it only vouches for an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub exp: usize,
}

/// TokenError
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token decode error")]
    Decode,
    #[error("expired token")]
    Expired,
    #[error("failed to encode token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Decode => ApiError::new(StatusCode::BAD_REQUEST, "TOKEN__DECODE_ERROR", "token decode error"),
            TokenError::Expired => ApiError::new(StatusCode::BAD_REQUEST, "TOKEN__EXPIRE_TOKEN", "expired token"),
            TokenError::Encode(source) => {
                tracing::error!(error = %source, "token encoding failed");
                ApiError::internal()
            }
        }
    }
}

/// TokenHelper
///
/// HS256 signing and verification with the configured secret.
#[derive(Clone)]
pub struct TokenHelper {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenHelper {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    fn expiry() -> usize {
        (Utc::now().timestamp() + TOKEN_TTL_SECS) as usize
    }

    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(TokenError::Encode)
    }

    pub fn access_token(&self, user_id: i64) -> Result<String, TokenError> {
        self.encode(&AccessClaims {
            user_id,
            exp: Self::expiry(),
        })
    }

    pub fn refresh_token(&self) -> Result<String, TokenError> {
        self.encode(&RefreshClaims {
            sub: REFRESH_SUBJECT.to_string(),
            exp: Self::expiry(),
        })
    }

    /// A fresh access/refresh pair for `user_id`.
    pub fn token_pair(&self, user_id: i64) -> Result<TokenResponse, TokenError> {
        Ok(TokenResponse {
            token: self.access_token(user_id)?,
            refresh_token: self.refresh_token()?,
        })
    }

    /// Verifies signature and expiry.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        self.decode_with(token, Validation::new(Algorithm::HS256))
    }

    /// Verifies the signature only; an expired token still decodes.
    pub fn decode_expired<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        self.decode_with(token, validation)
    }

    fn decode_with<T: DeserializeOwned>(&self, token: &str, validation: Validation) -> Result<T, TokenError> {
        decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Decode,
            })
    }
}

/// JwtService
///
/// Token verification and refresh use cases.
#[derive(Clone)]
pub struct JwtService {
    tokens: TokenHelper,
}

impl JwtService {
    pub fn new(tokens: TokenHelper) -> Self {
        Self { tokens }
    }

    pub fn verify_token(&self, token: &str) -> Result<(), TokenError> {
        self.tokens.decode::<AccessClaims>(token).map(|_| ())
    }

    /// create_refresh_token
    ///
    /// Issues a new pair for the user named by `token`, which may be expired, provided
    /// `refresh_token` is a valid, unexpired refresh token.
    pub fn create_refresh_token(&self, token: &str, refresh_token: &str) -> Result<TokenResponse, TokenError> {
        let access = self.tokens.decode_expired::<AccessClaims>(token)?;
        let refresh = self.tokens.decode::<RefreshClaims>(refresh_token)?;
        if refresh.sub != REFRESH_SUBJECT {
            return Err(TokenError::Decode);
        }
        self.tokens.token_pair(access.user_id)
    }
}

/// RequestIdentity
///
/// Who is making the request, as resolved by `authenticate`. Anonymous requests carry
/// `user_id: None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestIdentity {
    pub user_id: Option<i64>,
}

impl RequestIdentity {
    pub fn user(user_id: i64) -> Self {
        Self { user_id: Some(user_id) }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// RequestIdentity Extractor Implementation
///
/// Reads the identity `authenticate` attached to the request; requests that never went
/// through the middleware are anonymous. Never rejects: permission checks decide access.
impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<RequestIdentity>().cloned().unwrap_or_default())
    }
}

/// authenticate
///
/// Resolves the caller's identity and attaches it to the request.
///
/// 1. Local bypass: in `Env::Local`, an `x-user-id` header naming an existing user is accepted.
/// 2. `Authorization: Bearer <token>` (scheme is case-insensitive) holding a valid access token.
///
/// Anything else, including a malformed or expired token, leaves the request anonymous. This
/// middleware never rejects; that is the Permission Gate's job.
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let identity = match local_bypass(&state, request.headers()).await {
        Some(identity) => identity,
        None => bearer_identity(&state.tokens, request.headers()),
    };
    request.extensions_mut().insert(identity);
    next.run(request).await
}

async fn local_bypass(state: &AppState, headers: &HeaderMap) -> Option<RequestIdentity> {
    if state.config.env != Env::Local {
        return None;
    }
    let user_id = headers.get("x-user-id")?.to_str().ok()?.parse::<i64>().ok()?;
    match state.users.get_user(user_id).await {
        Ok(user) => Some(RequestIdentity::user(user.id)),
        Err(err) => {
            tracing::debug!(user_id, error = %err, "ignoring x-user-id bypass header");
            None
        }
    }
}

fn bearer_identity(tokens: &TokenHelper, headers: &HeaderMap) -> RequestIdentity {
    let Some(credentials) = headers.get(header::AUTHORIZATION).and_then(|value| value.to_str().ok()) else {
        return RequestIdentity::anonymous();
    };
    let Some((scheme, token)) = credentials.split_once(' ') else {
        return RequestIdentity::anonymous();
    };
    if !scheme.eq_ignore_ascii_case("bearer") {
        return RequestIdentity::anonymous();
    }

    match tokens.decode::<AccessClaims>(token.trim()) {
        Ok(claims) => RequestIdentity::user(claims.user_id),
        Err(err) => {
            tracing::debug!(error = %err, "unverifiable bearer token, treating request as anonymous");
            RequestIdentity::anonymous()
        }
    }
}
