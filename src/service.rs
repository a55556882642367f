use axum::http::StatusCode;
use thiserror::Error;

use crate::{
    auth::{TokenError, TokenHelper},
    db::{DbError, Transactional},
    error::ApiError,
    models::{CreateUserRequest, Location, NewUser, TokenResponse, User, UserResponse},
    repository::RepositoryState,
};

const MAX_PAGE_SIZE: i64 = 12;

/// UserError
///
/// Failures of the user use cases. The domain variants are user-facing; the rest surface as
/// a generic internal error.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("password does not match")]
    PasswordDoesNotMatch,
    #[error("duplicate email or nickname")]
    DuplicateEmailOrNickname,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::PasswordDoesNotMatch => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "USER__PASSWORD_DOES_NOT_MATCH",
                "password does not match",
            ),
            UserError::DuplicateEmailOrNickname => ApiError::new(
                StatusCode::BAD_REQUEST,
                "USER__DUPLICATE_EMAIL_OR_NICKNAME",
                "duplicate email or nickname",
            ),
            UserError::NotFound => ApiError::new(StatusCode::NOT_FOUND, "USER__NOT_FOUND", "user not found"),
            UserError::Database(err) => err.into(),
            UserError::Token(err) => err.into(),
            UserError::PasswordHash(err) => {
                tracing::error!(error = %err, "password hashing failed");
                ApiError::internal()
            }
        }
    }
}

/// CreateUserCommand
///
/// Sign-up input as the use case sees it.
#[derive(Debug, Clone)]
pub struct CreateUserCommand {
    pub email: String,
    pub password1: String,
    pub password2: String,
    pub nickname: String,
    pub location: Location,
}

impl From<CreateUserRequest> for CreateUserCommand {
    fn from(request: CreateUserRequest) -> Self {
        Self {
            email: request.email,
            password1: request.password1,
            password2: request.password2,
            nickname: request.nickname,
            location: Location {
                lat: request.lat,
                lng: request.lng,
            },
        }
    }
}

/// UserService
///
/// The user use cases. Mutating use cases are the transaction boundaries: each runs inside
/// exactly one `Transactional`.
#[derive(Clone)]
pub struct UserService {
    repository: RepositoryState,
    transactional: Transactional,
    tokens: TokenHelper,
}

impl UserService {
    pub fn new(repository: RepositoryState, transactional: Transactional, tokens: TokenHelper) -> Self {
        Self {
            repository,
            transactional,
            tokens,
        }
    }

    /// Lists users below `prev`, newest first. `limit` is capped at 12.
    pub async fn get_user_list(&self, limit: i64, prev: Option<i64>) -> Result<Vec<UserResponse>, UserError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let users = self.repository.get_users(limit, prev).await?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User, UserError> {
        self.repository
            .get_user_by_id(user_id)
            .await?
            .ok_or(UserError::NotFound)
    }

    /// create_user
    ///
    /// Validates the sign-up and stages the insert; the wrapper commits it.
    pub async fn create_user(&self, command: CreateUserCommand) -> Result<(), UserError> {
        let repository = &self.repository;
        let command = &command;
        self.transactional
            .run(|| async move {
                if command.password1 != command.password2 {
                    return Err(UserError::PasswordDoesNotMatch);
                }

                let existing = repository
                    .get_user_by_email_or_nickname(&command.email, &command.nickname)
                    .await?;
                if existing.is_some() {
                    return Err(UserError::DuplicateEmailOrNickname);
                }

                let user = NewUser::create(
                    command.email.clone(),
                    &command.password1,
                    command.nickname.clone(),
                    command.location,
                )?;
                repository.save(&user).await?;
                tracing::info!(email = %command.email, "user staged for creation");
                Ok(())
            })
            .await
    }

    /// Deletes one user. `NotFound` when there is no such user.
    pub async fn delete_user(&self, user_id: i64) -> Result<(), UserError> {
        let repository = &self.repository;
        self.transactional
            .run(|| async move {
                if repository.delete_user(user_id).await? {
                    Ok(())
                } else {
                    Err(UserError::NotFound)
                }
            })
            .await
    }

    /// Whether `user_id` names an existing administrator.
    pub async fn is_admin(&self, user_id: i64) -> Result<bool, UserError> {
        let user = self.repository.get_user_by_id(user_id).await?;
        Ok(user.is_some_and(|user| user.is_admin))
    }

    /// login
    ///
    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, UserError> {
        let user = self
            .repository
            .get_user_by_email(email)
            .await?
            .ok_or(UserError::NotFound)?;

        if !bcrypt::verify(password, &user.password).unwrap_or(false) {
            return Err(UserError::NotFound);
        }

        Ok(self.tokens.token_pair(user.id)?)
    }
}
