//! # Authentication
//!
//! Session tokens are HS256 JWTs whose subject is the user id. The auth
//! middleware validates the bearer token, loads the user and stores it as a
//! [`CurrentUser`] request extension for handlers to extract.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::models::user::Model as UserModel;
use crate::repositories::UserRepository;
use crate::server::AppState;

/// JWT claims carried by session tokens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT signing secret is not configured")]
    MissingSecret,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token subject is not a user id")]
    InvalidSubject,
}

/// The authenticated user of the current request
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserModel);

/// Issue a session token for `user_id`
pub fn issue_token(config: &AppConfig, user_id: Uuid) -> Result<String, AuthError> {
    let secret = config
        .jwt_signing_secret()
        .ok_or(AuthError::MissingSecret)?;
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + config.jwt_ttl_seconds as i64,
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Validate signature and expiry of `token` and return its user id
pub fn decode_token(config: &AppConfig, token: &str) -> Result<Uuid, AuthError> {
    let secret = config
        .jwt_signing_secret()
        .ok_or(AuthError::MissingSecret)?;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;

    Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidSubject)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

/// Authentication middleware for user-facing routes
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;

    let user_id = decode_token(&state.config, token).map_err(|err| {
        tracing::debug!(error = %err, "Rejected bearer token");
        unauthorized(Some("Invalid or expired token"))
    })?;

    let user = UserRepository::new(&state.db)
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| unauthorized(Some("User no longer exists")))?;

    tracing::debug!(user_id = %user.id, username = %user.username, "Authenticated request");
    request.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| unauthorized(Some("Authentication required")))
    }
}
