//! # Auth Handlers
//!
//! GitHub OAuth sign-in, the development login shortcut and the current user
//! profile.

use std::sync::LazyLock;

use axum::{
    extract::{Query, State, rejection::JsonRejection},
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{AuthError, CurrentUser, issue_token};
use crate::crypto::encrypt_user_token;
use crate::error::{self, ApiError};
use crate::github::GitHubError;
use crate::models::user::Model as UserModel;
use crate::repositories::{GitHubIdentity, UserRepository};
use crate::server::AppState;

static DEV_USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9-]{1,39}$").expect("username pattern is valid")
});

/// Signed-in user profile
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub github_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    /// Whether a GitHub token is stored for permission checks and sync
    pub has_github_token: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserModel> for UserResponse {
    fn from(user: UserModel) -> Self {
        Self {
            id: user.id,
            github_id: user.github_id,
            username: user.username,
            avatar_url: user.avatar_url,
            has_github_token: user.access_token_ciphertext.is_some(),
            created_at: user.created_at.to_utc(),
        }
    }
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct OAuthCallbackParams {
    /// Authorization code issued by GitHub
    pub code: Option<String>,
    /// Error reported by GitHub when the user denied access
    pub error: Option<String>,
}

/// Development login body
#[derive(Debug, Deserialize, ToSchema)]
pub struct DevLoginRequest {
    pub username: String,
}

/// Session token with the user it belongs to
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

fn token_error(err: AuthError) -> ApiError {
    tracing::error!(error = %err, "Failed to issue session token");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_SERVER_ERROR",
        "Failed to issue session token",
    )
}

fn github_failure(err: GitHubError) -> ApiError {
    match err {
        GitHubError::NotConfigured(what) => {
            warn!(missing = what, "GitHub OAuth is not configured");
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "GitHub sign-in is not configured",
            )
        }
        err => {
            warn!(error = %err, "GitHub OAuth request failed");
            error::upstream_error(err.upstream_status(), "GitHub sign-in failed")
        }
    }
}

/// Redirects the browser to GitHub's consent screen
#[utoipa::path(
    get,
    path = "/auth/github",
    responses(
        (status = 302, description = "Redirect to GitHub"),
        (status = 503, description = "GitHub OAuth not configured", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn github_login(State(state): State<AppState>) -> Result<Response, ApiError> {
    let oauth_state = Uuid::new_v4().simple().to_string();
    let url = state
        .github
        .authorize_url(&oauth_state)
        .map_err(github_failure)?;
    Ok(redirect(url.as_str()))
}

/// Completes GitHub sign-in and hands a session token to the client app
#[utoipa::path(
    get,
    path = "/auth/github/callback",
    params(OAuthCallbackParams),
    responses(
        (status = 302, description = "Redirect to the client with a session token"),
        (status = 400, description = "Missing authorization code", body = ApiError),
        (status = 502, description = "GitHub request failed", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn github_callback(
    State(state): State<AppState>,
    Query(params): Query<OAuthCallbackParams>,
) -> Result<Response, ApiError> {
    if let Some(reason) = params.error.as_deref() {
        info!(reason, "GitHub sign-in was not granted");
    }
    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                "Missing authorization code",
            )
        })?;

    let access_token = state
        .github
        .exchange_code(&code)
        .await
        .map_err(github_failure)?;
    let profile = state
        .github
        .current_user(&access_token)
        .await
        .map_err(github_failure)?;

    let github_id = profile.id.to_string();
    let ciphertext = encrypt_user_token(&state.crypto_key, &github_id, &access_token)
        .map_err(|err| ApiError::from(anyhow::Error::new(err)))?;

    let user = UserRepository::new(&state.db)
        .upsert_from_github(GitHubIdentity {
            github_id,
            username: profile.login,
            avatar_url: profile.avatar_url,
            access_token_ciphertext: Some(ciphertext),
        })
        .await?;
    info!(user_id = %user.id, username = %user.username, "User signed in with GitHub");

    let token = issue_token(&state.config, user.id).map_err(token_error)?;

    let mut target = Url::parse(&state.config.client_url)
        .and_then(|base| base.join("/auth/callback"))
        .map_err(|err| ApiError::from(anyhow::Error::new(err)))?;
    target.query_pairs_mut().append_pair("token", &token);

    Ok(redirect(target.as_str()))
}

/// Signs in as a local user without GitHub (local and test profiles only)
#[utoipa::path(
    post,
    path = "/auth/dev-login",
    request_body = DevLoginRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 400, description = "Invalid username", body = ApiError),
        (status = 404, description = "Not available in this profile", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn dev_login(
    State(state): State<AppState>,
    payload: Result<Json<DevLoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    if !state.config.is_development() {
        return Err(error::not_found("Not found"));
    }

    let Json(request) = payload?;
    let username = request.username.trim();
    if !DEV_USERNAME.is_match(username) {
        return Err(error::validation_error(
            "Invalid username",
            serde_json::json!({ "username": "1-39 letters, digits or dashes" }),
        ));
    }

    let user = UserRepository::new(&state.db)
        .upsert_from_github(GitHubIdentity {
            github_id: format!("dev-{username}"),
            username: username.to_string(),
            avatar_url: None,
            access_token_ciphertext: None,
        })
        .await?;
    let token = issue_token(&state.config, user.id).map_err(token_error)?;

    Ok(Json(LoginResponse {
        token,
        user: user.into(),
    }))
}

/// Returns the signed-in user
#[utoipa::path(
    get,
    path = "/auth/me",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(user.into())
}
