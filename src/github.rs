//! GitHub REST and OAuth client
//!
//! Thin wrapper over the GitHub endpoints WhyStack needs: the OAuth code
//! exchange, the signed-in user's profile and repositories, per-repository
//! permissions and the most recently updated pull requests. Every request
//! carries a bounded timeout and is never retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::AppConfig;

const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";
const OAUTH_SCOPE: &str = "repo,user";
const MAX_ERROR_BODY_CHARS: usize = 200;

/// GitHub client errors
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("OAuth authentication failed: {0}")]
    OAuth(String),

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("GitHub OAuth is not configured: {0}")]
    NotConfigured(&'static str),
}

impl GitHubError {
    /// HTTP status reported by GitHub, when a response was received
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            GitHubError::Api { status, .. } => Some(*status),
            GitHubError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Minimal GitHub account as embedded in other payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAccount {
    pub login: String,
}

/// Authenticated user profile (`GET /user`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub id: u64,
    pub login: String,
    pub avatar_url: Option<String>,
}

/// Repository permissions of the calling user
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub pull: bool,
}

impl RepoPermissions {
    /// Push or admin access allows writing decisions
    pub fn can_write(&self) -> bool {
        self.push || self.admin
    }
}

/// Repository as listed by `GET /user/repos`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub owner: GitHubAccount,
    #[serde(default)]
    pub private: bool,
    pub description: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Pull request as listed by `GET /repos/{owner}/{repo}/pulls`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubPullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: Option<GitHubAccount>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPermissionsEnvelope {
    #[serde(default)]
    permissions: Option<RepoPermissions>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Operations WhyStack performs against GitHub.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// URL the browser is redirected to for the OAuth consent screen
    fn authorize_url(&self, state: &str) -> Result<Url, GitHubError>;

    /// Exchange an OAuth authorization code for an access token
    async fn exchange_code(&self, code: &str) -> Result<String, GitHubError>;

    /// Profile of the user owning `token`
    async fn current_user(&self, token: &str) -> Result<GitHubUser, GitHubError>;

    /// Repositories visible to the user owning `token`, most recently updated first
    async fn list_user_repositories(&self, token: &str)
    -> Result<Vec<GitHubRepository>, GitHubError>;

    /// Permissions of the user owning `token` on `owner/name`
    async fn repo_permissions(
        &self,
        owner: &str,
        name: &str,
        token: &str,
    ) -> Result<RepoPermissions, GitHubError>;

    /// Up to `limit` pull requests of `owner/name` in any state, most recently updated first
    async fn list_recent_pull_requests(
        &self,
        owner: &str,
        name: &str,
        token: &str,
        limit: u32,
    ) -> Result<Vec<GitHubPullRequest>, GitHubError>;
}

/// reqwest-backed [`GitHubApi`] implementation
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    oauth_base: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    callback_url: Option<String>,
}

impl GitHubClient {
    /// Build a client from application configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.github_http_timeout_ms))
            .user_agent(format!("WhyStack/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: config.github_api_base.trim_end_matches('/').to_string(),
            oauth_base: config.github_oauth_base.trim_end_matches('/').to_string(),
            client_id: config.github_client_id.clone(),
            client_secret: config.github_client_secret.clone(),
            callback_url: config.github_callback_url.clone(),
        })
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, GitHubError> {
        let mut url = Url::parse(&self.api_base)?;
        url.path_segments_mut()
            .map_err(|_| GitHubError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        token: &str,
        context: &str,
    ) -> Result<T, GitHubError> {
        debug!(url = %url, "GitHub API request");
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("Accept", ACCEPT_HEADER)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, context, "GitHub API request failed");
            Err(GitHubError::Api {
                status,
                message: format!("{}: {}", context, truncate(&body)),
            })
        }
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    fn authorize_url(&self, state: &str) -> Result<Url, GitHubError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or(GitHubError::NotConfigured("client id"))?;

        let mut url = Url::parse(&format!("{}/login/oauth/authorize", self.oauth_base))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", client_id)
                .append_pair("scope", OAUTH_SCOPE)
                .append_pair("state", state);
            if let Some(callback) = self.callback_url.as_deref() {
                query.append_pair("redirect_uri", callback);
            }
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, GitHubError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or(GitHubError::NotConfigured("client id"))?;
        let client_secret = self
            .client_secret
            .as_deref()
            .ok_or(GitHubError::NotConfigured("client secret"))?;

        let mut params = vec![
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
        ];
        if let Some(callback) = self.callback_url.as_deref() {
            params.push(("redirect_uri", callback));
        }

        let response = self
            .http
            .post(format!("{}/login/oauth/access_token", self.oauth_base))
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::OAuth(format!(
                "token exchange failed: {} - {}",
                status,
                truncate(&body)
            )));
        }

        // GitHub reports OAuth errors with a 200 status and an `error` field.
        let token: TokenResponse = response.json().await?;
        match (token.access_token, token.error) {
            (Some(access_token), None) if !access_token.is_empty() => Ok(access_token),
            (_, error) => Err(GitHubError::OAuth(
                token
                    .error_description
                    .or(error)
                    .unwrap_or_else(|| "no access token returned".to_string()),
            )),
        }
    }

    async fn current_user(&self, token: &str) -> Result<GitHubUser, GitHubError> {
        let url = self.api_url(&["user"])?;
        self.get_json(url, token, "failed to get user info").await
    }

    async fn list_user_repositories(
        &self,
        token: &str,
    ) -> Result<Vec<GitHubRepository>, GitHubError> {
        let mut url = self.api_url(&["user", "repos"])?;
        url.query_pairs_mut()
            .append_pair("per_page", "100")
            .append_pair("sort", "updated");
        self.get_json(url, token, "failed to list repositories").await
    }

    async fn repo_permissions(
        &self,
        owner: &str,
        name: &str,
        token: &str,
    ) -> Result<RepoPermissions, GitHubError> {
        let url = self.api_url(&["repos", owner, name])?;
        let envelope: RepositoryPermissionsEnvelope = self
            .get_json(url, token, "failed to read repository permissions")
            .await?;
        Ok(envelope.permissions.unwrap_or_default())
    }

    async fn list_recent_pull_requests(
        &self,
        owner: &str,
        name: &str,
        token: &str,
        limit: u32,
    ) -> Result<Vec<GitHubPullRequest>, GitHubError> {
        let mut url = self.api_url(&["repos", owner, name, "pulls"])?;
        url.query_pairs_mut()
            .append_pair("state", "all")
            .append_pair("sort", "updated")
            .append_pair("direction", "desc")
            .append_pair("per_page", &limit.clamp(1, 100).to_string());
        let mut pulls: Vec<GitHubPullRequest> = self
            .get_json(url, token, "failed to list pull requests")
            .await?;
        pulls.truncate(limit as usize);
        Ok(pulls)
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}...", truncated)
    } else {
        body.to_string()
    }
}
