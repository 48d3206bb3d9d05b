//! Initial pull request sync
//!
//! Seeds a freshly imported project with its most recently updated pull
//! requests. Existing rows are never touched, so running it again only adds
//! pull requests that webhooks have not delivered yet.

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::crypto::{CryptoError, CryptoKey, decrypt_user_token};
use crate::error::RepositoryError;
use crate::github::{GitHubApi, GitHubError, GitHubPullRequest};
use crate::models::project::Model as ProjectModel;
use crate::models::pull_request::PullRequestStatus;
use crate::repositories::{PullRequestRepository, PullRequestSnapshot, UserRepository};
use crate::webhook_events::GHOST_AUTHOR;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("importing user has no stored GitHub token")]
    MissingToken,
    #[error("stored GitHub token could not be decrypted: {0}")]
    Token(#[from] CryptoError),
    #[error("GitHub request failed: {0}")]
    GitHub(#[from] GitHubError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Counts reported after a sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Pull requests returned by GitHub
    pub fetched: usize,
    /// Pull requests that were not stored yet
    pub inserted: u64,
}

/// Status a listed GitHub pull request maps to
pub fn status_from_github(state: &str, merged_at: Option<DateTime<Utc>>) -> PullRequestStatus {
    if merged_at.is_some() {
        PullRequestStatus::Merged
    } else if state.eq_ignore_ascii_case("closed") {
        PullRequestStatus::Closed
    } else {
        PullRequestStatus::Open
    }
}

fn snapshot_from_github(project: &ProjectModel, pr: GitHubPullRequest) -> PullRequestSnapshot {
    PullRequestSnapshot {
        project_id: project.id,
        external_pr_number: pr.number as i64,
        status: Some(status_from_github(&pr.state, pr.merged_at)),
        title: pr.title,
        author: pr
            .user
            .map(|user| user.login)
            .unwrap_or_else(|| GHOST_AUTHOR.to_string()),
        external_created_at: pr.created_at,
        external_updated_at: pr.updated_at,
        external_closed_at: pr.closed_at,
        external_merged_at: pr.merged_at,
    }
}

/// Fetch up to `limit` recent pull requests of `project` with its importer's
/// token and insert the ones not stored yet.
#[instrument(skip(db, github, crypto_key, project), fields(project_id = %project.id))]
pub async fn sync_project(
    db: &DatabaseConnection,
    github: &dyn GitHubApi,
    crypto_key: &CryptoKey,
    project: &ProjectModel,
    limit: u32,
) -> Result<SyncSummary, SyncError> {
    let importer = UserRepository::new(db)
        .find_by_id(project.imported_by)
        .await?
        .ok_or(SyncError::MissingToken)?;
    let token = decrypt_user_token(crypto_key, &importer)?.ok_or(SyncError::MissingToken)?;

    let pulls = github
        .list_recent_pull_requests(&project.owner, &project.name, token.as_str(), limit)
        .await?;
    let fetched = pulls.len();

    let snapshots = pulls
        .into_iter()
        .map(|pr| snapshot_from_github(project, pr))
        .collect();
    let inserted = PullRequestRepository::new(db)
        .insert_missing(snapshots)
        .await?;

    info!(fetched, inserted, "Initial pull request sync finished");
    Ok(SyncSummary { fetched, inserted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ts;

    #[test]
    fn maps_github_state_to_status() {
        let merged_at = Some(ts("2024-05-01T10:00:00Z"));
        assert_eq!(status_from_github("closed", merged_at), PullRequestStatus::Merged);
        assert_eq!(status_from_github("closed", None), PullRequestStatus::Closed);
        assert_eq!(status_from_github("open", None), PullRequestStatus::Open);
    }
}
