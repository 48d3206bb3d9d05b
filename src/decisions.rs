//! Decision service
//!
//! Permission-gated, versioned writes of decision records plus lookup and
//! search. Writes are allowed for the project owner, the pull request author,
//! or a GitHub collaborator with push access; anything that prevents the
//! GitHub check from completing denies the write.

use std::collections::HashMap;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::{CryptoKey, decrypt_user_token};
use crate::error::{self, ApiError, RepositoryError};
use crate::github::GitHubApi;
use crate::models::decision::{DecisionStatus, Model as DecisionModel};
use crate::models::project::{Model as ProjectModel, canonical_repo_id};
use crate::models::pull_request::{Model as PullRequestModel, PullRequestStatus};
use crate::models::user::Model as UserModel;
use crate::repositories::{
    DecisionContent, DecisionRepository, DecisionSearch, ProjectRepository,
    PullRequestRepository,
};

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("pull request not found")]
    PullRequestNotFound,
    #[error("decision not found")]
    DecisionNotFound,
    #[error("not allowed to document decisions on this pull request")]
    Forbidden,
    #[error("invalid decision: {0}")]
    Validation(&'static str),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<DecisionError> for ApiError {
    fn from(err: DecisionError) -> Self {
        match err {
            DecisionError::PullRequestNotFound => error::not_found("Pull request not found"),
            DecisionError::DecisionNotFound => error::not_found("Decision not found"),
            DecisionError::Forbidden => error::forbidden(Some(
                "You do not have permission to document this pull request",
            )),
            DecisionError::Validation(message) => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
            }
            DecisionError::Repository(err) => err.into(),
        }
    }
}

/// Decision as returned by the API
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionView {
    pub id: Uuid,
    pub pull_request_id: Uuid,
    pub what: String,
    pub why: String,
    pub options_considered: Option<String>,
    pub tradeoffs: Option<String>,
    pub author: String,
    pub status: DecisionStatus,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DecisionModel> for DecisionView {
    fn from(model: DecisionModel) -> Self {
        Self {
            id: model.id,
            pull_request_id: model.pull_request_id,
            what: model.what,
            why: model.why,
            options_considered: model.options_considered,
            tradeoffs: model.tradeoffs,
            author: model.author,
            status: model.status,
            version: model.version,
            created_at: model.created_at.to_utc(),
            updated_at: model.updated_at.to_utc(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestSummary {
    pub id: Uuid,
    pub number: i64,
    pub title: String,
    pub author: String,
    pub status: PullRequestStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
}

/// Search hit with the pull request and project it belongs to
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSearchHit {
    #[serde(flatten)]
    pub decision: DecisionView,
    pub pull_request: Option<PullRequestSummary>,
    pub project: Option<ProjectSummary>,
}

/// Search filters as received from the caller
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub author: Option<String>,
    /// GitHub repository id to scope the search to
    pub repo_id: Option<String>,
    pub limit: Option<u64>,
}

/// Decision operations backed by the database and GitHub
pub struct DecisionService<'a> {
    db: &'a DatabaseConnection,
    github: &'a dyn GitHubApi,
    crypto_key: &'a CryptoKey,
    config: &'a AppConfig,
}

impl<'a> DecisionService<'a> {
    pub fn new(
        db: &'a DatabaseConnection,
        github: &'a dyn GitHubApi,
        crypto_key: &'a CryptoKey,
        config: &'a AppConfig,
    ) -> Self {
        Self {
            db,
            github,
            crypto_key,
            config,
        }
    }

    /// Whether `user` may write the decision of `pull_request` in `project`.
    ///
    /// Owner and author are allowed without calling GitHub. Otherwise the
    /// user's stored token is used to read their repository permissions; a
    /// missing token or any GitHub failure denies.
    pub async fn check_write_permission(
        &self,
        user: &UserModel,
        project: &ProjectModel,
        pull_request: &PullRequestModel,
    ) -> bool {
        if user.username == project.owner {
            return true;
        }
        if user.username == pull_request.author {
            return true;
        }

        let token = match decrypt_user_token(self.crypto_key, user) {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(user_id = %user.id, "No stored GitHub token; denying decision write");
                return false;
            }
            Err(err) => {
                warn!(user_id = %user.id, error = %err, "Stored GitHub token unreadable; denying decision write");
                return false;
            }
        };

        match self
            .github
            .repo_permissions(&project.owner, &project.name, token.as_str())
            .await
        {
            Ok(permissions) => permissions.can_write(),
            Err(err) => {
                warn!(
                    user_id = %user.id,
                    repository = %format!("{}/{}", project.owner, project.name),
                    error = %err,
                    "GitHub permission check failed; denying decision write"
                );
                false
            }
        }
    }

    /// Create or update the decision of a pull request.
    #[instrument(skip(self, content, user), fields(user_id = %user.id))]
    pub async fn upsert_decision(
        &self,
        pull_request_id: Uuid,
        content: DecisionContent,
        user: &UserModel,
    ) -> Result<DecisionModel, DecisionError> {
        let content = normalize_content(content)?;

        let pull_requests = PullRequestRepository::new(self.db);
        let pull_request = pull_requests
            .find_by_id(pull_request_id)
            .await?
            .ok_or(DecisionError::PullRequestNotFound)?;
        let project = ProjectRepository::new(self.db)
            .find_by_id(pull_request.project_id)
            .await?
            .ok_or(DecisionError::PullRequestNotFound)?;

        if !self
            .check_write_permission(user, &project, &pull_request)
            .await
        {
            counter!("decision_writes_total", "result" => "forbidden").increment(1);
            return Err(DecisionError::Forbidden);
        }

        let decisions = DecisionRepository::new(self.db);
        let decision = match decisions
            .update_content(pull_request_id, content.clone())
            .await?
        {
            Some(updated) => updated,
            None => match decisions
                .create(pull_request_id, content.clone(), &user.username)
                .await
            {
                Ok(created) => created,
                Err(err) if err.is_conflict() => {
                    debug!("Concurrent first save detected; retrying as update");
                    decisions
                        .update_content(pull_request_id, content)
                        .await?
                        .ok_or(DecisionError::DecisionNotFound)?
                }
                Err(err) => return Err(err.into()),
            },
        };

        // A merge may have flagged the row since it was loaded above.
        if pull_requests
            .set_merged_without_decision(pull_request.id, false)
            .await?
        {
            debug!(pull_request_id = %pull_request.id, "Cleared merged-without-decision flag");
        }

        counter!("decision_writes_total", "result" => "saved").increment(1);
        info!(
            decision_id = %decision.id,
            version = decision.version,
            "Decision saved"
        );

        Ok(decision)
    }

    pub async fn get_decision_by_pr(
        &self,
        pull_request_id: Uuid,
    ) -> Result<DecisionModel, DecisionError> {
        DecisionRepository::new(self.db)
            .find_by_pull_request(pull_request_id)
            .await?
            .ok_or(DecisionError::DecisionNotFound)
    }

    /// Search decisions, newest first, each with its pull request and project.
    pub async fn search_decisions(
        &self,
        query: SearchQuery,
    ) -> Result<Vec<DecisionSearchHit>, DecisionError> {
        let repo_id = query.repo_id.filter(|id| !id.trim().is_empty());
        let pull_request_ids = match repo_id {
            Some(raw) => {
                // Ids that are not numeric can never match an imported repository.
                let Some(external_id) = canonical_repo_id(&raw) else {
                    return Ok(Vec::new());
                };
                match ProjectRepository::new(self.db)
                    .find_by_external_repo_id(&external_id)
                    .await?
                {
                    Some(project) => Some(
                        PullRequestRepository::new(self.db)
                            .ids_for_project(project.id)
                            .await?,
                    ),
                    None => return Ok(Vec::new()),
                }
            }
            None => None,
        };

        let decisions = DecisionRepository::new(self.db)
            .search(DecisionSearch {
                text: query.text.filter(|t| !t.trim().is_empty()),
                author: query.author.filter(|a| !a.trim().is_empty()),
                pull_request_ids,
                limit: self.config.decision_search_limit(query.limit),
            })
            .await?;

        self.enrich(decisions).await
    }

    async fn enrich(
        &self,
        decisions: Vec<DecisionModel>,
    ) -> Result<Vec<DecisionSearchHit>, DecisionError> {
        let pr_ids: Vec<Uuid> = decisions.iter().map(|d| d.pull_request_id).collect();
        let pull_requests: HashMap<Uuid, PullRequestModel> = PullRequestRepository::new(self.db)
            .find_by_ids(&pr_ids)
            .await?
            .into_iter()
            .map(|pr| (pr.id, pr))
            .collect();

        let mut project_ids: Vec<Uuid> = pull_requests.values().map(|pr| pr.project_id).collect();
        project_ids.sort_unstable();
        project_ids.dedup();
        let projects: HashMap<Uuid, ProjectModel> = ProjectRepository::new(self.db)
            .find_by_ids(&project_ids)
            .await?
            .into_iter()
            .map(|project| (project.id, project))
            .collect();

        Ok(decisions
            .into_iter()
            .map(|decision| {
                let pull_request = pull_requests.get(&decision.pull_request_id);
                let project = pull_request.and_then(|pr| projects.get(&pr.project_id));
                DecisionSearchHit {
                    pull_request: pull_request.map(|pr| PullRequestSummary {
                        id: pr.id,
                        number: pr.external_pr_number,
                        title: pr.title.clone(),
                        author: pr.author.clone(),
                        status: pr.status,
                    }),
                    project: project.map(|p| ProjectSummary {
                        id: p.id,
                        name: p.name.clone(),
                        owner: p.owner.clone(),
                    }),
                    decision: decision.into(),
                }
            })
            .collect())
    }
}

fn normalize_content(content: DecisionContent) -> Result<DecisionContent, DecisionError> {
    let what = content.what.trim().to_string();
    let why = content.why.trim().to_string();
    if what.is_empty() {
        return Err(DecisionError::Validation("`what` must not be blank"));
    }
    if why.is_empty() {
        return Err(DecisionError::Validation("`why` must not be blank"));
    }

    Ok(DecisionContent {
        what,
        why,
        options_considered: content.options_considered.filter(|s| !s.trim().is_empty()),
        tradeoffs: content.tradeoffs.filter(|s| !s.trim().is_empty()),
    })
}
