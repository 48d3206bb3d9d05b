//! # Project Handlers
//!
//! Importing GitHub repositories, listing their pull requests and deleting
//! projects with everything they own.

use std::sync::LazyLock;

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::cascade::{self, CascadeReport};
use crate::crypto::decrypt_user_token;
use crate::error::{self, ApiError};
use crate::github::GitHubError;
use crate::initial_sync::{self, SyncError, SyncSummary};
use crate::models::project::{Model as ProjectModel, Visibility, canonical_repo_id};
use crate::models::user::Model as UserModel;
use crate::repositories::{NewProject, ProjectRepository, PullRequestRepository, PullRequestWithDecision};
use crate::server::AppState;

static REPO_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]{1,100}$").expect("repository segment pattern is valid")
});

/// Project as returned by the API
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: Uuid,
    pub external_repo_id: String,
    pub name: String,
    pub owner: String,
    pub visibility: Visibility,
    pub imported_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<ProjectModel> for ProjectResponse {
    fn from(model: ProjectModel) -> Self {
        Self {
            id: model.id,
            external_repo_id: model.external_repo_id,
            name: model.name,
            owner: model.owner,
            visibility: model.visibility,
            imported_by: model.imported_by,
            created_at: model.created_at.to_utc(),
        }
    }
}

/// GitHub repository offered for import
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitHubRepositoryResponse {
    pub external_repo_id: String,
    pub name: String,
    pub full_name: String,
    pub owner: String,
    pub visibility: Visibility,
    pub description: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether any user already imported this repository
    pub is_imported: bool,
}

/// Import request body
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportProjectRequest {
    pub external_repo_id: String,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

/// Result of the sync that runs right after an import
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportSyncStatus {
    /// `completed` or `failed`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportSyncStatus {
    fn completed(summary: SyncSummary) -> Self {
        Self {
            status: "completed".to_string(),
            fetched: Some(summary.fetched),
            inserted: Some(summary.inserted),
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: "failed".to_string(),
            fetched: None,
            inserted: None,
            error: Some(error),
        }
    }
}

/// Import response
#[derive(Debug, Serialize, ToSchema)]
pub struct ImportProjectResponse {
    pub project: ProjectResponse,
    pub sync: ImportSyncStatus,
}

/// Checks the import body and returns the canonical repository id
fn validate_import(request: &ImportProjectRequest) -> Result<String, ApiError> {
    let mut field_errors = serde_json::Map::new();

    let external_id = canonical_repo_id(&request.external_repo_id);
    if external_id.is_none() {
        field_errors.insert(
            "externalRepoId".to_string(),
            json!("must be the numeric GitHub repository id"),
        );
    }
    if !REPO_SEGMENT.is_match(&request.name) {
        field_errors.insert("name".to_string(), json!("invalid repository name"));
    }
    if !REPO_SEGMENT.is_match(&request.owner) {
        field_errors.insert("owner".to_string(), json!("invalid repository owner"));
    }

    match external_id {
        Some(id) if field_errors.is_empty() => Ok(id),
        _ => Err(error::validation_error(
            "Invalid import request",
            serde_json::Value::Object(field_errors),
        )),
    }
}

fn github_failure(err: GitHubError) -> ApiError {
    warn!(error = %err, "GitHub request failed");
    error::upstream_error(err.upstream_status(), "GitHub request failed")
}

fn sync_failure(err: SyncError) -> ApiError {
    match err {
        SyncError::MissingToken | SyncError::Token(_) => ApiError::new(
            StatusCode::BAD_REQUEST,
            "GITHUB_TOKEN_MISSING",
            "No usable GitHub token is stored for the importing user",
        ),
        SyncError::GitHub(err) => github_failure(err),
        SyncError::Repository(err) => err.into(),
    }
}

async fn load_project(state: &AppState, id: Uuid) -> Result<ProjectModel, ApiError> {
    ProjectRepository::new(&state.db)
        .find_by_id(id)
        .await?
        .ok_or_else(|| error::not_found("Project not found"))
}

fn require_importer(project: &ProjectModel, user: &UserModel) -> Result<(), ApiError> {
    if project.imported_by == user.id {
        Ok(())
    } else {
        Err(error::forbidden(Some(
            "Only the user who imported the project can do this",
        )))
    }
}

/// Lists projects imported by the caller, newest first
#[utoipa::path(
    get,
    path = "/projects",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Imported projects", body = [ProjectResponse]),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn list_projects(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ProjectResponse>>, ApiError> {
    let projects = ProjectRepository::new(&state.db)
        .list_by_importer(user.id)
        .await?;
    Ok(Json(projects.into_iter().map(Into::into).collect()))
}

/// Lists the caller's GitHub repositories, flagging those already imported
#[utoipa::path(
    get,
    path = "/projects/github",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "GitHub repositories", body = [GitHubRepositoryResponse]),
        (status = 400, description = "No GitHub token stored", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 502, description = "GitHub request failed", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn list_github_repositories(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<GitHubRepositoryResponse>>, ApiError> {
    let token = decrypt_user_token(&state.crypto_key, &user)
        .map_err(|err| {
            warn!(user_id = %user.id, error = %err, "Stored GitHub token unreadable");
            sync_failure(SyncError::Token(err))
        })?
        .ok_or_else(|| sync_failure(SyncError::MissingToken))?;

    let repositories = state
        .github
        .list_user_repositories(token.as_str())
        .await
        .map_err(github_failure)?;

    let external_ids: Vec<String> = repositories.iter().map(|r| r.id.to_string()).collect();
    let imported = ProjectRepository::new(&state.db)
        .imported_external_ids(&external_ids)
        .await?;

    Ok(Json(
        repositories
            .into_iter()
            .map(|repo| {
                let external_repo_id = repo.id.to_string();
                GitHubRepositoryResponse {
                    is_imported: imported.contains(&external_repo_id),
                    external_repo_id,
                    name: repo.name,
                    full_name: repo.full_name,
                    owner: repo.owner.login,
                    visibility: if repo.private {
                        Visibility::Private
                    } else {
                        Visibility::Public
                    },
                    description: repo.description,
                    updated_at: repo.updated_at,
                }
            })
            .collect(),
    ))
}

/// Imports a GitHub repository and seeds its recent pull requests
#[utoipa::path(
    post,
    path = "/projects/import",
    security(("bearer_auth" = [])),
    request_body = ImportProjectRequest,
    responses(
        (status = 201, description = "Project imported", body = ImportProjectResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 409, description = "Repository already imported", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn import_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<ImportProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ImportProjectResponse>), ApiError> {
    let Json(request) = payload?;
    let external_repo_id = validate_import(&request)?;

    let project = ProjectRepository::new(&state.db)
        .create(NewProject {
            external_repo_id,
            name: request.name,
            owner: request.owner,
            visibility: request.visibility.unwrap_or_default(),
            imported_by: user.id,
        })
        .await
        .map_err(|err| {
            if err.is_conflict() {
                ApiError::new(
                    StatusCode::CONFLICT,
                    "CONFLICT",
                    "Repository has already been imported",
                )
            } else {
                err.into()
            }
        })?;

    info!(project_id = %project.id, user_id = %user.id, "Project imported");

    let sync = match initial_sync::sync_project(
        &state.db,
        state.github.as_ref(),
        &state.crypto_key,
        &project,
        state.config.initial_sync_pr_limit,
    )
    .await
    {
        Ok(summary) => ImportSyncStatus::completed(summary),
        Err(err) => {
            warn!(project_id = %project.id, error = %err, "Initial pull request sync failed");
            ImportSyncStatus::failed(err.to_string())
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(ImportProjectResponse {
            project: project.into(),
            sync,
        }),
    ))
}

/// Lists a project's pull requests with their decision status
#[utoipa::path(
    get,
    path = "/projects/{id}/prs",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Pull requests, most recently updated first", body = [PullRequestWithDecision]),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn list_pull_requests(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PullRequestWithDecision>>, ApiError> {
    let project = load_project(&state, id).await?;
    let pull_requests = PullRequestRepository::new(&state.db)
        .list_with_decision_status(project.id)
        .await?;
    Ok(Json(pull_requests))
}

/// Deletes a project together with its pull requests and decisions
#[utoipa::path(
    delete,
    path = "/projects/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project deleted", body = CascadeReport),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Caller did not import the project", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError),
        (status = 500, description = "Cascade aborted", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn delete_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CascadeReport>, ApiError> {
    let report = cascade::delete_project(&state.db, id, user.id).await?;
    Ok(Json(report))
}

/// Re-runs the initial pull request sync of a project
#[utoipa::path(
    post,
    path = "/projects/{id}/sync",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Sync finished", body = SyncSummary),
        (status = 400, description = "No GitHub token stored", body = ApiError),
        (status = 403, description = "Caller did not import the project", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError),
        (status = 502, description = "GitHub request failed", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn sync_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncSummary>, ApiError> {
    let project = load_project(&state, id).await?;
    require_importer(&project, &user)?;

    let summary = initial_sync::sync_project(
        &state.db,
        state.github.as_ref(),
        &state.crypto_key,
        &project,
        state.config.initial_sync_pr_limit,
    )
    .await
    .map_err(sync_failure)?;

    Ok(Json(summary))
}
