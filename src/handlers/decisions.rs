//! # Decision Handlers

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::decisions::{DecisionSearchHit, DecisionService, DecisionView, SearchQuery};
use crate::error::ApiError;
use crate::repositories::DecisionContent;
use crate::server::AppState;

/// Decision body sent by the client
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveDecisionRequest {
    /// What was decided
    pub what: String,
    /// Why it was decided
    pub why: String,
    #[serde(default)]
    pub options_considered: Option<String>,
    #[serde(default)]
    pub tradeoffs: Option<String>,
}

impl From<SaveDecisionRequest> for DecisionContent {
    fn from(request: SaveDecisionRequest) -> Self {
        Self {
            what: request.what,
            why: request.why,
            options_considered: request.options_considered,
            tradeoffs: request.tradeoffs,
        }
    }
}

/// Query parameters for decision search
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SearchDecisionsParams {
    /// Whitespace separated terms matched against the decision text
    pub q: Option<String>,
    /// Exact author username
    pub author: Option<String>,
    /// GitHub repository id to search within
    pub repo_id: Option<String>,
    /// Maximum number of results (default 50, max 200)
    pub limit: Option<u64>,
}

fn service(state: &AppState) -> DecisionService<'_> {
    DecisionService::new(
        &state.db,
        state.github.as_ref(),
        &state.crypto_key,
        &state.config,
    )
}

/// Returns the decision of a pull request
#[utoipa::path(
    get,
    path = "/decisions/{pr_id}",
    security(("bearer_auth" = [])),
    params(("pr_id" = Uuid, Path, description = "Pull request id")),
    responses(
        (status = 200, description = "Decision", body = DecisionView),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "No decision for this pull request", body = ApiError)
    ),
    tag = "decisions"
)]
pub async fn get_decision(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(pr_id): Path<Uuid>,
) -> Result<Json<DecisionView>, ApiError> {
    let decision = service(&state).get_decision_by_pr(pr_id).await?;
    Ok(Json(decision.into()))
}

/// Creates or updates the decision of a pull request
#[utoipa::path(
    post,
    path = "/decisions/{pr_id}",
    security(("bearer_auth" = [])),
    params(("pr_id" = Uuid, Path, description = "Pull request id")),
    request_body = SaveDecisionRequest,
    responses(
        (status = 200, description = "Decision saved", body = DecisionView),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Caller may not document this pull request", body = ApiError),
        (status = 404, description = "Pull request not found", body = ApiError)
    ),
    tag = "decisions"
)]
pub async fn save_decision(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(pr_id): Path<Uuid>,
    payload: Result<Json<SaveDecisionRequest>, JsonRejection>,
) -> Result<Json<DecisionView>, ApiError> {
    let Json(request) = payload?;
    let decision = service(&state)
        .upsert_decision(pr_id, request.into(), &user)
        .await?;
    Ok(Json(decision.into()))
}

/// Searches decisions, newest first
#[utoipa::path(
    get,
    path = "/decisions",
    security(("bearer_auth" = [])),
    params(SearchDecisionsParams),
    responses(
        (status = 200, description = "Matching decisions", body = [DecisionSearchHit]),
        (status = 400, description = "Invalid query", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "decisions"
)]
pub async fn search_decisions(
    State(state): State<AppState>,
    _user: CurrentUser,
    params: Result<Query<SearchDecisionsParams>, QueryRejection>,
) -> Result<Json<Vec<DecisionSearchHit>>, ApiError> {
    let Query(params) = params.map_err(|rejection| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            rejection.body_text(),
        )
    })?;

    let hits = service(&state)
        .search_decisions(SearchQuery {
            text: params.q,
            author: params.author,
            repo_id: params.repo_id,
            limit: params.limit,
        })
        .await?;
    Ok(Json(hits))
}
