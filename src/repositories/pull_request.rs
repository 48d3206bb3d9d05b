//! # Pull Request Repository
//!
//! Persistence for pull requests. Webhook writes go through a single atomic
//! `INSERT ... ON CONFLICT (project_id, external_pr_number) DO UPDATE`, guarded
//! so that an older delivery never overwrites newer state.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Alias, Condition, Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::decision::{DecisionStatus, Entity as Decision};
use crate::models::pull_request::{
    self, ActiveModel as PullRequestActiveModel, Entity as PullRequest, Model as PullRequestModel,
    PullRequestStatus,
};

/// External state of a pull request as reported by GitHub
#[derive(Debug, Clone)]
pub struct PullRequestSnapshot {
    pub project_id: Uuid,
    pub external_pr_number: i64,
    pub title: String,
    pub author: String,
    /// `None` leaves the stored status untouched (new rows start `OPEN`)
    pub status: Option<PullRequestStatus>,
    pub external_created_at: Option<DateTime<Utc>>,
    pub external_updated_at: Option<DateTime<Utc>>,
    pub external_closed_at: Option<DateTime<Utc>>,
    pub external_merged_at: Option<DateTime<Utc>>,
}

impl PullRequestSnapshot {
    fn into_active_model(self, merged_without_decision: bool) -> PullRequestActiveModel {
        let now = Utc::now().fixed_offset();
        PullRequestActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(self.project_id),
            external_pr_number: Set(self.external_pr_number),
            title: Set(self.title),
            author: Set(self.author),
            status: Set(self.status.unwrap_or_default()),
            merged_without_decision: Set(merged_without_decision),
            external_created_at: Set(self.external_created_at.map(|t| t.fixed_offset())),
            external_updated_at: Set(self.external_updated_at.map(|t| t.fixed_offset())),
            external_closed_at: Set(self.external_closed_at.map(|t| t.fixed_offset())),
            external_merged_at: Set(self.external_merged_at.map(|t| t.fixed_offset())),
            system_created_at: Set(now),
            system_updated_at: Set(now),
        }
    }
}

/// Result of a webhook upsert
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// Row inserted or updated; the stored row after the write
    Applied(PullRequestModel),
    /// Stored row carries a newer `external_updated_at`; nothing was written
    Stale,
}

/// Pull request joined with the status of its decision, if any
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestWithDecision {
    pub id: Uuid,
    pub project_id: Uuid,
    pub external_pr_number: i64,
    pub title: String,
    pub author: String,
    pub status: PullRequestStatus,
    pub merged_without_decision: bool,
    pub external_created_at: Option<DateTime<Utc>>,
    pub external_updated_at: Option<DateTime<Utc>>,
    pub external_closed_at: Option<DateTime<Utc>>,
    pub external_merged_at: Option<DateTime<Utc>>,
    /// Status of the attached decision; `PENDING` when none exists
    pub decision_status: DecisionStatus,
    pub decision_id: Option<Uuid>,
}

impl PullRequestWithDecision {
    fn from_pair(
        pull_request: PullRequestModel,
        decision: Option<crate::models::decision::Model>,
    ) -> Self {
        Self {
            id: pull_request.id,
            project_id: pull_request.project_id,
            external_pr_number: pull_request.external_pr_number,
            title: pull_request.title,
            author: pull_request.author,
            status: pull_request.status,
            merged_without_decision: pull_request.merged_without_decision,
            external_created_at: pull_request.external_created_at.map(|t| t.to_utc()),
            external_updated_at: pull_request.external_updated_at.map(|t| t.to_utc()),
            external_closed_at: pull_request.external_closed_at.map(|t| t.to_utc()),
            external_merged_at: pull_request.external_merged_at.map(|t| t.to_utc()),
            decision_status: decision
                .as_ref()
                .map(|d| d.status)
                .unwrap_or(DecisionStatus::Pending),
            decision_id: decision.map(|d| d.id),
        }
    }
}

/// Repository for PullRequest database operations
pub struct PullRequestRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> PullRequestRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PullRequestModel>, RepositoryError> {
        PullRequest::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_ids(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<PullRequestModel>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        PullRequest::find()
            .filter(pull_request::Column::Id.is_in(ids.iter().copied()))
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_number(
        &self,
        project_id: Uuid,
        external_pr_number: i64,
    ) -> Result<Option<PullRequestModel>, RepositoryError> {
        PullRequest::find()
            .filter(pull_request::Column::ProjectId.eq(project_id))
            .filter(pull_request::Column::ExternalPrNumber.eq(external_pr_number))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Ids of every pull request under `project_id`
    pub async fn ids_for_project(&self, project_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        PullRequest::find()
            .select_only()
            .column(pull_request::Column::Id)
            .filter(pull_request::Column::ProjectId.eq(project_id))
            .into_tuple()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Atomically insert or update a pull request from a webhook delivery.
    ///
    /// Title, author and external timestamps are always written; status only
    /// when `snapshot.status` is set. The update branch only fires when the
    /// stored `external_updated_at` is not newer than the incoming one, so a
    /// replay of the same delivery is applied again and yields the same row.
    pub async fn upsert_from_webhook(
        &self,
        snapshot: PullRequestSnapshot,
    ) -> Result<UpsertOutcome, RepositoryError> {
        let project_id = snapshot.project_id;
        let number = snapshot.external_pr_number;

        let mut update_columns = vec![
            pull_request::Column::Title,
            pull_request::Column::Author,
            pull_request::Column::ExternalCreatedAt,
            pull_request::Column::ExternalUpdatedAt,
            pull_request::Column::ExternalClosedAt,
            pull_request::Column::ExternalMergedAt,
            pull_request::Column::SystemUpdatedAt,
        ];
        if snapshot.status.is_some() {
            update_columns.push(pull_request::Column::Status);
        }

        let on_conflict = OnConflict::columns([
            pull_request::Column::ProjectId,
            pull_request::Column::ExternalPrNumber,
        ])
        .update_columns(update_columns)
        .action_and_where(not_older_than_stored().into())
        .to_owned();

        let rows_affected = PullRequest::insert(snapshot.into_active_model(false))
            .on_conflict(on_conflict)
            .exec_without_returning(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if rows_affected == 0 {
            return Ok(UpsertOutcome::Stale);
        }

        self.find_by_number(project_id, number)
            .await?
            .map(UpsertOutcome::Applied)
            .ok_or_else(|| RepositoryError::NotFound("Pull request not found".to_string()))
    }

    /// Insert pull requests that do not exist yet; existing rows are left alone.
    /// Returns the number of rows inserted.
    pub async fn insert_missing(
        &self,
        snapshots: Vec<PullRequestSnapshot>,
    ) -> Result<u64, RepositoryError> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let models = snapshots
            .into_iter()
            .map(|snapshot| snapshot.into_active_model(false));

        PullRequest::insert_many(models)
            .on_conflict(
                OnConflict::columns([
                    pull_request::Column::ProjectId,
                    pull_request::Column::ExternalPrNumber,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Set the merged-without-decision flag, only touching the row when the
    /// value actually changes. Returns whether a row was updated.
    pub async fn set_merged_without_decision(
        &self,
        id: Uuid,
        value: bool,
    ) -> Result<bool, RepositoryError> {
        let result = PullRequest::update_many()
            .col_expr(pull_request::Column::MergedWithoutDecision, Expr::value(value))
            .col_expr(
                pull_request::Column::SystemUpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(pull_request::Column::Id.eq(id))
            .filter(pull_request::Column::MergedWithoutDecision.eq(!value))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected > 0)
    }

    /// Pull requests of a project with their decision status, most recently
    /// updated on GitHub first.
    pub async fn list_with_decision_status(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<PullRequestWithDecision>, RepositoryError> {
        let rows = PullRequest::find()
            .filter(pull_request::Column::ProjectId.eq(project_id))
            .find_also_related(Decision)
            .order_by_desc(pull_request::Column::ExternalUpdatedAt)
            .order_by_desc(pull_request::Column::ExternalPrNumber)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        let mut projected: Vec<PullRequestWithDecision> = rows
            .into_iter()
            .map(|(pull_request, decision)| PullRequestWithDecision::from_pair(pull_request, decision))
            .collect();

        // NULLs sort differently across backends; keep rows without a GitHub
        // timestamp at the end everywhere.
        projected.sort_by(|a, b| {
            b.external_updated_at
                .cmp(&a.external_updated_at)
                .then(b.external_pr_number.cmp(&a.external_pr_number))
        });

        Ok(projected)
    }

    /// Delete every pull request under `project_id`
    pub async fn delete_by_project(&self, project_id: Uuid) -> Result<u64, RepositoryError> {
        let result = PullRequest::delete_many()
            .filter(pull_request::Column::ProjectId.eq(project_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}

/// `stored IS NULL OR incoming IS NULL OR stored <= incoming` on `external_updated_at`
fn not_older_than_stored() -> Condition {
    let stored = Expr::col((PullRequest, pull_request::Column::ExternalUpdatedAt));
    let incoming = Expr::col((Alias::new("excluded"), pull_request::Column::ExternalUpdatedAt));

    Condition::any()
        .add(stored.clone().is_null())
        .add(incoming.clone().is_null())
        .add(stored.lte(incoming))
}
