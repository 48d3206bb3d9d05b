//! # Decision Repository
//!
//! Persistence and search for decision records.

use chrono::Utc;
use sea_orm::sea_query::{Expr, Func, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::decision::{
    self, ActiveModel as DecisionActiveModel, DecisionStatus, Entity as Decision,
    Model as DecisionModel,
};

/// Editable fields of a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionContent {
    pub what: String,
    pub why: String,
    pub options_considered: Option<String>,
    pub tradeoffs: Option<String>,
}

/// Filters for [`DecisionRepository::search`]
#[derive(Debug, Clone, Default)]
pub struct DecisionSearch {
    /// Whitespace separated terms; a decision matches if any term appears in
    /// any text field (case-insensitive)
    pub text: Option<String>,
    /// Exact author match
    pub author: Option<String>,
    /// Restrict to these pull requests; `Some(vec![])` matches nothing
    pub pull_request_ids: Option<Vec<Uuid>>,
    pub limit: u64,
}

/// Repository for Decision database operations
pub struct DecisionRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> DecisionRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_pull_request(
        &self,
        pull_request_id: Uuid,
    ) -> Result<Option<DecisionModel>, RepositoryError> {
        Decision::find()
            .filter(decision::Column::PullRequestId.eq(pull_request_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Insert the first decision of a pull request at version 1.
    ///
    /// A concurrent insert for the same pull request surfaces as
    /// [`RepositoryError::Conflict`].
    pub async fn create(
        &self,
        pull_request_id: Uuid,
        content: DecisionContent,
        author: &str,
    ) -> Result<DecisionModel, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let model = DecisionActiveModel {
            id: Set(Uuid::new_v4()),
            pull_request_id: Set(pull_request_id),
            what: Set(content.what),
            why: Set(content.why),
            options_considered: Set(content.options_considered),
            tradeoffs: Set(content.tradeoffs),
            author: Set(author.to_string()),
            status: Set(DecisionStatus::Documented),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Replace the content of an existing decision and bump its version in the
    /// same statement. The author is never changed. Returns `None` when the
    /// pull request has no decision.
    pub async fn update_content(
        &self,
        pull_request_id: Uuid,
        content: DecisionContent,
    ) -> Result<Option<DecisionModel>, RepositoryError> {
        let result = Decision::update_many()
            .col_expr(decision::Column::What, Expr::value(content.what))
            .col_expr(decision::Column::Why, Expr::value(content.why))
            .col_expr(
                decision::Column::OptionsConsidered,
                Expr::value(content.options_considered),
            )
            .col_expr(decision::Column::Tradeoffs, Expr::value(content.tradeoffs))
            .col_expr(
                decision::Column::Status,
                Expr::value(DecisionStatus::Documented),
            )
            .col_expr(
                decision::Column::Version,
                Expr::col(decision::Column::Version).add(1),
            )
            .col_expr(
                decision::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(decision::Column::PullRequestId.eq(pull_request_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Ok(None);
        }

        self.find_by_pull_request(pull_request_id).await
    }

    /// Search decisions, newest first.
    pub async fn search(
        &self,
        search: DecisionSearch,
    ) -> Result<Vec<DecisionModel>, RepositoryError> {
        let mut query = Decision::find();

        if let Some(ids) = search.pull_request_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            query = query.filter(decision::Column::PullRequestId.is_in(ids));
        }

        if let Some(author) = search.author.filter(|a| !a.is_empty()) {
            query = query.filter(decision::Column::Author.eq(author));
        }

        if let Some(text) = search.text.as_deref() {
            let terms: Vec<String> = text
                .split_whitespace()
                .map(|term| format!("%{}%", escape_like(&term.to_lowercase())))
                .collect();

            if !terms.is_empty() {
                let mut any = Condition::any();
                for pattern in &terms {
                    for column in [
                        decision::Column::What,
                        decision::Column::Why,
                        decision::Column::OptionsConsidered,
                        decision::Column::Tradeoffs,
                    ] {
                        any = any.add(
                            Expr::expr(Func::lower(Expr::col((Decision, column))))
                                .like(LikeExpr::new(pattern.as_str()).escape('\\')),
                        );
                    }
                }
                query = query.filter(any);
            }
        }

        query
            .order_by_desc(decision::Column::CreatedAt)
            .order_by_desc(decision::Column::Id)
            .limit(search.limit)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Delete decisions attached to any of `pull_request_ids`
    pub async fn delete_by_pull_requests(
        &self,
        pull_request_ids: &[Uuid],
    ) -> Result<u64, RepositoryError> {
        if pull_request_ids.is_empty() {
            return Ok(0);
        }
        let result = Decision::delete_many()
            .filter(decision::Column::PullRequestId.is_in(pull_request_ids.iter().copied()))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
