//! Pull request entity model
//!
//! Pull request rows are only written by the webhook reconciler and the import
//! sync. They are keyed by `(project_id, external_pr_number)`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a pull request
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestStatus {
    #[default]
    #[sea_orm(string_value = "OPEN")]
    Open,
    #[sea_orm(string_value = "MERGED")]
    Merged,
    #[sea_orm(string_value = "CLOSED")]
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "pull_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub project_id: Uuid,

    /// PR number on GitHub, unique within the project
    pub external_pr_number: i64,

    pub title: String,

    /// GitHub login of the PR author
    pub author: String,

    pub status: PullRequestStatus,

    /// Set when the PR merged while its decision was missing or still pending
    pub merged_without_decision: bool,

    pub external_created_at: Option<DateTimeWithTimeZone>,

    /// GitHub `updated_at`; used to reject out-of-order deliveries
    pub external_updated_at: Option<DateTimeWithTimeZone>,

    pub external_closed_at: Option<DateTimeWithTimeZone>,

    pub external_merged_at: Option<DateTimeWithTimeZone>,

    pub system_created_at: DateTimeWithTimeZone,

    pub system_updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
    #[sea_orm(has_one = "super::decision::Entity")]
    Decision,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::decision::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Decision.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
