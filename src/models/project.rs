//! Project entity model
//!
//! A project is a GitHub repository imported by a user. One project exists per
//! `external_repo_id` system-wide, and the project owns its pull requests.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Repository visibility as reported at import time
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    #[sea_orm(string_value = "public")]
    Public,
    #[sea_orm(string_value = "private")]
    Private,
}

/// Canonical text form of a numeric GitHub repository id.
///
/// Returns `None` when `raw` is not a number, so "042" and " 42" both map to "42".
pub fn canonical_repo_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u64>().ok().map(|id| id.to_string())
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// GitHub repository id, stored as text
    pub external_repo_id: String,

    pub name: String,

    /// Repository owner login
    pub owner: String,

    pub visibility: Visibility,

    /// User that imported the project; only they may delete it
    pub imported_by: Uuid,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ImportedBy",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(has_many = "super::pull_request::Entity")]
    PullRequest,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::pull_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PullRequest.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_ids_are_canonicalized() {
        assert_eq!(canonical_repo_id("042").as_deref(), Some("42"));
        assert_eq!(canonical_repo_id(" 1296269 ").as_deref(), Some("1296269"));
        assert_eq!(canonical_repo_id("0").as_deref(), Some("0"));
        assert_eq!(canonical_repo_id(""), None);
        assert_eq!(canonical_repo_id("not-a-number"), None);
        assert_eq!(canonical_repo_id("-1"), None);
        assert_eq!(canonical_repo_id("+42"), None);
        assert_eq!(canonical_repo_id("99999999999999999999"), None);
    }
}
