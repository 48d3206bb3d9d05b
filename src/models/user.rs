//! User entity model
//!
//! A user is a GitHub account that signed in to WhyStack. The GitHub access
//! token is kept only as AES-GCM ciphertext.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// GitHub account id (unique)
    pub github_id: String,

    /// GitHub login
    pub username: String,

    pub avatar_url: Option<String>,

    /// Encrypted GitHub access token (see `crypto::encrypt_user_token`)
    pub access_token_ciphertext: Option<Vec<u8>>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::project::Entity")]
    Project,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
