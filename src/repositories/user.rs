//! # User Repository
//!
//! Persistence for signed-in GitHub users.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::user::{self, ActiveModel as UserActiveModel, Entity as User, Model as UserModel};

/// Profile data taken from GitHub at sign-in
#[derive(Debug, Clone)]
pub struct GitHubIdentity {
    pub github_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    /// Encrypted access token; `None` keeps whatever is stored
    pub access_token_ciphertext: Option<Vec<u8>>,
}

/// Repository for User database operations
pub struct UserRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UserModel>, RepositoryError> {
        User::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_github_id(
        &self,
        github_id: &str,
    ) -> Result<Option<UserModel>, RepositoryError> {
        User::find()
            .filter(user::Column::GithubId.eq(github_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserModel>, RepositoryError> {
        User::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Insert the user or refresh username, avatar and token of an existing one.
    pub async fn upsert_from_github(
        &self,
        identity: GitHubIdentity,
    ) -> Result<UserModel, RepositoryError> {
        if let Some(existing) = self.find_by_github_id(&identity.github_id).await? {
            return self.refresh(existing, identity).await;
        }

        let now = Utc::now().fixed_offset();
        let user = UserActiveModel {
            id: Set(Uuid::new_v4()),
            github_id: Set(identity.github_id.clone()),
            username: Set(identity.username.clone()),
            avatar_url: Set(identity.avatar_url.clone()),
            access_token_ciphertext: Set(identity.access_token_ciphertext.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match user.insert(self.db).await.map_err(RepositoryError::database_error) {
            Ok(created) => Ok(created),
            // Two concurrent sign-ins of a new user; the loser updates instead.
            Err(err) if err.is_conflict() => {
                let existing = self
                    .find_by_github_id(&identity.github_id)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound("User not found".to_string()))?;
                self.refresh(existing, identity).await
            }
            Err(err) => Err(err),
        }
    }

    async fn refresh(
        &self,
        existing: UserModel,
        identity: GitHubIdentity,
    ) -> Result<UserModel, RepositoryError> {
        let mut active = existing.into_active_model();
        active.username = Set(identity.username);
        active.avatar_url = Set(identity.avatar_url);
        if let Some(ciphertext) = identity.access_token_ciphertext {
            active.access_token_ciphertext = Set(Some(ciphertext));
        }
        active.updated_at = Set(Utc::now().fixed_offset());

        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_test_db;

    fn identity(github_id: &str, username: &str) -> GitHubIdentity {
        GitHubIdentity {
            github_id: github_id.to_string(),
            username: username.to_string(),
            avatar_url: None,
            access_token_ciphertext: Some(vec![1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_refreshes() {
        let db = setup_test_db().await;
        let repo = UserRepository::new(&db);

        let created = repo.upsert_from_github(identity("100", "alice")).await.unwrap();
        assert_eq!(created.username, "alice");

        let mut renamed = identity("100", "alice-renamed");
        renamed.access_token_ciphertext = None;
        let refreshed = repo.upsert_from_github(renamed).await.unwrap();

        assert_eq!(refreshed.id, created.id);
        assert_eq!(refreshed.username, "alice-renamed");
        assert_eq!(refreshed.access_token_ciphertext, Some(vec![1, 2, 3]));
        assert!(repo.find_by_username("alice-renamed").await.unwrap().is_some());
    }
}
