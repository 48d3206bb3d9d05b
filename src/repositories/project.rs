//! # Project Repository
//!
//! Persistence for imported repositories.

use std::collections::HashSet;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::project::{
    self, ActiveModel as ProjectActiveModel, Entity as Project, Model as ProjectModel, Visibility,
};

/// Data needed to import a repository as a project
#[derive(Debug, Clone)]
pub struct NewProject {
    pub external_repo_id: String,
    pub name: String,
    pub owner: String,
    pub visibility: Visibility,
    pub imported_by: Uuid,
}

/// Repository for Project database operations
pub struct ProjectRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> ProjectRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a project. Importing the same `external_repo_id` twice yields
    /// [`RepositoryError::Conflict`].
    pub async fn create(&self, new_project: NewProject) -> Result<ProjectModel, RepositoryError> {
        if new_project.external_repo_id.trim().is_empty() {
            return Err(RepositoryError::validation_error(
                "external repository id is required",
            ));
        }

        let project = ProjectActiveModel {
            id: Set(Uuid::new_v4()),
            external_repo_id: Set(new_project.external_repo_id),
            name: Set(new_project.name),
            owner: Set(new_project.owner),
            visibility: Set(new_project.visibility),
            imported_by: Set(new_project.imported_by),
            created_at: Set(Utc::now().fixed_offset()),
        };

        project
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ProjectModel>, RepositoryError> {
        Project::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_external_repo_id(
        &self,
        external_repo_id: &str,
    ) -> Result<Option<ProjectModel>, RepositoryError> {
        Project::find()
            .filter(project::Column::ExternalRepoId.eq(external_repo_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ProjectModel>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Project::find()
            .filter(project::Column::Id.is_in(ids.iter().copied()))
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Projects imported by `user_id`, newest first
    pub async fn list_by_importer(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ProjectModel>, RepositoryError> {
        Project::find()
            .filter(project::Column::ImportedBy.eq(user_id))
            .order_by_desc(project::Column::CreatedAt)
            .order_by_desc(project::Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Which of `external_repo_ids` are already imported by anyone
    pub async fn imported_external_ids(
        &self,
        external_repo_ids: &[String],
    ) -> Result<HashSet<String>, RepositoryError> {
        if external_repo_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let ids: Vec<String> = Project::find()
            .select_only()
            .column(project::Column::ExternalRepoId)
            .filter(project::Column::ExternalRepoId.is_in(external_repo_ids.iter().cloned()))
            .into_tuple()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(ids.into_iter().collect())
    }

    /// Delete the project row only; dependents must already be gone.
    pub async fn delete(&self, id: Uuid) -> Result<u64, RepositoryError> {
        let result = Project::delete_by_id(id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}
