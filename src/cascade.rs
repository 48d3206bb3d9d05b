//! Project cascade deletion
//!
//! Removes a project and everything it owns in dependency order: decisions,
//! then pull requests, then the project row. A failing step stops the cascade
//! and is reported; steps already completed are not rolled back.

use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{self, ApiError, RepositoryError};
use crate::repositories::{DecisionRepository, ProjectRepository, PullRequestRepository};

/// Steps of a project cascade, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStep {
    LoadPullRequests,
    DeleteDecisions,
    DeletePullRequests,
    DeleteProject,
}

impl CascadeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeStep::LoadPullRequests => "load_pull_requests",
            CascadeStep::DeleteDecisions => "delete_decisions",
            CascadeStep::DeletePullRequests => "delete_pull_requests",
            CascadeStep::DeleteProject => "delete_project",
        }
    }
}

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("project not found")]
    NotFound,
    #[error("only the importing user may delete this project")]
    Forbidden,
    #[error("failed to load project: {0}")]
    Lookup(#[source] RepositoryError),
    #[error("cascade step {} failed: {source}", step.as_str())]
    Step {
        step: CascadeStep,
        #[source]
        source: RepositoryError,
    },
}

impl From<CascadeError> for ApiError {
    fn from(err: CascadeError) -> Self {
        match err {
            CascadeError::NotFound => error::not_found("Project not found"),
            CascadeError::Forbidden => {
                error::forbidden(Some("Only the user who imported the project can delete it"))
            }
            CascadeError::Lookup(_) | CascadeError::Step { .. } => {
                ApiError::from(anyhow::Error::new(err))
            }
        }
    }
}

/// Row counts removed by a completed cascade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub decisions_deleted: u64,
    pub pull_requests_deleted: u64,
}

/// Delete `project_id` on behalf of `actor_id`.
#[instrument(skip(db))]
pub async fn delete_project(
    db: &DatabaseConnection,
    project_id: Uuid,
    actor_id: Uuid,
) -> Result<CascadeReport, CascadeError> {
    let projects = ProjectRepository::new(db);
    let project = projects
        .find_by_id(project_id)
        .await
        .map_err(CascadeError::Lookup)?
        .ok_or(CascadeError::NotFound)?;

    if project.imported_by != actor_id {
        return Err(CascadeError::Forbidden);
    }

    let pull_requests = PullRequestRepository::new(db);
    let mut report = CascadeReport::default();

    let pr_ids = run_step(
        project_id,
        CascadeStep::LoadPullRequests,
        &report,
        pull_requests.ids_for_project(project_id),
    )
    .await?;

    report.decisions_deleted = run_step(
        project_id,
        CascadeStep::DeleteDecisions,
        &report,
        DecisionRepository::new(db).delete_by_pull_requests(&pr_ids),
    )
    .await?;

    report.pull_requests_deleted = run_step(
        project_id,
        CascadeStep::DeletePullRequests,
        &report,
        pull_requests.delete_by_project(project_id),
    )
    .await?;

    run_step(
        project_id,
        CascadeStep::DeleteProject,
        &report,
        projects.delete(project_id),
    )
    .await?;

    counter!("project_cascade_deletes_total", "result" => "completed").increment(1);
    info!(
        %project_id,
        decisions_deleted = report.decisions_deleted,
        pull_requests_deleted = report.pull_requests_deleted,
        "Project deleted"
    );

    Ok(report)
}

async fn run_step<T>(
    project_id: Uuid,
    step: CascadeStep,
    progress: &CascadeReport,
    fut: impl Future<Output = Result<T, RepositoryError>>,
) -> Result<T, CascadeError> {
    fut.await.map_err(|source| {
        counter!("project_cascade_deletes_total", "result" => "failed").increment(1);
        error!(
            %project_id,
            step = step.as_str(),
            decisions_deleted = progress.decisions_deleted,
            pull_requests_deleted = progress.pull_requests_deleted,
            error = %source,
            "Project cascade aborted; earlier steps are not rolled back"
        );
        CascadeError::Step { step, source }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        insert_decision, insert_project, insert_pull_request, insert_user, setup_test_db,
    };

    #[tokio::test]
    async fn deletes_decisions_pull_requests_then_project() {
        let db = setup_test_db().await;
        let owner = insert_user(&db, "alice").await;
        let project = insert_project(&db, "42", &owner).await;
        let other = insert_project(&db, "43", &owner).await;

        let mut pr_ids = Vec::new();
        for number in 1..=3 {
            let pr = insert_pull_request(&db, &project, number, "alice").await;
            pr_ids.push(pr.id);
        }
        insert_decision(&db, pr_ids[0], "alice").await;
        insert_decision(&db, pr_ids[1], "alice").await;
        let survivor = insert_pull_request(&db, &other, 1, "alice").await;
        insert_decision(&db, survivor.id, "alice").await;

        let report = delete_project(&db, project.id, owner.id).await.unwrap();
        assert_eq!(
            report,
            CascadeReport {
                decisions_deleted: 2,
                pull_requests_deleted: 3,
            }
        );

        assert!(
            ProjectRepository::new(&db)
                .find_by_id(project.id)
                .await
                .unwrap()
                .is_none()
        );
        let prs = PullRequestRepository::new(&db);
        for id in pr_ids {
            assert!(prs.find_by_id(id).await.unwrap().is_none());
        }
        assert!(
            DecisionRepository::new(&db)
                .find_by_pull_request(survivor.id)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let db = setup_test_db().await;
        let user = insert_user(&db, "alice").await;
        let err = delete_project(&db, Uuid::new_v4(), user.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::NotFound));
    }

    #[tokio::test]
    async fn non_importer_is_forbidden_and_nothing_is_deleted() {
        let db = setup_test_db().await;
        let owner = insert_user(&db, "alice").await;
        let stranger = insert_user(&db, "mallory").await;
        let project = insert_project(&db, "42", &owner).await;
        let pr = insert_pull_request(&db, &project, 1, "alice").await;

        let err = delete_project(&db, project.id, stranger.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::Forbidden));
        assert!(
            PullRequestRepository::new(&db)
                .find_by_id(pr.id)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn empty_project_deletes_cleanly() {
        let db = setup_test_db().await;
        let owner = insert_user(&db, "alice").await;
        let project = insert_project(&db, "42", &owner).await;

        let report = delete_project(&db, project.id, owner.id).await.unwrap();
        assert_eq!(report, CascadeReport::default());
    }
}
