//! Pull request reconciler
//!
//! Folds verified GitHub webhook deliveries into durable pull request state.
//! Each delivery results in at most one upsert plus, for merges, one write to
//! the merged-without-decision flag.

use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::decision::DecisionStatus;
use crate::models::pull_request::PullRequestStatus;
use crate::repositories::{
    DecisionRepository, ProjectRepository, PullRequestRepository, PullRequestSnapshot,
    UpsertOutcome,
};
use crate::webhook_events::{PullRequestAction, PullRequestEvent, WebhookEvent};

/// Result of reconciling one webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    /// Pull request row written
    #[serde(rename_all = "camelCase")]
    Processed {
        pull_request_id: Uuid,
        status: PullRequestStatus,
        merged_without_decision: bool,
    },
    /// Not a `pull_request` event
    #[serde(rename_all = "camelCase")]
    IgnoredEvent { event_type: String },
    /// A `pull_request` action that does not affect tracked state
    IgnoredAction { action: String },
    /// Repository has not been imported
    #[serde(rename_all = "camelCase")]
    UntrackedRepository { repository_id: String },
    /// Delivery is older than the stored state
    StaleEvent { number: i64 },
}

impl ProcessingOutcome {
    /// Short label used for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Processed { .. } => "processed",
            ProcessingOutcome::IgnoredEvent { .. } => "ignored_event",
            ProcessingOutcome::IgnoredAction { .. } => "ignored_action",
            ProcessingOutcome::UntrackedRepository { .. } => "untracked_repository",
            ProcessingOutcome::StaleEvent { .. } => "stale_event",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to reconcile pull request: {0}")]
    Repository(#[from] RepositoryError),
}

/// Status a pull request moves to for `action`; `None` leaves it unchanged.
pub fn target_status(action: &PullRequestAction, merged: bool) -> Option<PullRequestStatus> {
    match action {
        PullRequestAction::Opened | PullRequestAction::Reopened => Some(PullRequestStatus::Open),
        PullRequestAction::Closed if merged => Some(PullRequestStatus::Merged),
        PullRequestAction::Closed => Some(PullRequestStatus::Closed),
        PullRequestAction::Synchronize | PullRequestAction::Other(_) => None,
    }
}

/// Value of the merged-without-decision flag for a merged pull request whose
/// decision has `decision_status` (`None` when there is no decision).
pub fn merged_flag_for(decision_status: Option<DecisionStatus>) -> bool {
    !matches!(decision_status, Some(DecisionStatus::Documented))
}

fn is_tracked_action(action: &PullRequestAction) -> bool {
    !matches!(action, PullRequestAction::Other(_))
}

/// Applies webhook events to the pull request store
pub struct PullRequestReconciler<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> PullRequestReconciler<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Reconcile one parsed delivery. Ignored deliveries are outcomes, not errors.
    #[instrument(skip_all, fields(event_type = %event.event_type()))]
    pub async fn reconcile(
        &self,
        event: WebhookEvent,
    ) -> Result<ProcessingOutcome, ReconcileError> {
        let outcome = match event {
            WebhookEvent::Other { event_type } => ProcessingOutcome::IgnoredEvent { event_type },
            WebhookEvent::PullRequest(event) => self.reconcile_pull_request(event).await?,
        };

        counter!("webhook_events_total", "outcome" => outcome.label()).increment(1);
        debug!(outcome = outcome.label(), "Webhook delivery reconciled");
        Ok(outcome)
    }

    async fn reconcile_pull_request(
        &self,
        event: PullRequestEvent,
    ) -> Result<ProcessingOutcome, ReconcileError> {
        if !is_tracked_action(&event.action) {
            return Ok(ProcessingOutcome::IgnoredAction {
                action: event.action.as_str().to_string(),
            });
        }

        let Some(project) = ProjectRepository::new(self.db)
            .find_by_external_repo_id(&event.repository_external_id)
            .await?
        else {
            debug!(
                repository_id = %event.repository_external_id,
                "Webhook for repository that is not imported"
            );
            return Ok(ProcessingOutcome::UntrackedRepository {
                repository_id: event.repository_external_id,
            });
        };

        let payload = event.pull_request;
        let number = payload.number;
        let status = target_status(&event.action, payload.merged);

        let snapshot = PullRequestSnapshot {
            project_id: project.id,
            external_pr_number: payload.number,
            title: payload.title,
            author: payload.author,
            status,
            external_created_at: payload.created_at,
            external_updated_at: payload.updated_at,
            external_closed_at: payload.closed_at,
            external_merged_at: payload.merged_at,
        };

        let pull_requests = PullRequestRepository::new(self.db);
        let mut pull_request = match pull_requests.upsert_from_webhook(snapshot).await? {
            UpsertOutcome::Applied(row) => row,
            UpsertOutcome::Stale => {
                info!(
                    project_id = %project.id,
                    number,
                    "Ignoring out-of-order pull request delivery"
                );
                return Ok(ProcessingOutcome::StaleEvent { number });
            }
        };

        if status == Some(PullRequestStatus::Merged) {
            let decision_status = DecisionRepository::new(self.db)
                .find_by_pull_request(pull_request.id)
                .await?
                .map(|decision| decision.status);
            let flag = merged_flag_for(decision_status);

            if pull_request.merged_without_decision != flag
                && pull_requests
                    .set_merged_without_decision(pull_request.id, flag)
                    .await?
            {
                pull_request.merged_without_decision = flag;
            }
        }

        info!(
            project_id = %project.id,
            pull_request_id = %pull_request.id,
            number,
            action = event.action.as_str(),
            status = ?pull_request.status,
            merged_without_decision = pull_request.merged_without_decision,
            "Pull request reconciled"
        );

        Ok(ProcessingOutcome::Processed {
            pull_request_id: pull_request.id,
            status: pull_request.status,
            merged_without_decision: pull_request.merged_without_decision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_decision, insert_project, insert_user, setup_test_db};
    use crate::webhook_events::parse_webhook;
    use serde_json::json;

    fn event(action: &str, repo_id: u64, number: i64, merged: bool, updated_at: &str) -> WebhookEvent {
        let body = json!({
            "action": action,
            "pull_request": {
                "number": number,
                "title": "Switch to Postgres",
                "user": {"login": "alice"},
                "created_at": "2024-05-01T10:00:00Z",
                "updated_at": updated_at,
                "closed_at": if action == "closed" { json!(updated_at) } else { json!(null) },
                "merged_at": if merged { json!(updated_at) } else { json!(null) },
                "merged": merged
            },
            "repository": {"id": repo_id}
        });
        parse_webhook(Some("pull_request"), &serde_json::to_vec(&body).unwrap()).unwrap()
    }

    #[test]
    fn computes_target_status() {
        assert_eq!(
            target_status(&PullRequestAction::Opened, false),
            Some(PullRequestStatus::Open)
        );
        assert_eq!(
            target_status(&PullRequestAction::Reopened, false),
            Some(PullRequestStatus::Open)
        );
        assert_eq!(
            target_status(&PullRequestAction::Closed, true),
            Some(PullRequestStatus::Merged)
        );
        assert_eq!(
            target_status(&PullRequestAction::Closed, false),
            Some(PullRequestStatus::Closed)
        );
        assert_eq!(target_status(&PullRequestAction::Synchronize, false), None);
    }

    #[test]
    fn merged_flag_depends_on_decision_status() {
        assert!(merged_flag_for(None));
        assert!(merged_flag_for(Some(DecisionStatus::Pending)));
        assert!(!merged_flag_for(Some(DecisionStatus::Documented)));
    }

    #[tokio::test]
    async fn non_pull_request_events_are_ignored() {
        let db = setup_test_db().await;
        let outcome = PullRequestReconciler::new(&db)
            .reconcile(WebhookEvent::Other {
                event_type: "push".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ProcessingOutcome::IgnoredEvent {
                event_type: "push".to_string()
            }
        );
    }

    #[tokio::test]
    async fn untracked_repository_is_not_created() {
        let db = setup_test_db().await;
        let outcome = PullRequestReconciler::new(&db)
            .reconcile(event("opened", 999, 1, false, "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ProcessingOutcome::UntrackedRepository {
                repository_id: "999".to_string()
            }
        );
        assert!(
            ProjectRepository::new(&db)
                .find_by_external_repo_id("999")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unknown_action_is_ignored() {
        let db = setup_test_db().await;
        let user = insert_user(&db, "alice").await;
        insert_project(&db, "42", &user).await;

        let outcome = PullRequestReconciler::new(&db)
            .reconcile(event("labeled", 42, 1, false, "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(outcome.label(), "ignored_action");
    }

    #[tokio::test]
    async fn opened_then_merged_sets_flag() {
        let db = setup_test_db().await;
        let user = insert_user(&db, "alice").await;
        insert_project(&db, "42", &user).await;
        let reconciler = PullRequestReconciler::new(&db);

        let opened = reconciler
            .reconcile(event("opened", 42, 7, false, "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        let ProcessingOutcome::Processed { status, merged_without_decision, .. } = opened else {
            panic!("expected processed, got {opened:?}");
        };
        assert_eq!(status, PullRequestStatus::Open);
        assert!(!merged_without_decision);

        let merged = reconciler
            .reconcile(event("closed", 42, 7, true, "2024-05-02T10:00:00Z"))
            .await
            .unwrap();
        let ProcessingOutcome::Processed { status, merged_without_decision, .. } = merged else {
            panic!("expected processed, got {merged:?}");
        };
        assert_eq!(status, PullRequestStatus::Merged);
        assert!(merged_without_decision);
    }

    #[tokio::test]
    async fn replaying_merge_is_idempotent() {
        let db = setup_test_db().await;
        let user = insert_user(&db, "alice").await;
        let project = insert_project(&db, "42", &user).await;
        let reconciler = PullRequestReconciler::new(&db);

        let first = reconciler
            .reconcile(event("closed", 42, 3, true, "2024-05-02T10:00:00Z"))
            .await
            .unwrap();
        let second = reconciler
            .reconcile(event("closed", 42, 3, true, "2024-05-02T10:00:00Z"))
            .await
            .unwrap();

        assert_eq!(first, second);
        let ids = PullRequestRepository::new(&db)
            .ids_for_project(project.id)
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn merge_with_documented_decision_keeps_flag_clear() {
        let db = setup_test_db().await;
        let user = insert_user(&db, "alice").await;
        insert_project(&db, "42", &user).await;
        let reconciler = PullRequestReconciler::new(&db);

        let ProcessingOutcome::Processed { pull_request_id, .. } = reconciler
            .reconcile(event("opened", 42, 9, false, "2024-05-01T10:00:00Z"))
            .await
            .unwrap()
        else {
            panic!("expected processed");
        };
        insert_decision(&db, pull_request_id, "alice").await;

        let outcome = reconciler
            .reconcile(event("closed", 42, 9, true, "2024-05-02T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ProcessingOutcome::Processed {
                pull_request_id,
                status: PullRequestStatus::Merged,
                merged_without_decision: false,
            }
        );
    }

    #[tokio::test]
    async fn synchronize_keeps_status() {
        let db = setup_test_db().await;
        let user = insert_user(&db, "alice").await;
        insert_project(&db, "42", &user).await;
        let reconciler = PullRequestReconciler::new(&db);

        reconciler
            .reconcile(event("closed", 42, 4, false, "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile(event("synchronize", 42, 4, false, "2024-05-01T11:00:00Z"))
            .await
            .unwrap();

        let ProcessingOutcome::Processed { status, .. } = outcome else {
            panic!("expected processed");
        };
        assert_eq!(status, PullRequestStatus::Closed);
    }

    #[tokio::test]
    async fn out_of_order_delivery_is_stale() {
        let db = setup_test_db().await;
        let user = insert_user(&db, "alice").await;
        insert_project(&db, "42", &user).await;
        let reconciler = PullRequestReconciler::new(&db);

        reconciler
            .reconcile(event("closed", 42, 5, true, "2024-05-02T10:00:00Z"))
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile(event("opened", 42, 5, false, "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessingOutcome::StaleEvent { number: 5 });
    }
}
