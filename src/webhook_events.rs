//! GitHub webhook payload parsing.
//!
//! Turns the verified raw body plus the `X-GitHub-Event` header into a typed
//! [`WebhookEvent`]. Only structural problems are errors here; deciding which
//! events and actions matter is the reconciler's job.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::github::GitHubAccount;
use crate::models::project::canonical_repo_id;

/// Author recorded when GitHub omits the PR user (deleted accounts).
pub const GHOST_AUTHOR: &str = "ghost";

/// Errors for payloads that cannot be processed at all (HTTP 400)
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Pull request actions WhyStack distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestAction {
    Opened,
    Closed,
    Reopened,
    Synchronize,
    /// Any other action (`edited`, `labeled`, ...) or a missing one
    Other(String),
}

impl PullRequestAction {
    fn parse(action: Option<&str>) -> Self {
        match action {
            Some("opened") => Self::Opened,
            Some("closed") => Self::Closed,
            Some("reopened") => Self::Reopened,
            Some("synchronize") => Self::Synchronize,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other(String::new()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Opened => "opened",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::Synchronize => "synchronize",
            Self::Other(action) => action,
        }
    }
}

/// Pull request fields carried by a `pull_request` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestPayload {
    pub number: i64,
    pub title: String,
    pub author: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merged: bool,
}

/// A parsed `pull_request` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub pull_request: PullRequestPayload,
    /// GitHub repository id, normalized to its decimal string form
    pub repository_external_id: String,
}

/// Any webhook delivery after parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PullRequest(PullRequestEvent),
    Other { event_type: String },
}

impl WebhookEvent {
    pub fn event_type(&self) -> &str {
        match self {
            WebhookEvent::PullRequest(_) => "pull_request",
            WebhookEvent::Other { event_type } => event_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    action: Option<String>,
    pull_request: Option<RawPullRequest>,
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: Option<i64>,
    title: Option<String>,
    user: Option<GitHubAccount>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    merged: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    id: Option<RepositoryId>,
}

/// GitHub sends numeric ids; some proxies re-encode them as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RepositoryId {
    Number(u64),
    Text(String),
}

impl RepositoryId {
    fn into_string(self) -> Option<String> {
        match self {
            RepositoryId::Number(id) => Some(id.to_string()),
            RepositoryId::Text(id) => {
                let trimmed = id.trim();
                (!trimmed.is_empty())
                    .then(|| canonical_repo_id(trimmed).unwrap_or_else(|| trimmed.to_string()))
            }
        }
    }
}

/// Parse a webhook delivery.
///
/// The body must be JSON for every event type. Only `pull_request` events are
/// inspected further and must carry `pull_request.number` and `repository.id`.
pub fn parse_webhook(event_type: Option<&str>, body: &[u8]) -> Result<WebhookEvent, EventParseError> {
    let raw: RawPayload = serde_json::from_slice(body)?;

    let event_type = event_type.unwrap_or_default();
    if event_type != "pull_request" {
        return Ok(WebhookEvent::Other {
            event_type: event_type.to_string(),
        });
    }

    let pull_request = raw
        .pull_request
        .ok_or(EventParseError::MissingField("pull_request"))?;
    let repository = raw
        .repository
        .ok_or(EventParseError::MissingField("repository"))?;

    let repository_external_id = repository
        .id
        .and_then(RepositoryId::into_string)
        .ok_or(EventParseError::MissingField("repository.id"))?;
    let number = pull_request
        .number
        .ok_or(EventParseError::MissingField("pull_request.number"))?;

    Ok(WebhookEvent::PullRequest(PullRequestEvent {
        action: PullRequestAction::parse(raw.action.as_deref()),
        pull_request: PullRequestPayload {
            number,
            title: pull_request.title.unwrap_or_default(),
            author: pull_request
                .user
                .map(|user| user.login)
                .unwrap_or_else(|| GHOST_AUTHOR.to_string()),
            created_at: pull_request.created_at,
            updated_at: pull_request.updated_at,
            closed_at: pull_request.closed_at,
            merged_at: pull_request.merged_at,
            merged: pull_request.merged.unwrap_or(false),
        },
        repository_external_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn parses_closed_merged_event() {
        let payload = body(json!({
            "action": "closed",
            "pull_request": {
                "number": 17,
                "title": "Switch to Postgres",
                "user": {"login": "alice"},
                "created_at": "2024-05-01T10:00:00Z",
                "updated_at": "2024-05-02T11:00:00Z",
                "closed_at": "2024-05-02T11:00:00Z",
                "merged_at": "2024-05-02T11:00:00Z",
                "merged": true
            },
            "repository": {"id": 42, "name": "hello-world"}
        }));

        let WebhookEvent::PullRequest(event) =
            parse_webhook(Some("pull_request"), &payload).unwrap()
        else {
            panic!("expected pull_request event");
        };

        assert_eq!(event.action, PullRequestAction::Closed);
        assert_eq!(event.repository_external_id, "42");
        assert_eq!(event.pull_request.number, 17);
        assert_eq!(event.pull_request.author, "alice");
        assert!(event.pull_request.merged);
        assert!(event.pull_request.merged_at.is_some());
    }

    #[test]
    fn string_repository_id_is_accepted() {
        let payload = body(json!({
            "action": "opened",
            "pull_request": {"number": 1, "title": "t", "user": {"login": "bob"}},
            "repository": {"id": " 042 "}
        }));

        let WebhookEvent::PullRequest(event) =
            parse_webhook(Some("pull_request"), &payload).unwrap()
        else {
            panic!("expected pull_request event");
        };
        assert_eq!(event.repository_external_id, "42");
        assert!(!event.pull_request.merged);
    }

    #[test]
    fn missing_user_falls_back_to_ghost() {
        let payload = body(json!({
            "action": "opened",
            "pull_request": {"number": 1, "title": "t", "user": null},
            "repository": {"id": 1}
        }));

        let WebhookEvent::PullRequest(event) =
            parse_webhook(Some("pull_request"), &payload).unwrap()
        else {
            panic!("expected pull_request event");
        };
        assert_eq!(event.pull_request.author, GHOST_AUTHOR);
    }

    #[test]
    fn other_event_types_are_passed_through() {
        let payload = body(json!({"zen": "Keep it logically awesome."}));
        let event = parse_webhook(Some("ping"), &payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Other {
                event_type: "ping".to_string()
            }
        );

        let event = parse_webhook(None, &payload).unwrap();
        assert_eq!(event.event_type(), "");
    }

    #[test]
    fn unknown_action_is_preserved() {
        let payload = body(json!({
            "action": "labeled",
            "pull_request": {"number": 1},
            "repository": {"id": 1}
        }));
        let WebhookEvent::PullRequest(event) =
            parse_webhook(Some("pull_request"), &payload).unwrap()
        else {
            panic!("expected pull_request event");
        };
        assert_eq!(event.action, PullRequestAction::Other("labeled".to_string()));
        assert_eq!(event.action.as_str(), "labeled");
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = parse_webhook(Some("pull_request"), b"{not json").unwrap_err();
        assert!(matches!(err, EventParseError::InvalidJson(_)));

        let err = parse_webhook(Some("push"), b"").unwrap_err();
        assert!(matches!(err, EventParseError::InvalidJson(_)));
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let no_pr = body(json!({"action": "opened", "repository": {"id": 1}}));
        assert!(matches!(
            parse_webhook(Some("pull_request"), &no_pr),
            Err(EventParseError::MissingField("pull_request"))
        ));

        let no_repo = body(json!({"action": "opened", "pull_request": {"number": 1}}));
        assert!(matches!(
            parse_webhook(Some("pull_request"), &no_repo),
            Err(EventParseError::MissingField("repository"))
        ));

        let no_repo_id = body(json!({
            "action": "opened",
            "pull_request": {"number": 1},
            "repository": {"name": "x"}
        }));
        assert!(matches!(
            parse_webhook(Some("pull_request"), &no_repo_id),
            Err(EventParseError::MissingField("repository.id"))
        ));

        let no_number = body(json!({
            "action": "opened",
            "pull_request": {"title": "x"},
            "repository": {"id": 1}
        }));
        assert!(matches!(
            parse_webhook(Some("pull_request"), &no_number),
            Err(EventParseError::MissingField("pull_request.number"))
        ));
    }
}
