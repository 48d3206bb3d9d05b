//! Fixtures shared by unit tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::github::{GitHubApi, GitHubClient};
use crate::models::{decision, project, pull_request, user};
use crate::server::AppState;
use migration::{Migrator, MigratorTrait};

/// `test` profile configuration with fixed secrets
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        crypto_key: Some(vec![0u8; 32]),
        jwt_secret: Some("test-jwt-secret-test-jwt-secret-00".to_string()),
        webhook_github_secret: Some("test-webhook-secret".to_string()),
        github_client_id: Some("test-client-id".to_string()),
        github_client_secret: Some("test-client-secret".to_string()),
        ..Default::default()
    }
}

/// Application state over `db` with [`test_config`]
pub fn test_app_state(db: DatabaseConnection) -> AppState {
    let config = test_config();
    let github = GitHubClient::from_config(&config).expect("test GitHub client");
    test_app_state_with_github(db, config, Arc::new(github))
}

pub fn test_app_state_with_github(
    db: DatabaseConnection,
    config: AppConfig,
    github: Arc<dyn GitHubApi>,
) -> AppState {
    AppState {
        crypto_key: CryptoKey::new(config.crypto_key.clone().unwrap_or_else(|| vec![0u8; 32]))
            .expect("32-byte test crypto key"),
        config: Arc::new(config),
        db,
        github,
    }
}

/// In-memory SQLite database with all migrations applied
pub async fn setup_test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(options)
        .await
        .expect("failed to open in-memory sqlite");
    Migrator::up(&db, None)
        .await
        .expect("failed to run migrations");
    db
}

pub fn ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid RFC 3339 timestamp")
        .to_utc()
}

pub async fn insert_user(db: &DatabaseConnection, username: &str) -> user::Model {
    let now = Utc::now().fixed_offset();
    user::ActiveModel {
        id: Set(Uuid::new_v4()),
        github_id: Set(format!("gh-{username}")),
        username: Set(username.to_string()),
        avatar_url: Set(None),
        access_token_ciphertext: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert user")
}

pub async fn insert_project(
    db: &DatabaseConnection,
    external_repo_id: &str,
    importer: &user::Model,
) -> project::Model {
    project::ActiveModel {
        id: Set(Uuid::new_v4()),
        external_repo_id: Set(external_repo_id.to_string()),
        name: Set(format!("repo-{external_repo_id}")),
        owner: Set(importer.username.clone()),
        visibility: Set(project::Visibility::Public),
        imported_by: Set(importer.id),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await
    .expect("insert project")
}

pub async fn insert_pull_request(
    db: &DatabaseConnection,
    project: &project::Model,
    number: i64,
    author: &str,
) -> pull_request::Model {
    let now = Utc::now().fixed_offset();
    pull_request::ActiveModel {
        id: Set(Uuid::new_v4()),
        project_id: Set(project.id),
        external_pr_number: Set(number),
        title: Set(format!("PR {number}")),
        author: Set(author.to_string()),
        status: Set(pull_request::PullRequestStatus::Open),
        merged_without_decision: Set(false),
        external_created_at: Set(Some(now)),
        external_updated_at: Set(Some(now)),
        external_closed_at: Set(None),
        external_merged_at: Set(None),
        system_created_at: Set(now),
        system_updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert pull request")
}

pub async fn insert_decision(
    db: &DatabaseConnection,
    pull_request_id: Uuid,
    author: &str,
) -> decision::Model {
    let now = Utc::now().fixed_offset();
    decision::ActiveModel {
        id: Set(Uuid::new_v4()),
        pull_request_id: Set(pull_request_id),
        what: Set("What".to_string()),
        why: Set("Why".to_string()),
        options_considered: Set(None),
        tradeoffs: Set(None),
        author: Set(author.to_string()),
        status: Set(decision::DecisionStatus::Documented),
        version: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert decision")
}
