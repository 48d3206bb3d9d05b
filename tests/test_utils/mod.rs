//! Test utilities for integration tests.
//!
//! In-memory SQLite with migrations applied, application state pointed at a
//! mock GitHub, and helpers for driving the router.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::Value;
use tower::ServiceExt;
use whystack::{
    config::AppConfig,
    crypto::CryptoKey,
    github::GitHubClient,
    server::{AppState, create_app},
    webhook_verification::compute_github_signature,
};

pub const WEBHOOK_SECRET: &str = "integration-webhook-secret";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // A single connection keeps every query on the same in-memory database.
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// `test` profile configuration whose GitHub endpoints point at `github_base`
pub fn test_config(github_base: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        crypto_key: Some(vec![7u8; 32]),
        jwt_secret: Some("integration-jwt-secret-0123456789abcdef".to_string()),
        webhook_github_secret: Some(WEBHOOK_SECRET.to_string()),
        github_client_id: Some("client-id".to_string()),
        github_client_secret: Some("client-secret".to_string()),
        github_oauth_base: github_base.to_string(),
        github_api_base: github_base.to_string(),
        client_url: "http://client.test".to_string(),
        ..Default::default()
    }
}

pub fn app_state(db: DatabaseConnection, config: AppConfig) -> Result<AppState> {
    let crypto_key = CryptoKey::new(config.crypto_key.clone().unwrap_or_default())?;
    let github = GitHubClient::from_config(&config)?;
    Ok(AppState {
        config: Arc::new(config),
        db,
        crypto_key,
        github: Arc::new(github),
    })
}

/// Router and state over a fresh database
pub async fn test_app(github_base: &str) -> Result<(Router, AppState)> {
    let db = setup_test_db().await?;
    let state = app_state(db, test_config(github_base))?;
    Ok((create_app(state.clone()), state))
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };
    app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Deliver a signed webhook
pub async fn deliver_webhook(app: &Router, event: &str, payload: &Value) -> Response<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    let signature = compute_github_signature(&body, WEBHOOK_SECRET).unwrap();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/github")
        .header("X-GitHub-Event", event)
        .header("X-GitHub-Delivery", uuid::Uuid::new_v4().to_string())
        .header("X-Hub-Signature-256", signature)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Sign in through the development shortcut and return the session token
pub async fn dev_login(app: &Router, username: &str) -> String {
    let response = send(
        app,
        Method::POST,
        "/auth/dev-login",
        None,
        Some(serde_json::json!({ "username": username })),
    )
    .await;
    assert_eq!(response.status(), 200);
    json_body(response).await["token"]
        .as_str()
        .unwrap()
        .to_string()
}

/// A `pull_request` webhook payload
pub fn pull_request_payload(
    action: &str,
    repo_id: u64,
    number: i64,
    author: &str,
    updated_at: &str,
    merged: bool,
) -> Value {
    serde_json::json!({
        "action": action,
        "number": number,
        "pull_request": {
            "number": number,
            "title": format!("Change #{number}"),
            "state": if action == "closed" { "closed" } else { "open" },
            "user": {"login": author},
            "created_at": "2024-05-01T09:00:00Z",
            "updated_at": updated_at,
            "closed_at": if action == "closed" { Value::from(updated_at) } else { Value::Null },
            "merged_at": if merged { Value::from(updated_at) } else { Value::Null },
            "merged": merged
        },
        "repository": {"id": repo_id, "name": "hello-world", "owner": {"login": "octo-org"}}
    })
}
