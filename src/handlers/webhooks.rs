//! # Webhook Handlers
//!
//! GitHub delivers pull request events here. The body is verified against
//! `X-Hub-Signature-256` before it is parsed, and parsing uses the exact bytes
//! that were verified.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::reconciler::{ProcessingOutcome, PullRequestReconciler};
use crate::server::AppState;
use crate::webhook_events::parse_webhook;
use crate::webhook_verification::verify_github_signature;

const EVENT_HEADER: &str = "x-github-event";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const DELIVERY_HEADER: &str = "x-github-delivery";

/// Webhook accept response
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAcceptResponse {
    /// `processed` when pull request state changed, `ignored` otherwise
    pub status: String,
    pub outcome: ProcessingOutcome,
}

/// GitHub webhook headers
#[derive(Debug, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Header)]
pub struct GitHubWebhookHeaders {
    /// Event name, e.g. `pull_request`
    #[serde(rename = "X-GitHub-Event")]
    #[param(rename = "X-GitHub-Event", value_type = String)]
    pub event: String,
    /// HMAC-SHA256 signature of the request body (hex string with sha256= prefix)
    #[serde(rename = "X-Hub-Signature-256")]
    #[param(rename = "X-Hub-Signature-256", value_type = String)]
    pub signature: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Receives GitHub webhook deliveries
#[utoipa::path(
    post,
    path = "/webhooks/github",
    params(GitHubWebhookHeaders),
    request_body(content = String, description = "Raw GitHub event payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery accepted or ignored", body = WebhookAcceptResponse),
        (status = 400, description = "Malformed payload", body = ApiError),
        (status = 401, description = "Invalid signature", body = ApiError),
        (status = 500, description = "Processing failed", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAcceptResponse>, ApiError> {
    let delivery = header_str(&headers, DELIVERY_HEADER).unwrap_or("-");
    let secret = state
        .config
        .webhook_github_secret
        .as_deref()
        .unwrap_or_default();

    if secret.is_empty() {
        warn!("GitHub webhook secret is not configured; rejecting delivery");
    }

    if !verify_github_signature(header_str(&headers, SIGNATURE_HEADER), &body, secret) {
        warn!(delivery, body_size = body.len(), "GitHub webhook signature invalid");
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_SIGNATURE",
            "Invalid webhook signature",
        ));
    }

    let event = parse_webhook(header_str(&headers, EVENT_HEADER), &body).map_err(|err| {
        warn!(delivery, error = %err, "Malformed GitHub webhook payload");
        ApiError::new(StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD", err.to_string())
    })?;

    let outcome = PullRequestReconciler::new(&state.db)
        .reconcile(event)
        .await
        .map_err(|err| {
            error!(delivery, error = %err, "GitHub webhook processing failed");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "WEBHOOK_PROCESSING_FAILED",
                "Failed to process webhook",
            )
        })?;

    info!(delivery, outcome = outcome.label(), "GitHub webhook handled");

    let status = match outcome {
        ProcessingOutcome::Processed { .. } => "processed",
        _ => "ignored",
    };

    Ok(Json(WebhookAcceptResponse {
        status: status.to_string(),
        outcome,
    }))
}
