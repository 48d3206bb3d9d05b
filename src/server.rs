//! # Server Configuration
//!
//! Router assembly, shared application state and the HTTP server loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::github::{GitHubApi, GitHubClient};
use crate::handlers;
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub crypto_key: CryptoKey,
    pub github: Arc<dyn GitHubApi>,
}

impl AppState {
    /// Build state from validated configuration
    pub fn from_config(config: AppConfig, db: DatabaseConnection) -> Result<Self> {
        let crypto_key = CryptoKey::new(
            config
                .crypto_key
                .clone()
                .context("WHYSTACK_CRYPTO_KEY is required")?,
        )?;
        let github = GitHubClient::from_config(&config).context("Failed to build GitHub client")?;

        Ok(Self {
            config: Arc::new(config),
            db,
            crypto_key,
            github: Arc::new(github),
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/projects", get(handlers::projects::list_projects))
        .route(
            "/projects/github",
            get(handlers::projects::list_github_repositories),
        )
        .route("/projects/import", post(handlers::projects::import_project))
        .route("/projects/{id}", delete(handlers::projects::delete_project))
        .route(
            "/projects/{id}/prs",
            get(handlers::projects::list_pull_requests),
        )
        .route("/projects/{id}/sync", post(handlers::projects::sync_project))
        .route("/decisions", get(handlers::decisions::search_decisions))
        .route(
            "/decisions/{pr_id}",
            get(handlers::decisions::get_decision).post(handlers::decisions::save_decision),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/webhooks/github", post(handlers::webhooks::github_webhook))
        .route("/auth/github", get(handlers::auth::github_login))
        .route(
            "/auth/github/callback",
            get(handlers::auth::github_callback),
        )
        .route("/auth/dev-login", post(handlers::auth::dev_login))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match HeaderValue::from_str(config.client_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(AllowOrigin::exact(origin)),
        Err(_) => {
            tracing::warn!(client_url = %config.client_url, "CLIENT_URL is not a valid origin; CORS disabled");
            layer
        }
    }
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> Result<()> {
    let addr = config.bind_addr().context("Invalid server address")?;
    let profile = config.profile.clone();
    let app = create_app(AppState::from_config(config, db)?);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::webhooks::github_webhook,
        crate::handlers::auth::github_login,
        crate::handlers::auth::github_callback,
        crate::handlers::auth::dev_login,
        crate::handlers::auth::me,
        crate::handlers::projects::list_projects,
        crate::handlers::projects::list_github_repositories,
        crate::handlers::projects::import_project,
        crate::handlers::projects::list_pull_requests,
        crate::handlers::projects::delete_project,
        crate::handlers::projects::sync_project,
        crate::handlers::decisions::get_decision,
        crate::handlers::decisions::save_decision,
        crate::handlers::decisions::search_decisions,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::webhooks::WebhookAcceptResponse,
            crate::reconciler::ProcessingOutcome,
            crate::handlers::auth::UserResponse,
            crate::handlers::auth::DevLoginRequest,
            crate::handlers::auth::LoginResponse,
            crate::handlers::projects::ProjectResponse,
            crate::handlers::projects::GitHubRepositoryResponse,
            crate::handlers::projects::ImportProjectRequest,
            crate::handlers::projects::ImportProjectResponse,
            crate::handlers::projects::ImportSyncStatus,
            crate::repositories::PullRequestWithDecision,
            crate::cascade::CascadeReport,
            crate::initial_sync::SyncSummary,
            crate::handlers::decisions::SaveDecisionRequest,
            crate::decisions::DecisionView,
            crate::decisions::DecisionSearchHit,
            crate::decisions::PullRequestSummary,
            crate::decisions::ProjectSummary,
            crate::models::PullRequestStatus,
            crate::models::DecisionStatus,
            crate::models::Visibility,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "WhyStack API",
        description = "Decision records for GitHub pull requests",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
