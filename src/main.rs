//! # WhyStack API Main Entry Point
//!
//! Runs the HTTP server by default. `migrate` applies pending migrations and
//! exits; `sync-project` re-runs the initial pull request sync of one project.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;
use whystack::{
    config::ConfigLoader, db, initial_sync, repositories::ProjectRepository, server,
    telemetry::init_tracing,
};

#[derive(Debug, Parser)]
#[command(name = "whystack", version, about = "Decision records for GitHub pull requests")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Fetch recent pull requests of an imported project from GitHub
    SyncProject {
        /// Project id
        project_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config).context("Failed to initialize tracing")?;

    if let Ok(redacted) = config.redacted_json() {
        tracing::info!(profile = %config.profile, config = %redacted, "Configuration loaded");
    }

    let db = db::init_pool(&config).await?;
    db::run_migrations(&db).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::run_server(config, db).await,
        Command::Migrate => Ok(()),
        Command::SyncProject { project_id } => {
            let limit = config.initial_sync_pr_limit;
            let state = server::AppState::from_config(config, db)?;
            let project = ProjectRepository::new(&state.db)
                .find_by_id(project_id)
                .await?
                .with_context(|| format!("Project {project_id} not found"))?;

            let summary = initial_sync::sync_project(
                &state.db,
                state.github.as_ref(),
                &state.crypto_key,
                &project,
                limit,
            )
            .await?;
            tracing::info!(
                %project_id,
                fetched = summary.fetched,
                inserted = summary.inserted,
                "Project sync finished"
            );
            Ok(())
        }
    }
}
