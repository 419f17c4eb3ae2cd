use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use configuration::{DeployEnv, Settings};
use database::connection::{connect, run_migrations};
use database::readiness::{ProbeError, ReadinessProber, RetryPolicy};
use database::repository::NoteRepository;
use tracing_subscriber::EnvFilter;

/// The main entry point for the notes API server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file, if present.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command-line arguments
    let cli = Cli::parse();

    let settings = configuration::load_settings(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;

    // Execute the appropriate command
    match cli.command {
        Commands::Serve(args) => handle_serve(args, settings).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A small CRUD API for notes, backed by PostgreSQL.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for the database to become ready, then serve HTTP traffic.
    Serve(ServeArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Overrides the bind address from the configuration file.
    #[arg(long)]
    addr: Option<SocketAddr>,
}

// ==============================================================================
// Serve Command Logic
// ==============================================================================

/// Blocks on the readiness prober, then hands the proven connection pool
/// to the web server. The prober is not consulted again after this point.
async fn handle_serve(args: ServeArgs, settings: Settings) -> anyhow::Result<()> {
    let deploy_env = DeployEnv::from_env();
    let target = settings.database.select(deploy_env);
    tracing::info!(env = %deploy_env, "selected database target");

    let readiness = &settings.readiness;
    let policy = RetryPolicy::new(
        readiness.max_attempts,
        Duration::from_secs(readiness.retry_delay_secs),
        Duration::from_secs(readiness.conflict_delay_secs),
    );
    let prober = ReadinessProber::new(policy);
    let pool = prober
        .run(|| async move {
            let pool = connect(&target.url, target.max_connections).await?;
            run_migrations(&pool).await?;
            Ok::<_, ProbeError>(pool)
        })
        .await
        .context("database never became ready")?;

    let repo = NoteRepository::new(pool);

    let addr = match args.addr {
        Some(addr) => addr,
        None => settings.server.socket_addr()?,
    };
    web_server::run_server(addr, repo).await
}
