use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use civic_storage::PgIssueStore;
use civic_sync::{BatchRunner, PipelineConfig};
use civic_web::{AppState, WebConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "civic-cli")]
#[command(about = "Civic issue radar command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run exactly one batch and print the run stats.
    Batch {
        /// Records to store before stopping (defaults to CIVIC_BATCH_SIZE).
        #[arg(long)]
        target: Option<usize>,
    },
    Migrate,
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("civic=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Batch { target } => {
            let store = civic_sync::open_store(&config).await?;
            let orchestrator = civic_sync::build_orchestrator(&config, store)?;
            let target = target.unwrap_or_else(|| orchestrator.default_target());
            let processed = orchestrator.run_batch(target).await;
            let stats = orchestrator.run_stats().snapshot();
            println!(
                "batch complete: processed={} scraped={} classified={} stored={} duplicates={} errors={}",
                processed,
                stats.total_scraped,
                stats.total_processed,
                stats.total_stored,
                stats.total_duplicates,
                stats.total_errors
            );
        }
        Commands::Migrate => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let store = PgIssueStore::connect(url).await?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => serve(config).await?,
    }

    Ok(())
}

async fn serve(config: PipelineConfig) -> Result<()> {
    let store = civic_sync::open_store(&config).await?;
    let runner: Arc<dyn BatchRunner> =
        Arc::new(civic_sync::build_orchestrator(&config, store.clone())?);

    civic_sync::spawn_initial_batch(runner.clone());

    let scheduler = if config.scheduler_enabled {
        let sched = civic_sync::build_scheduler(runner.clone(), config.batch_interval).await?;
        sched.start().await.context("starting scheduler")?;
        info!(interval_secs = config.batch_interval.as_secs(), "periodic batches scheduled");
        Some(sched)
    } else {
        warn!("scheduler disabled, batches only run on demand");
        None
    };

    let state = AppState::new(store, runner, config.target_city.clone());
    civic_web::serve(state, WebConfig::from_env(), shutdown_signal()).await?;

    if let Some(mut sched) = scheduler {
        sched.shutdown().await.context("stopping scheduler")?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
