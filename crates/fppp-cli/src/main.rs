use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fppp_store::{SheetsClient, TabularStore};
use fppp_sync::{build_scheduler, SyncConfig, SyncPipeline};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fppp-cli")]
#[command(about = "FPPP sheet sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync and exit.
    Sync,
    /// Run an initial sync, then sync daily at 08:00 in the configured
    /// time zone until interrupted.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env().context("loading configuration")?;
    let pipeline = Arc::new(build_pipeline(&config)?);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Sync => {
            let summary = pipeline.run_once().await?;
            println!(
                "sync complete: extracted={} matched={} updated={} appended={}",
                summary.extracted, summary.matched, summary.updated, summary.appended
            );
        }
        Commands::Run => {
            info!("running initial sync");
            if let Err(err) = pipeline.run_once().await {
                // logged, not fatal: the next scheduled run retries
                error!(error = ?err, "initial sync failed");
            }

            let mut scheduler = build_scheduler(pipeline.clone(), &config.timezone).await?;
            scheduler.start().await.context("starting scheduler")?;
            info!(
                timezone = %config.timezone,
                "scheduler started; next sync at 08:00 daily"
            );

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down");
            scheduler.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

fn build_pipeline(config: &SyncConfig) -> Result<SyncPipeline> {
    let source: Arc<dyn TabularStore> = Arc::new(
        SheetsClient::from_key_file(&config.credentials_path, &config.source_sheet_id)
            .context("creating source sheets client")?,
    );
    let destination: Arc<dyn TabularStore> = Arc::new(
        SheetsClient::from_key_file(&config.credentials_path, &config.dest_sheet_id)
            .context("creating destination sheets client")?,
    );
    Ok(SyncPipeline::new(
        source,
        destination,
        config.write_strategy,
    ))
}
