//! place-harvest command line
//!
//! Drains the scrape and image stages against a local task store and prints
//! run summaries as JSON on stdout. Logs go to stderr via `RUST_LOG`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use place_harvest::{Config, NewTask, Pipeline, Stage};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "place-harvest")]
#[command(about = "Two-stage place page and image harvester")]
#[command(version)]
struct Cli {
    /// JSON config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Task store path, overrides the config file
    #[arg(long, global = true, env = "PLACE_HARVEST_DATABASE")]
    database: Option<PathBuf>,

    /// Proxy list path, overrides the config file
    #[arg(long, global = true, env = "PLACE_HARVEST_PROXIES")]
    proxies: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain Stage A: fetch place pages for address and image URL
    Scrape,

    /// Drain Stage B: download images of scraped places
    Images,

    /// Drain Stage A, then Stage B
    All,

    /// Print store-wide counts
    Stats,

    /// Try every identity once against a page
    Probe { url: String },

    /// Add links from a file, one per line
    Ingest { path: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,place_harvest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli).await {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match Pipeline::new(config).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start pipeline");
            return ExitCode::FAILURE;
        }
    };

    let outcome = tokio::select! {
        result = execute(&pipeline, cli.command) => result,
        _ = place_harvest::shutdown_signal() => {
            tracing::warn!("Interrupted; attempts in flight are dropped");
            Ok(())
        }
    };

    pipeline.close().await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn load_config(cli: &Cli) -> place_harvest::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    if let Some(database) = &cli.database {
        config.persistence.database_path = database.clone();
    }
    if let Some(proxies) = &cli.proxies {
        config.identities.proxy_file = proxies.clone();
    }
    Ok(config)
}

async fn execute(pipeline: &Pipeline, command: Commands) -> place_harvest::Result<()> {
    match command {
        Commands::Scrape => print_json(&pipeline.run_stage(Stage::Scrape).await?),
        Commands::Images => print_json(&pipeline.run_stage(Stage::Images).await?),
        Commands::All => print_json(&pipeline.run_all().await?),
        Commands::Stats => print_json(&pipeline.store_stats().await?),
        Commands::Probe { url } => {
            let reports = pipeline.probe_identities(&url).await;
            let working = reports.iter().filter(|r| r.is_ok()).count();
            tracing::info!(working, total = reports.len(), "Probe finished");
            print_json(&reports)
        }
        Commands::Ingest { path } => {
            let tasks = read_links(&path).await?;
            let report = pipeline.database().insert_tasks(&tasks).await?;
            tracing::info!(
                inserted = report.inserted,
                skipped = report.skipped,
                "Links ingested"
            );
            print_json(&report)
        }
    }
}

async fn read_links(path: &Path) -> place_harvest::Result<Vec<NewTask>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(NewTask::new)
        .collect())
}

fn print_json<T: Serialize>(value: &T) -> place_harvest::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
