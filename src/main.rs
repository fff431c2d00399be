//! match-pipeline binary entrypoint.
//! Loads config, installs tracing and drives one pipeline command.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

use match_pipeline::ingest::state::StateStore;
use match_pipeline::{MatchPipeline, PipelineConfig, RunSummary};

#[derive(Debug, Parser)]
#[command(name = "match-pipeline", version, about = "Daily OpenDota match collection")]
struct Cli {
    /// Path to the TOML config (defaults to $PIPELINE_CONFIG_PATH or config/pipeline.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daily collection pipeline once.
    Run {
        /// Maximum API calls to use in this run.
        #[arg(short = 'a', long)]
        api_limit: Option<u32>,

        /// Maximum new matches to discover.
        #[arg(short = 'b', long)]
        batch_size: Option<usize>,

        /// Show current state and what would run, without network calls.
        #[arg(short = 'd', long)]
        dry_run: bool,
    },
    /// Show tracked and archived match counts.
    Status,
    /// Create empty state files in the tracking directory (never overwrites).
    InitState,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut cfg = PipelineConfig::load(cli.config.as_deref())?;
    let _log_guard = match_pipeline::logging::init_tracing(&cfg.logging)?;

    match cli.command {
        Command::Run {
            api_limit,
            batch_size,
            dry_run,
        } => {
            if let Some(limit) = api_limit {
                cfg.pipeline.daily_api_limit = limit;
            }
            if let Some(n) = batch_size {
                cfg.pipeline.batch_size = n;
            }
            cfg.validate()?;
            run(&cfg, dry_run).await
        }
        Command::Status => {
            status(&cfg)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::InitState => {
            let store = StateStore::new(&cfg.data.tracking_dir);
            let created = store.init()?;
            println!(
                "{created} state file(s) created in {}",
                store.dir().display()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Non-zero exit code when the run summary reports a failure.
async fn run(cfg: &PipelineConfig, dry_run: bool) -> Result<ExitCode> {
    let mut pipeline = MatchPipeline::from_config(cfg)?;

    if dry_run {
        println!("DRY RUN - no changes will be made");
        let preview = pipeline.preview()?;
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(ExitCode::SUCCESS);
    }

    let summary = pipeline.run().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    print_usage_line(&summary);

    if !summary.success {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_usage_line(summary: &RunSummary) {
    let pct = summary.api_usage_pct();
    println!(
        "API usage: {}/{} ({pct:.1}%)",
        summary.api_calls_used, summary.api_limit
    );
    if pct > 90.0 {
        warn!("high API usage: {pct:.1}% of the run budget");
    }
}

fn status(cfg: &PipelineConfig) -> Result<()> {
    let pipeline = MatchPipeline::from_config(cfg)?;
    let preview = pipeline.preview()?;
    println!("{}", serde_json::to_string_pretty(&preview)?);
    Ok(())
}
