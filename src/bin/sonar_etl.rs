//! sonar-etl: one-shot batch pipeline from sonar JSON exports to PostgreSQL.
//!
//! Usage:
//!   # Read ./collections, write to the database in DATABASE_URL
//!   sonar-etl
//!
//!   # Different input directory, transform only
//!   sonar-etl --collections-dir /data/export --dry-run
//!
//!   # Also persist the intermediate tables
//!   sonar-etl --all-tables

// MiMalloc pairs well with simd-json's allocation pattern.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use sonar_etl::Config;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sonar-etl")]
#[command(about = "Flatten sonar JSON collections, join and aggregate, load into PostgreSQL", long_about = None)]
struct Args {
    /// Directory holding the four collection files
    /// (clients/suppliers/sonar_runs/sonar_results .json)
    #[arg(long, value_name = "DIR")]
    collections_dir: Option<PathBuf>,

    /// Extract and transform only; skip the database load
    #[arg(long)]
    dry_run: bool,

    /// Also persist results_per_part_shop and merged_results_runs
    #[arg(long)]
    all_tables: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(dir) = args.collections_dir {
        config.collections_dir = dir;
    }
    config.dry_run = args.dry_run;
    config.all_tables = args.all_tables;
    config.validate().context("invalid configuration")?;

    info!(collections_dir = %config.collections_dir.display(), "starting pipeline");

    match sonar_etl::run(&config).await {
        Ok(report) => {
            for (table, rows) in &report.tables_written {
                info!(table = %table, rows, "written");
            }
            info!("pipeline complete");
            Ok(())
        }
        Err(e) => {
            error!("pipeline failed: {e}");
            std::process::exit(1);
        }
    }
}
