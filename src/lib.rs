//! # sonar-etl
//!
//! A one-shot batch ETL pipeline for a spare-parts price-monitoring export:
//! four JSON collections (clients, suppliers, sonar runs, sonar results) are
//! flattened into tabular frames, joined and aggregated, and the derived
//! tables are written to PostgreSQL.
//!
//! ## Stages
//!
//! - **extract**: read the collection files into raw document sequences
//! - **frame** + **transform**: flatten, align keys, join, aggregate
//! - **load**: replace the output tables through a transactional staging swap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sonar_etl::{Config, run};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let report = run(&config).await?;
//! println!("{} price trend buckets", report.rows_written("price_trends").unwrap_or(0));
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info};

pub mod config;
pub mod error;
pub mod extract;
pub mod frame;
pub mod load;
pub mod transform;

pub use config::Config;
pub use error::{EtlError, Result};
pub use extract::RawCollections;
pub use frame::{Cell, Frame, Row};
pub use load::Loader;
pub use transform::TransformOutput;

/// What a pipeline run read and wrote.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub clients_read: usize,
    pub suppliers_read: usize,
    pub sonar_runs_read: usize,
    pub sonar_results_read: usize,
    pub tables_written: Vec<(String, u64)>,
}

impl PipelineReport {
    pub fn rows_written(&self, table: &str) -> Option<u64> {
        self.tables_written
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, rows)| *rows)
    }
}

/// Run the whole pipeline: extract, transform, and (unless dry-run) load.
///
/// Strictly sequential; a failure before the Loader writes nothing, and each
/// table replacement is all-or-nothing. The database pool is closed on every
/// exit path.
pub async fn run(config: &Config) -> Result<PipelineReport> {
    let collections = extract::read_collections(&config.collections_dir)?;
    let mut report = PipelineReport {
        clients_read: collections.clients.len(),
        suppliers_read: collections.suppliers.len(),
        sonar_runs_read: collections.sonar_runs.len(),
        sonar_results_read: collections.sonar_results.len(),
        ..Default::default()
    };
    info!(
        clients = report.clients_read,
        suppliers = report.suppliers_read,
        sonar_runs = report.sonar_runs_read,
        sonar_results = report.sonar_results_read,
        "extraction complete"
    );

    let output = transform::run(&collections)?;
    log_summaries(&output);

    if config.dry_run {
        info!("dry run, skipping load stage");
        return Ok(report);
    }

    let loader = Loader::connect(&config.database).await?;
    let result = load_tables(&loader, &output, config.all_tables, &mut report).await;
    loader.close().await;
    result?;

    Ok(report)
}

async fn load_tables(
    loader: &Loader,
    output: &TransformOutput,
    all_tables: bool,
    report: &mut PipelineReport,
) -> Result<()> {
    let mut tables = vec![&output.price_trends, &output.sonar_runs_client];
    if all_tables {
        tables.push(&output.results_per_part_shop);
        tables.push(&output.merged_results_runs);
    }
    for frame in tables {
        let written = loader.replace_table(frame).await?;
        report.tables_written.push((frame.name.clone(), written));
    }
    Ok(())
}

/// The per-client and per-category summaries are reporting output, not
/// persisted tables; they go to the log.
fn log_summaries(output: &TransformOutput) {
    info!(
        price_trend_buckets = output.price_trends.len(),
        client_run_rows = output.sonar_runs_client.len(),
        part_shop_pairs = output.results_per_part_shop.len(),
        merged_result_rows = output.merged_results_runs.len(),
        "transform complete"
    );
    for summary in [
        &output.sonar_run_count_per_client,
        &output.average_parts_per_client,
        &output.status_per_category,
    ] {
        info!(summary = %summary.name, rows = summary.len(), "summary computed");
        debug!(summary = %summary.name, rows = ?summary.rows);
    }
}
