//! The domain pipeline: flatten the four collections, align their keys,
//! join, and aggregate into the derived tables.
//!
//! Every step consumes its inputs immutably and yields a new frame, so the
//! whole transform is a straight line from raw documents to output tables.

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::extract::RawCollections;
use crate::frame::{
    count_by, flatten_collection, inner_join, left_join, mean_by, monthly_mean, Frame,
};

/// Canonical key mapping: flattened export columns to scalar identifier
/// names. A mapping whose source column is absent in the data is a no-op;
/// drift then surfaces as a missing-column error at the join that needs it.
const CLIENT_RENAMES: &[(&str, &str)] = &[("_id.$oid", "client_id")];

const SUPPLIER_RENAMES: &[(&str, &str)] = &[("_id.$oid", "supplier_id")];

const SONAR_RUN_RENAMES: &[(&str, &str)] = &[
    ("_id.$oid", "sonar_run_id"),
    ("client_id.$oid", "client_id"),
    ("date.$date", "date"),
    ("time.$date", "time"),
];

const SONAR_RESULT_RENAMES: &[(&str, &str)] = &[
    ("_id.$oid", "sonar_result_id"),
    ("supplier_id.$oid", "supplier_id"),
    ("sonar_run_id.$oid", "sonar_run_id"),
    ("part_id.$oid", "part_id"),
];

/// Run columns carried into the client view, besides the join key.
const RUN_VIEW_COLUMNS: &[&str] = &[
    "category",
    "status",
    "countries",
    "proxy_country",
    "created_parts_count",
    "published_parts_count",
    "only_already_found",
    "sonar_run_type",
    "use_proxy",
    "total_sonar_results_count",
    "search_login_pages",
    "sonar_run_id",
    "date",
    "time",
];

/// Everything the transform produces. The first two tables are always
/// persisted; the next two only on request; the summaries are logged, never
/// written.
#[derive(Debug)]
pub struct TransformOutput {
    /// Monthly mean price per part (`part_id`, `date`, `year`, `month`,
    /// `price_norm`).
    pub price_trends: Frame,
    /// One row per (client, run) pair; every client retained.
    pub sonar_runs_client: Frame,
    /// Result counts per (`part_id`, supplier `name`).
    pub results_per_part_shop: Frame,
    /// Raw inner join of results and runs.
    pub merged_results_runs: Frame,
    pub sonar_run_count_per_client: Frame,
    pub average_parts_per_client: Frame,
    pub status_per_category: Frame,
}

/// Transform the four raw collections into the derived tables.
pub fn run(collections: &RawCollections) -> Result<TransformOutput> {
    let clients = normalize("clients", &collections.clients, CLIENT_RENAMES)?;
    let suppliers = normalize("suppliers", &collections.suppliers, SUPPLIER_RENAMES)?;
    let sonar_runs = normalize("sonar_runs", &collections.sonar_runs, SONAR_RUN_RENAMES)?;
    let sonar_results = normalize(
        "sonar_results",
        &collections.sonar_results,
        SONAR_RESULT_RENAMES,
    )?;

    // Results against suppliers: how many results per part and shop.
    let merged_results_suppliers = inner_join(
        "merged_results_suppliers",
        &sonar_results,
        &suppliers,
        "supplier_id",
    )?;
    let results_per_part_shop = count_by(
        "results_per_part_shop",
        &merged_results_suppliers,
        &["part_id", "name"],
        "results_count",
    )?;

    // Results against runs: price observations over run dates.
    let merged_results_runs = inner_join(
        "merged_results_runs",
        &sonar_results,
        &sonar_runs,
        "sonar_run_id",
    )?;
    let observations = merged_results_runs.select("price_observations", &["part_id", "price_norm", "date"]);
    let price_trends = monthly_mean("price_trends", &observations, "part_id", "date")?;

    // Clients against runs: every client, with its runs' selected columns.
    let run_view_columns: Vec<&str> = RUN_VIEW_COLUMNS
        .iter()
        .copied()
        .chain(std::iter::once("client_id"))
        .collect();
    let runs_projection = sonar_runs.select("sonar_runs_projection", &run_view_columns);
    let mut sonar_runs_client =
        left_join("sonar_runs_client", &clients, &runs_projection, "client_id")?;
    // The view's schema always carries the full run subset; a column the
    // export never had reads as null, like any unmatched run field.
    for column in RUN_VIEW_COLUMNS {
        sonar_runs_client.add_column(column);
    }

    // Per-client and per-category summaries over the client view. A client
    // with zero runs still counts its single null-run row.
    let sonar_run_count_per_client = count_by(
        "sonar_run_count_per_client",
        &sonar_runs_client,
        &["client_id"],
        "sonar_run_count",
    )?;
    let average_parts_per_client = mean_by(
        "average_parts_per_client",
        &sonar_runs_client,
        "client_id",
        &["created_parts_count", "published_parts_count"],
    )?
    .rename_column("created_parts_count", "average_created_parts")
    .rename_column("published_parts_count", "average_published_parts");
    let status_per_category = count_by(
        "status_per_category",
        &sonar_runs_client,
        &["category", "status"],
        "count",
    )?;

    Ok(TransformOutput {
        price_trends,
        sonar_runs_client,
        results_per_part_shop,
        merged_results_runs,
        sonar_run_count_per_client,
        average_parts_per_client,
        status_per_category,
    })
}

fn normalize(name: &str, documents: &[Value], renames: &[(&str, &str)]) -> Result<Frame> {
    let mut frame = flatten_collection(name, documents)?;
    for (old, new) in renames {
        frame = frame.rename_column(old, new);
    }
    debug!(table = name, rows = frame.len(), columns = frame.columns.len(), "collection normalized");
    Ok(frame)
}
