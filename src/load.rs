//! Persist derived frames into PostgreSQL.
//!
//! Each table is replaced wholesale, but through a staging swap inside one
//! transaction: the new rows land in `<name>__staging`, then the old table
//! drops and the staging table takes its name. Readers never observe a
//! missing or half-written table, and a failed load leaves the previous
//! table untouched.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{EtlError, Result};
use crate::frame::{Cell, Frame};

static BARE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Rows per INSERT statement, sized to stay well under the bind limit for
/// any realistic column count.
const INSERT_CHUNK_PARAMS: usize = 1000;

/// One SQL type per column, unified over every cell in the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlType {
    Boolean,
    BigInt,
    Double,
    TimestampTz,
    Text,
    Jsonb,
}

impl SqlType {
    fn ddl(self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::TimestampTz => "TIMESTAMPTZ",
            SqlType::Text => "TEXT",
            SqlType::Jsonb => "JSONB",
        }
    }

    fn of_cell(cell: &Cell) -> Option<SqlType> {
        match cell {
            Cell::Null => None,
            Cell::Bool(_) => Some(SqlType::Boolean),
            Cell::Int(_) => Some(SqlType::BigInt),
            Cell::Float(_) => Some(SqlType::Double),
            Cell::Text(_) => Some(SqlType::Text),
            Cell::Timestamp(_) => Some(SqlType::TimestampTz),
            Cell::Json(_) => Some(SqlType::Jsonb),
        }
    }

    /// Unify two observed cell types for one column. Int widens to Double;
    /// any other disagreement degrades to Text.
    fn unify(self, other: SqlType) -> SqlType {
        use SqlType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (BigInt, Double) | (Double, BigInt) => Double,
            _ => Text,
        }
    }
}

/// Infer one SQL type per column; a column with no non-null cells is TEXT.
fn column_types(frame: &Frame) -> Vec<(String, SqlType)> {
    frame
        .columns
        .iter()
        .map(|column| {
            let unified = frame
                .rows
                .iter()
                .filter_map(|row| SqlType::of_cell(frame.cell(row, column)))
                .reduce(SqlType::unify)
                .unwrap_or(SqlType::Text);
            (column.clone(), unified)
        })
        .collect()
}

/// Double-quote an identifier; names outside the bare-identifier form get
/// their embedded quotes doubled.
fn quote_ident(name: &str) -> String {
    if BARE_IDENTIFIER.is_match(name) {
        format!("\"{name}\"")
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Writes frames to PostgreSQL over a scoped connection pool.
pub struct Loader {
    pool: PgPool,
}

impl Loader {
    /// Build the pool from configuration and verify connectivity.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| EtlError::Config("DATABASE_URL is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(url)
            .await?;
        debug!(max_connections = config.max_connections, "database pool created");
        Ok(Loader { pool })
    }

    /// Replace `frame.name` with the frame's rows. Returns the row count
    /// written. An empty frame still replaces the target with an empty
    /// table carrying the inferred columns.
    pub async fn replace_table(&self, frame: &Frame) -> Result<u64> {
        let types = column_types(frame);
        let table = quote_ident(&frame.name);
        let staging = quote_ident(&format!("{}__staging", frame.name));

        let column_ddl: Vec<String> = types
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.ddl()))
            .collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {staging}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE {staging} ({})",
            column_ddl.join(", ")
        ))
        .execute(&mut *tx)
        .await?;

        let column_list: Vec<String> = types.iter().map(|(name, _)| quote_ident(name)).collect();
        let chunk_rows = (INSERT_CHUNK_PARAMS / types.len().max(1)).max(1);
        let mut written = 0u64;

        for chunk in frame.rows.chunks(chunk_rows) {
            let mut placeholders = Vec::with_capacity(chunk.len());
            for row_idx in 0..chunk.len() {
                let base = row_idx * types.len();
                let params: Vec<String> =
                    (1..=types.len()).map(|i| format!("${}", base + i)).collect();
                placeholders.push(format!("({})", params.join(", ")));
            }
            let sql = format!(
                "INSERT INTO {staging} ({}) VALUES {}",
                column_list.join(", "),
                placeholders.join(", ")
            );

            let mut query = sqlx::query(&sql);
            for row in chunk {
                for (column, ty) in &types {
                    query = bind_cell(query, frame.cell(row, column), *ty);
                }
            }
            written += query.execute(&mut *tx).await?.rows_affected();
        }

        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("ALTER TABLE {staging} RENAME TO {table}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(table = %frame.name, rows = written, "table replaced");
        Ok(written)
    }

    /// Close the pool; called on every exit path of the pipeline.
    pub async fn close(self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

type PgQuery<'q> =
    sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn bind_cell<'q>(query: PgQuery<'q>, cell: &Cell, ty: SqlType) -> PgQuery<'q> {
    match ty {
        SqlType::Boolean => query.bind(match cell {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }),
        SqlType::BigInt => query.bind(match cell {
            Cell::Int(i) => Some(*i),
            _ => None,
        }),
        SqlType::Double => query.bind(cell.as_f64()),
        SqlType::TimestampTz => query.bind(match cell {
            Cell::Timestamp(ts) => Some(*ts),
            _ => None,
        }),
        SqlType::Text => query.bind(cell.render_text()),
        SqlType::Jsonb => query.bind(match cell {
            Cell::Json(v) => Some(v.clone()),
            _ => None,
        }),
    }
}
