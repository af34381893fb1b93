//! Tabular building blocks: cells, rows, frames.
//!
//! A [`Frame`] is an ordered collection of rows with a remembered column
//! order (first-seen across the collection). Cells are typed scalars rather
//! than raw JSON; identifiers and timestamps flatten to plain values so joins
//! compare scalars, never embedded objects. Anything that does not flatten
//! (arrays, empty objects) survives as a [`Cell::Json`] passthrough.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Arrays and unflattened objects, loaded as JSONB.
    Json(Value),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric view used by grouped means. Bool, Text, Timestamp and Json
    /// cells are not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Convert a scalar JSON value into a cell. Objects and arrays are kept
    /// whole as `Json`.
    pub fn from_json(value: Value) -> Cell {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Int(i)
                } else {
                    Cell::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Cell::Text(s),
            other => Cell::Json(other),
        }
    }

    /// Canonical text rendering, used when a column's cells disagree on type
    /// and the column degrades to TEXT.
    pub fn render_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(f) => Some(f.to_string()),
            Cell::Text(s) => Some(s.clone()),
            Cell::Timestamp(ts) => Some(ts.to_rfc3339()),
            Cell::Json(v) => Some(v.to_string()),
        }
    }
}

/// One row: column name to cell. Columns absent from a row read as null.
pub type Row = BTreeMap<String, Cell>;

/// An immutable-by-convention table. Every transformation produces a new
/// frame; nothing mutates a frame after it is built.
#[derive(Debug, Clone)]
pub struct Frame {
    pub name: String,
    /// Column order as first seen while building the frame.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Frame {
    pub fn new(name: impl Into<String>) -> Self {
        Frame {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Record a column in first-seen order.
    pub fn add_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    /// Append a row, registering any new columns it carries.
    pub fn push_row(&mut self, row: Row) {
        for column in row.keys() {
            if !self.has_column(column) {
                self.columns.push(column.clone());
            }
        }
        self.rows.push(row);
    }

    /// Cell at (row, column); absent columns read as null.
    pub fn cell<'a>(&'a self, row: &'a Row, column: &str) -> &'a Cell {
        row.get(column).unwrap_or(&Cell::Null)
    }

    /// New frame with one column renamed. Missing source columns are a no-op
    /// (logged at debug); schema drift surfaces later at the join or group
    /// that needs the canonical name.
    pub fn rename_column(&self, old: &str, new: &str) -> Frame {
        if !self.has_column(old) {
            tracing::debug!(table = %self.name, column = old, "rename skipped, column absent");
            return self.clone();
        }
        let columns = self
            .columns
            .iter()
            .map(|c| if c == old { new.to_string() } else { c.clone() })
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(k, v)| {
                        let key = if k == old { new.to_string() } else { k.clone() };
                        (key, v.clone())
                    })
                    .collect()
            })
            .collect();
        Frame {
            name: self.name.clone(),
            columns,
            rows,
        }
    }

    /// New frame keeping only the named columns, in the given order. A
    /// requested column the source never carried is left out of the result,
    /// so a drifted key column stays visible to the join or group that
    /// needs it.
    pub fn select(&self, name: impl Into<String>, columns: &[&str]) -> Frame {
        let mut out = Frame::new(name);
        out.columns = columns
            .iter()
            .filter(|c| self.has_column(c))
            .map(|c| c.to_string())
            .collect();
        for row in &self.rows {
            let projected: Row = columns
                .iter()
                .filter_map(|c| row.get(*c).map(|cell| (c.to_string(), cell.clone())))
                .collect();
            out.rows.push(projected);
        }
        out
    }
}
