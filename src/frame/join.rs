//! Hash joins on a single shared key column.
//!
//! Both joins build a hash index over the right frame and probe it with the
//! left. Join keys must be scalar identifiers; a row whose key cell is null
//! (or not a comparable scalar) never matches. A missing key column in
//! either frame is a configuration error and fails fast.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::{EtlError, Result};
use crate::frame::types::{Cell, Frame, Row};

/// Hashable view of a key cell. Floats and JSON cells make no sense as
/// identifiers and are treated like null.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JoinKey {
    Text(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

fn join_key(cell: &Cell) -> Option<JoinKey> {
    match cell {
        Cell::Text(s) => Some(JoinKey::Text(s.clone())),
        Cell::Int(i) => Some(JoinKey::Int(*i)),
        Cell::Bool(b) => Some(JoinKey::Bool(*b)),
        Cell::Timestamp(ts) => Some(JoinKey::Timestamp(*ts)),
        _ => None,
    }
}

/// Inner join `left ⨝ right` on `key`. Rows without a match on either side
/// are dropped.
pub fn inner_join(name: &str, left: &Frame, right: &Frame, key: &str) -> Result<Frame> {
    join(name, left, right, key, false)
}

/// Left join: every left row survives; unmatched right columns are null. A
/// left row matching k right rows expands to k output rows.
pub fn left_join(name: &str, left: &Frame, right: &Frame, key: &str) -> Result<Frame> {
    join(name, left, right, key, true)
}

fn join(name: &str, left: &Frame, right: &Frame, key: &str, keep_unmatched: bool) -> Result<Frame> {
    // An empty frame carries no schema to drift from; only a nonempty frame
    // missing the key is a configuration error.
    if !left.is_empty() && !left.has_column(key) {
        return Err(EtlError::missing_column(&left.name, key));
    }
    if !right.is_empty() && !right.has_column(key) {
        return Err(EtlError::missing_column(&right.name, key));
    }

    // Right columns carried into the output: the key appears once (from the
    // left), and a non-key right column colliding with a left name is
    // skipped so the join stays total.
    let right_columns: Vec<&String> = right
        .columns
        .iter()
        .filter(|c| c.as_str() != key && !left.has_column(c))
        .collect();

    let mut index: HashMap<JoinKey, Vec<&Row>> = HashMap::new();
    for row in &right.rows {
        if let Some(k) = join_key(right.cell(row, key)) {
            index.entry(k).or_default().push(row);
        }
    }

    let mut out = Frame::new(name);
    out.columns = left
        .columns
        .iter()
        .chain(right_columns.iter().copied())
        .cloned()
        .collect();

    for left_row in &left.rows {
        let matches = join_key(left.cell(left_row, key)).and_then(|k| index.get(&k));
        match matches {
            Some(right_rows) => {
                for right_row in right_rows {
                    let mut row = left_row.clone();
                    for column in &right_columns {
                        let cell = right.cell(right_row, column).clone();
                        row.insert((*column).clone(), cell);
                    }
                    out.rows.push(row);
                }
            }
            None if keep_unmatched => {
                let mut row = left_row.clone();
                for column in &right_columns {
                    row.insert((*column).clone(), Cell::Null);
                }
                out.rows.push(row);
            }
            None => {}
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, columns: &[&str], rows: &[&[(&str, Cell)]]) -> Frame {
        let mut f = Frame::new(name);
        f.columns = columns.iter().map(|c| c.to_string()).collect();
        for row in rows {
            f.rows.push(
                row.iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            );
        }
        f
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.into())
    }

    #[test]
    fn inner_join_drops_unmatched_rows() {
        let results = frame(
            "results",
            &["supplier_id", "part_id"],
            &[
                &[("supplier_id", text("S1")), ("part_id", text("P1"))],
                &[("supplier_id", text("S9")), ("part_id", text("P2"))],
                &[("supplier_id", text("S9")), ("part_id", text("P3"))],
            ],
        );
        let suppliers = frame(
            "suppliers",
            &["supplier_id", "name"],
            &[&[("supplier_id", text("S1")), ("name", text("Acme"))]],
        );

        let joined = inner_join("merged", &results, &suppliers, "supplier_id").unwrap();
        // Both S9 rows drop: no matching supplier.
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.rows[0].get("name"), Some(&text("Acme")));
    }

    #[test]
    fn left_join_keeps_every_left_row() {
        let clients = frame(
            "clients",
            &["client_id"],
            &[&[("client_id", text("C1"))], &[("client_id", text("C2"))]],
        );
        let runs = frame(
            "runs",
            &["client_id", "status"],
            &[&[("client_id", text("C2")), ("status", text("finished"))]],
        );

        let joined = left_join("view", &clients, &runs, "client_id").unwrap();
        assert_eq!(joined.len(), 2);
        assert!(joined.cell(&joined.rows[0], "status").is_null());
        assert_eq!(joined.rows[1].get("status"), Some(&text("finished")));
    }

    #[test]
    fn left_row_expands_per_match() {
        let clients = frame("clients", &["client_id"], &[&[("client_id", text("C1"))]]);
        let runs = frame(
            "runs",
            &["client_id", "status"],
            &[
                &[("client_id", text("C1")), ("status", text("a"))],
                &[("client_id", text("C1")), ("status", text("b"))],
            ],
        );

        let joined = left_join("view", &clients, &runs, "client_id").unwrap();
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn null_key_never_matches() {
        let left = frame(
            "l",
            &["k", "v"],
            &[&[("k", Cell::Null), ("v", Cell::Int(1))]],
        );
        let right = frame("r", &["k", "w"], &[&[("k", Cell::Null), ("w", Cell::Int(2))]]);

        let inner = inner_join("j", &left, &right, "k").unwrap();
        assert!(inner.is_empty());

        let outer = left_join("j", &left, &right, "k").unwrap();
        assert_eq!(outer.len(), 1);
        assert!(outer.cell(&outer.rows[0], "w").is_null());
    }

    #[test]
    fn missing_key_column_fails_fast() {
        let left = frame("l", &["a"], &[&[("a", text("1"))]]);
        let right = frame("r", &["k"], &[&[("k", text("1"))]]);
        let err = inner_join("j", &left, &right, "k").unwrap_err();
        assert!(matches!(
            err,
            EtlError::MissingColumn { ref table, ref column } if table == "l" && column == "k"
        ));
    }

    #[test]
    fn missing_key_on_the_right_also_fails() {
        let left = frame("l", &["k"], &[&[("k", text("1"))]]);
        let right = frame("r", &["a"], &[&[("a", text("1"))]]);
        let err = left_join("j", &left, &right, "k").unwrap_err();
        assert!(matches!(
            err,
            EtlError::MissingColumn { ref table, ref column } if table == "r" && column == "k"
        ));
    }

    #[test]
    fn empty_right_frame_has_no_key_to_check() {
        let left = frame("clients", &["client_id"], &[&[("client_id", text("C1"))]]);
        let right = frame("runs", &[], &[]);
        let joined = left_join("view", &left, &right, "client_id").unwrap();
        assert_eq!(joined.len(), 1);
        assert!(inner_join("j", &left, &right, "client_id").unwrap().is_empty());
    }

    #[test]
    fn key_column_appears_once_and_collisions_skip() {
        let left = frame(
            "l",
            &["k", "shared"],
            &[&[("k", text("1")), ("shared", text("left"))]],
        );
        let right = frame(
            "r",
            &["k", "shared", "extra"],
            &[&[
                ("k", text("1")),
                ("shared", text("right")),
                ("extra", text("e")),
            ]],
        );

        let joined = inner_join("j", &left, &right, "k").unwrap();
        assert_eq!(joined.columns, vec!["k", "shared", "extra"]);
        // Left value wins on collision.
        assert_eq!(joined.rows[0].get("shared"), Some(&text("left")));
    }
}
