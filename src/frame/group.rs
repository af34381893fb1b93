//! Grouped aggregates and monthly resampling.
//!
//! Groups are keyed by scalar cells and held in BTreeMaps so output order is
//! deterministic: key ascending, then (for the resample) time ascending.
//! Rows carrying a null group key are skipped by every aggregate here.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use crate::error::{EtlError, Result};
use crate::frame::types::{Cell, Frame, Row};

/// Orderable view of a group-key cell. Floats and JSON cells do not key
/// groups; rows carrying them are skipped like nulls.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Bool(bool),
    Int(i64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

fn group_key(cell: &Cell) -> Option<GroupKey> {
    match cell {
        Cell::Text(s) => Some(GroupKey::Text(s.clone())),
        Cell::Int(i) => Some(GroupKey::Int(*i)),
        Cell::Bool(b) => Some(GroupKey::Bool(*b)),
        Cell::Timestamp(ts) => Some(GroupKey::Timestamp(*ts)),
        _ => None,
    }
}

fn key_cell(key: &GroupKey) -> Cell {
    match key {
        GroupKey::Text(s) => Cell::Text(s.clone()),
        GroupKey::Int(i) => Cell::Int(*i),
        GroupKey::Bool(b) => Cell::Bool(*b),
        GroupKey::Timestamp(ts) => Cell::Timestamp(*ts),
    }
}

/// Count rows per key tuple, emitting the count under `count_column`.
pub fn count_by(name: &str, frame: &Frame, keys: &[&str], count_column: &str) -> Result<Frame> {
    for key in keys {
        if !frame.is_empty() && !frame.has_column(key) {
            return Err(EtlError::missing_column(&frame.name, *key));
        }
    }

    let mut groups: BTreeMap<Vec<GroupKey>, u64> = BTreeMap::new();
    for row in &frame.rows {
        let tuple: Option<Vec<GroupKey>> = keys
            .iter()
            .map(|k| group_key(frame.cell(row, k)))
            .collect();
        if let Some(tuple) = tuple {
            *groups.entry(tuple).or_insert(0) += 1;
        }
    }

    let mut out = Frame::new(name);
    out.columns = keys
        .iter()
        .map(|k| k.to_string())
        .chain(std::iter::once(count_column.to_string()))
        .collect();
    for (tuple, count) in groups {
        let mut row = Row::new();
        for (key, value) in keys.iter().zip(tuple.iter()) {
            row.insert(key.to_string(), key_cell(value));
        }
        row.insert(count_column.to_string(), Cell::Int(count as i64));
        out.rows.push(row);
    }
    Ok(out)
}

/// Per-group mean of the named numeric columns. Non-numeric and null cells
/// are skipped; a group whose cells are all null yields a null mean.
pub fn mean_by(name: &str, frame: &Frame, key: &str, value_columns: &[&str]) -> Result<Frame> {
    if !frame.is_empty() && !frame.has_column(key) {
        return Err(EtlError::missing_column(&frame.name, key));
    }
    for column in value_columns {
        if !frame.is_empty() && !frame.has_column(column) {
            return Err(EtlError::missing_column(&frame.name, *column));
        }
    }

    // (sum, count) per value column, per group
    let mut groups: BTreeMap<GroupKey, Vec<(f64, u64)>> = BTreeMap::new();
    for row in &frame.rows {
        let Some(k) = group_key(frame.cell(row, key)) else {
            continue;
        };
        let acc = groups
            .entry(k)
            .or_insert_with(|| vec![(0.0, 0); value_columns.len()]);
        for (i, column) in value_columns.iter().enumerate() {
            if let Some(v) = frame.cell(row, column).as_f64() {
                acc[i].0 += v;
                acc[i].1 += 1;
            }
        }
    }

    let mut out = Frame::new(name);
    out.columns = std::iter::once(key.to_string())
        .chain(value_columns.iter().map(|c| c.to_string()))
        .collect();
    for (k, acc) in groups {
        let mut row = Row::new();
        row.insert(key.to_string(), key_cell(&k));
        for (column, (sum, count)) in value_columns.iter().zip(acc.iter()) {
            let mean = if *count > 0 {
                Cell::Float(sum / *count as f64)
            } else {
                Cell::Null
            };
            row.insert(column.to_string(), mean);
        }
        out.rows.push(row);
    }
    Ok(out)
}

/// Parse a cell as a timestamp. Text cells try RFC 3339, then a naive
/// ISO-8601 datetime read as UTC, then a bare date; Int cells are epoch
/// milliseconds (the document export's `$date` number form).
pub fn parse_timestamp(cell: &Cell) -> Option<DateTime<Utc>> {
    match cell {
        Cell::Timestamp(ts) => Some(*ts),
        Cell::Text(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|dt| Utc.from_utc_datetime(&dt))
            })
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| Utc.from_utc_datetime(&dt))
            }),
        Cell::Int(millis) => Utc.timestamp_millis_opt(*millis).single(),
        _ => None,
    }
}

/// Strict form of [`parse_timestamp`]: a null or unparseable cell is a
/// `DateParse` error naming the column and the offending value.
pub fn parse_timestamp_strict(column: &str, cell: &Cell) -> Result<DateTime<Utc>> {
    parse_timestamp(cell).ok_or_else(|| EtlError::DateParse {
        column: column.to_string(),
        value: cell.render_text().unwrap_or_else(|| "null".to_string()),
    })
}

/// Last day of the cell's calendar month at 00:00:00 UTC.
fn month_end(ts: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = (ts.year(), ts.month());
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    // Both constructions are in-range for any chrono date.
    let last_day = first_of_next
        .and_then(|d| d.pred_opt())
        .unwrap_or_else(|| ts.date_naive());
    Utc.from_utc_datetime(&last_day.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// Monthly resample: group by (`key`, year, month) over `date_column` and
/// average every numeric column except the key and the date.
///
/// Per bucket the output carries the key, `date` (calendar month end),
/// `year`, `month`, and the means. Months with no observations produce no
/// row. Rows whose date is null or unparseable are dropped with a warning;
/// if a nonempty input loses every row this way the resample fails.
pub fn monthly_mean(name: &str, frame: &Frame, key: &str, date_column: &str) -> Result<Frame> {
    if !frame.is_empty() && !frame.has_column(key) {
        return Err(EtlError::missing_column(&frame.name, key));
    }
    if !frame.is_empty() && !frame.has_column(date_column) {
        return Err(EtlError::missing_column(&frame.name, date_column));
    }

    let value_columns: Vec<&String> = frame
        .columns
        .iter()
        .filter(|c| c.as_str() != key && c.as_str() != date_column)
        .collect();

    let mut groups: BTreeMap<(GroupKey, i64, i64), (DateTime<Utc>, Vec<(f64, u64)>)> =
        BTreeMap::new();
    let mut dropped = 0usize;
    for row in &frame.rows {
        let Some(k) = group_key(frame.cell(row, key)) else {
            continue;
        };
        let date_cell = frame.cell(row, date_column);
        let ts = match parse_timestamp_strict(date_column, date_cell) {
            Ok(ts) => ts,
            Err(err) => {
                dropped += 1;
                warn!(table = %frame.name, %err, "dropping row with unparseable date");
                continue;
            }
        };

        let bucket = (k, ts.year() as i64, ts.month() as i64);
        let acc = groups
            .entry(bucket)
            .or_insert_with(|| (month_end(ts), vec![(0.0, 0); value_columns.len()]));
        for (i, column) in value_columns.iter().enumerate() {
            if let Some(v) = frame.cell(row, column).as_f64() {
                acc.1[i].0 += v;
                acc.1[i].1 += 1;
            }
        }
    }

    if groups.is_empty() && !frame.is_empty() && dropped > 0 {
        return Err(EtlError::EmptyAfterDateFilter(date_column.to_string()));
    }
    if dropped > 0 {
        warn!(table = %frame.name, dropped, "rows dropped during monthly resample");
    }

    let mut out = Frame::new(name);
    out.columns = vec![
        key.to_string(),
        "date".to_string(),
        "year".to_string(),
        "month".to_string(),
    ];
    out.columns.extend(value_columns.iter().map(|c| c.to_string()));

    for ((k, year, month), (bucket_end, acc)) in groups {
        let mut row = Row::new();
        row.insert(key.to_string(), key_cell(&k));
        row.insert("date".to_string(), Cell::Timestamp(bucket_end));
        row.insert("year".to_string(), Cell::Int(year));
        row.insert("month".to_string(), Cell::Int(month));
        for (column, (sum, count)) in value_columns.iter().zip(acc.iter()) {
            let mean = if *count > 0 {
                Cell::Float(sum / *count as f64)
            } else {
                Cell::Null
            };
            row.insert((*column).clone(), mean);
        }
        out.rows.push(row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.into())
    }

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

    #[test]
    fn count_by_skips_null_keys_and_sorts() {
        let input = frame(
            "merged",
            &["part_id", "name"],
            &[
                &[("part_id", text("P2")), ("name", text("Acme"))],
                &[("part_id", text("P1")), ("name", text("Acme"))],
                &[("part_id", text("P1")), ("name", text("Acme"))],
                &[("part_id", Cell::Null), ("name", text("Acme"))],
            ],
        );

        let counts = count_by("results_per_part_shop", &input, &["part_id", "name"], "results_count")
            .unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.rows[0].get("part_id"), Some(&text("P1")));
        assert_eq!(counts.rows[0].get("results_count"), Some(&Cell::Int(2)));
        assert_eq!(counts.rows[1].get("results_count"), Some(&Cell::Int(1)));
    }

    #[test]
    fn mean_by_skips_nulls_within_group() {
        let input = frame(
            "view",
            &["client_id", "created_parts_count"],
            &[
                &[("client_id", text("C1")), ("created_parts_count", Cell::Int(10))],
                &[("client_id", text("C1")), ("created_parts_count", Cell::Null)],
                &[("client_id", text("C2")), ("created_parts_count", Cell::Null)],
            ],
        );

        let means = mean_by("avg", &input, "client_id", &["created_parts_count"]).unwrap();
        assert_eq!(means.rows[0].get("created_parts_count"), Some(&Cell::Float(10.0)));
        assert_eq!(means.rows[1].get("created_parts_count"), Some(&Cell::Null));
    }

    #[test]
    fn parses_the_export_date_forms() {
        assert!(parse_timestamp(&text("2024-01-15T10:30:00Z")).is_some());
        assert!(parse_timestamp(&text("2024-01-15T10:30:00.123")).is_some());
        assert!(parse_timestamp(&text("2024-01-15")).is_some());
        assert!(parse_timestamp(&Cell::Int(1705312200000)).is_some());
        assert!(parse_timestamp(&text("not a date")).is_none());
        assert!(parse_timestamp(&Cell::Null).is_none());
    }

    #[test]
    fn resample_single_observation() {
        let input = frame(
            "observations",
            &["part_id", "price_norm", "date"],
            &[&[
                ("part_id", text("P1")),
                ("price_norm", Cell::Float(10.0)),
                ("date", text("2024-01-15")),
            ]],
        );

        let trends = monthly_mean("price_trends", &input, "part_id", "date").unwrap();
        assert_eq!(trends.len(), 1);
        let row = &trends.rows[0];
        assert_eq!(row.get("part_id"), Some(&text("P1")));
        assert_eq!(row.get("year"), Some(&Cell::Int(2024)));
        assert_eq!(row.get("month"), Some(&Cell::Int(1)));
        assert_eq!(row.get("price_norm"), Some(&Cell::Float(10.0)));
        // Calendar month end.
        let expected = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(row.get("date"), Some(&Cell::Timestamp(expected)));
    }

    #[test]
    fn resample_averages_within_a_month() {
        let input = frame(
            "observations",
            &["part_id", "price_norm", "date"],
            &[
                &[
                    ("part_id", text("P1")),
                    ("price_norm", Cell::Float(10.0)),
                    ("date", text("2024-01-05")),
                ],
                &[
                    ("part_id", text("P1")),
                    ("price_norm", Cell::Float(20.0)),
                    ("date", text("2024-01-25")),
                ],
            ],
        );

        let trends = monthly_mean("price_trends", &input, "part_id", "date").unwrap();
        assert_eq!(trends.len(), 1);
        assert_eq!(trends.rows[0].get("price_norm"), Some(&Cell::Float(15.0)));
    }

    #[test]
    fn resample_buckets_are_unique_and_sparse() {
        let input = frame(
            "observations",
            &["part_id", "price_norm", "date"],
            &[
                &[
                    ("part_id", text("P1")),
                    ("price_norm", Cell::Float(1.0)),
                    ("date", text("2024-01-05")),
                ],
                // Gap: nothing in February.
                &[
                    ("part_id", text("P1")),
                    ("price_norm", Cell::Float(3.0)),
                    ("date", text("2024-03-05")),
                ],
            ],
        );

        let trends = monthly_mean("price_trends", &input, "part_id", "date").unwrap();
        assert_eq!(trends.len(), 2);
        let buckets: Vec<_> = trends
            .rows
            .iter()
            .map(|r| (r.get("part_id").cloned(), r.get("year").cloned(), r.get("month").cloned()))
            .collect();
        let mut unique = buckets.clone();
        unique.dedup();
        assert_eq!(buckets.len(), unique.len());
    }

    #[test]
    fn december_bucket_ends_on_the_31st() {
        let input = frame(
            "observations",
            &["part_id", "price_norm", "date"],
            &[&[
                ("part_id", text("P1")),
                ("price_norm", Cell::Float(5.0)),
                ("date", text("2023-12-02")),
            ]],
        );

        let trends = monthly_mean("price_trends", &input, "part_id", "date").unwrap();
        let expected = Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(trends.rows[0].get("date"), Some(&Cell::Timestamp(expected)));
    }

    #[test]
    fn bad_dates_drop_but_good_rows_survive() {
        let input = frame(
            "observations",
            &["part_id", "price_norm", "date"],
            &[
                &[
                    ("part_id", text("P1")),
                    ("price_norm", Cell::Float(10.0)),
                    ("date", text("garbage")),
                ],
                &[
                    ("part_id", text("P1")),
                    ("price_norm", Cell::Float(20.0)),
                    ("date", text("2024-01-15")),
                ],
            ],
        );

        let trends = monthly_mean("price_trends", &input, "part_id", "date").unwrap();
        assert_eq!(trends.len(), 1);
        assert_eq!(trends.rows[0].get("price_norm"), Some(&Cell::Float(20.0)));
    }

    #[test]
    fn all_dates_bad_fails_the_resample() {
        let input = frame(
            "observations",
            &["part_id", "price_norm", "date"],
            &[&[
                ("part_id", text("P1")),
                ("price_norm", Cell::Float(10.0)),
                ("date", text("garbage")),
            ]],
        );

        let err = monthly_mean("price_trends", &input, "part_id", "date").unwrap_err();
        assert!(matches!(err, EtlError::EmptyAfterDateFilter(_)));
    }

    #[test]
    fn empty_input_resamples_to_empty() {
        let input = frame("observations", &["part_id", "price_norm", "date"], &[]);
        let trends = monthly_mean("price_trends", &input, "part_id", "date").unwrap();
        assert!(trends.is_empty());
    }

    #[test]
    fn missing_date_column_fails_fast() {
        let input = frame(
            "observations",
            &["part_id"],
            &[&[("part_id", text("P1"))]],
        );
        let err = monthly_mean("price_trends", &input, "part_id", "date").unwrap_err();
        assert!(matches!(
            err,
            EtlError::MissingColumn { ref column, .. } if column == "date"
        ));
    }

    #[test]
    fn strict_parse_names_column_and_value() {
        let err = parse_timestamp_strict("date", &text("garbage")).unwrap_err();
        match err {
            EtlError::DateParse { column, value } => {
                assert_eq!(column, "date");
                assert_eq!(value, "garbage");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            parse_timestamp_strict("date", &Cell::Null),
            Err(EtlError::DateParse { .. })
        ));
        assert!(parse_timestamp_strict("date", &text("2024-01-15")).is_ok());
    }
}
