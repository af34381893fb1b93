//! Flatten nested documents into tabular rows.
//!
//! Nested object fields project to columns named by the dot-joined path of
//! nested keys, so `{"_id": {"$oid": "x"}}` yields column `_id.$oid`. The
//! key set of the output reproduces exactly what the documents carry; no
//! schema is assumed beyond "array of JSON objects". Arrays and empty
//! objects do not flatten and are kept whole as JSON cells.

use serde_json::{Map, Value};

use crate::error::{EtlError, Result};
use crate::frame::types::{Cell, Frame, Row};

const SEPARATOR: &str = ".";

/// Flatten one collection into a frame named `name`.
pub fn flatten_collection(name: &str, documents: &[Value]) -> Result<Frame> {
    let mut frame = Frame::new(name);
    for (idx, doc) in documents.iter().enumerate() {
        match doc {
            Value::Object(obj) => {
                let mut row = Row::new();
                flatten_object(obj, "", &mut frame, &mut row);
                frame.rows.push(row);
            }
            other => {
                return Err(EtlError::malformed(
                    name,
                    format!("document {idx} is not a JSON object: {other}"),
                ));
            }
        }
    }
    Ok(frame)
}

fn flatten_object(obj: &Map<String, Value>, prefix: &str, frame: &mut Frame, row: &mut Row) {
    for (key, value) in obj {
        let column = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}{}{}", prefix, SEPARATOR, key)
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_object(nested, &column, frame, row);
            }
            other => {
                frame.add_column(&column);
                row.insert(column, Cell::from_json(other.clone()));
            }
        }
    }
}
