//! Read the four collection exports into in-memory document sequences.
//!
//! Each file is a single JSON array of objects as produced by a document-store
//! export. `sonar_results.json` is by far the largest collection and goes
//! through simd-json first, falling back to serde_json when the SIMD parser
//! rejects the buffer; the other three use serde_json directly. Both paths
//! accept the same inputs and produce identical values.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::error::{EtlError, Result};

/// File names of the four collections, fixed by the export.
pub const CLIENTS_FILE: &str = "clients.json";
pub const SUPPLIERS_FILE: &str = "suppliers.json";
pub const SONAR_RUNS_FILE: &str = "sonar_runs.json";
pub const SONAR_RESULTS_FILE: &str = "sonar_results.json";

/// The four raw collections, in document order, untouched by any reshaping.
#[derive(Debug)]
pub struct RawCollections {
    pub clients: Vec<Value>,
    pub suppliers: Vec<Value>,
    pub sonar_runs: Vec<Value>,
    pub sonar_results: Vec<Value>,
}

/// Read one collection file and parse it as a JSON array of documents.
pub fn read_collection(path: &Path) -> Result<Vec<Value>> {
    let content = read_bytes(path)?;
    let value: Value = serde_json::from_slice(&content)
        .map_err(|e| EtlError::malformed(path, e.to_string()))?;
    into_documents(path, value)
}

/// Same contract as [`read_collection`], simd-json first with a serde_json
/// fallback.
pub fn read_collection_simd(path: &Path) -> Result<Vec<Value>> {
    let mut content = read_bytes(path)?;
    match simd_json::to_owned_value(&mut content) {
        Ok(owned) => {
            // Re-serialize through serde_json so both parse paths yield the
            // same Value representation.
            let json_str = simd_json::to_string(&owned)
                .map_err(|e| EtlError::malformed(path, e.to_string()))?;
            let value: Value = serde_json::from_str(&json_str)
                .map_err(|e| EtlError::malformed(path, e.to_string()))?;
            into_documents(path, value)
        }
        Err(simd_err) => {
            debug!(path = %path.display(), error = %simd_err, "simd-json rejected input, retrying with serde_json");
            // simd-json mutates the buffer in place; re-read before retrying.
            read_collection(path)
        }
    }
}

/// Read all four collections from `dir`.
pub fn read_collections(dir: &Path) -> Result<RawCollections> {
    let clients = read_collection(&dir.join(CLIENTS_FILE))?;
    let suppliers = read_collection(&dir.join(SUPPLIERS_FILE))?;
    let sonar_runs = read_collection(&dir.join(SONAR_RUNS_FILE))?;
    let sonar_results = read_collection_simd(&dir.join(SONAR_RESULTS_FILE))?;

    debug!(
        clients = clients.len(),
        suppliers = suppliers.len(),
        sonar_runs = sonar_runs.len(),
        sonar_results = sonar_results.len(),
        "collections loaded"
    );

    Ok(RawCollections {
        clients,
        suppliers,
        sonar_runs,
        sonar_results,
    })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(EtlError::InputNotFound(PathBuf::from(path)))
        }
        Err(e) => Err(EtlError::Io(e)),
    }
}

fn into_documents(path: &Path, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(docs) => Ok(docs),
        other => Err(EtlError::malformed(
            path,
            format!("expected a top-level JSON array, got {}", json_type_name(&other)),
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
