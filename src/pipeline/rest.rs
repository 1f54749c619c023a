//! REST transport adapter: pulls raw parameter values out of whichever
//! location each [`Parameter`] declares, and shapes an
//! [`InvocationOutcome`] into the REST JSON response bodies.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::config::model::{ParamLocation, Parameter};
use crate::pipeline::InvocationOutcome;

/// Extracts raw (unvalidated) parameter values, pulling from query,
/// path, header, or body per each parameter's declared `location`. The
/// body map is the caller's already-flattened top-level JSON object
/// (scalar values stringified); nested body shapes are outside a
/// query-parameter's string contract.
pub fn extract_parameters(
    parameters: &[Parameter],
    query: &HashMap<String, String>,
    path_params: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    body: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut raw = HashMap::new();
    for param in parameters {
        let value = match param.location {
            ParamLocation::Query => query.get(&param.name),
            ParamLocation::Path => path_params.get(&param.name),
            ParamLocation::Header => headers.get(&param.name),
            ParamLocation::Body => body.get(&param.name),
        };
        if let Some(value) = value {
            raw.insert(param.name.clone(), value.clone());
        }
    }
    raw
}

/// Read-endpoint response: a bare array of row objects, or
/// `{columns, rows}` when the caller asked for `?format=table`.
pub fn shape_read_response(outcome: &InvocationOutcome, table_format: bool) -> Value {
    if table_format {
        json!({
            "columns": outcome.result.columns,
            "rows": outcome.result.rows,
            "fromCache": outcome.from_cache,
        })
    } else {
        json!(outcome.result.rows)
    }
}

/// Write-endpoint response: `{rowsAffected, data?}`.
pub fn shape_write_response(outcome: &InvocationOutcome) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("rowsAffected".to_string(), json!(outcome.rows_affected.unwrap_or(0)));
    if !outcome.result.rows.is_empty() {
        body.insert("data".to_string(), json!(outcome.result.rows));
    }
    Value::Object(body)
}
