//! JSON patches that add or remove one finalizer without clobbering concurrent writers.
//!
//! Each patch starts with a `test` operation against the list as it was read. If another
//! controller changed the list in between, the API server rejects the whole patch and the
//! key is retried against a fresh read.

use json_patch::Patch;
use serde_json::{json, Value};

use crate::error::Result;

/// Appends `finalizer` to `current`. `None` when it is already present.
pub fn add(current: &[String], finalizer: &str) -> Result<Option<Patch>> {
    if current.iter().any(|f| f == finalizer) { return Ok(None); }
    let ops = if current.is_empty() {
        json!([
            { "op": "test", "path": "/metadata/finalizers", "value": Value::Null },
            { "op": "add", "path": "/metadata/finalizers", "value": [finalizer] },
        ])
    } else {
        json!([
            { "op": "test", "path": "/metadata/finalizers", "value": current },
            { "op": "add", "path": "/metadata/finalizers/-", "value": finalizer },
        ])
    };
    Ok(Some(serde_json::from_value(ops)?))
}

/// Removes `finalizer` from the position it held in `current`. `None` when absent.
pub fn remove(current: &[String], finalizer: &str) -> Result<Option<Patch>> {
    let Some(idx) = current.iter().position(|f| f == finalizer) else { return Ok(None) };
    let path = format!("/metadata/finalizers/{idx}");
    let ops = json!([
        { "op": "test", "path": path, "value": finalizer },
        { "op": "remove", "path": path },
    ]);
    Ok(Some(serde_json::from_value(ops)?))
}
