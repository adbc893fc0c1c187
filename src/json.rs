//! JSON path extraction helpers
//!
//! Shared by pagination (total/cursor fields), the API layer (item lists,
//! destination IDs) and the transformation engine (mapping sources).
//! Simple dot-notation paths are resolved directly; wildcard patterns go
//! through jsonpath-rust.

use crate::error::{Error, Result};
use serde_json::Value;

/// Extract a value using a dot-notation path ("$.a.b", "a.b", "items[0].id")
pub fn extract_path(value: &Value, path: &str) -> Option<Value> {
    if path == "$" || path.is_empty() {
        return Some(value.clone());
    }
    let path = path.strip_prefix("$.").unwrap_or(path);
    let parts: Vec<&str> = path.split('.').collect();

    let mut current = value;
    for part in parts {
        // Handle array indexing like "data[0]" or "items[-1]"
        if let Some(bracket_pos) = part.find('[') {
            let name = &part[..bracket_pos];
            let index_str = &part[bracket_pos + 1..part.len() - 1];

            if !name.is_empty() {
                current = current.get(name)?;
            }

            if let Ok(index) = index_str.parse::<i64>() {
                if let Value::Array(arr) = current {
                    #[allow(
                        clippy::cast_possible_truncation,
                        clippy::cast_sign_loss,
                        clippy::cast_possible_wrap
                    )]
                    let idx = if index < 0 {
                        (arr.len() as i64 + index) as usize
                    } else {
                        index as usize
                    };
                    current = arr.get(idx)?;
                } else {
                    return None;
                }
            } else {
                return None;
            }
        } else {
            current = current.get(part)?;
        }
    }

    Some(current.clone())
}

/// Extract a value and render it as a string
pub fn extract_string(value: &Value, path: &str) -> Option<String> {
    match extract_path(value, path)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Extract a value and parse it as an unsigned integer
pub fn extract_u64(value: &Value, path: &str) -> Option<u64> {
    match extract_path(value, path)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extract an array of records from a response body
///
/// Wildcard patterns are handled by jsonpath-rust; a path that resolves to
/// a single object yields a one-element list.
pub fn extract_array(value: &Value, path: &str) -> Result<Vec<Value>> {
    if path.contains('*') {
        return extract_with_jsonpath(value, path);
    }
    match extract_path(value, path) {
        Some(Value::Array(arr)) => Ok(arr),
        Some(Value::Null) | None => Ok(vec![]),
        Some(v) => Ok(vec![v]),
    }
}

/// Extract records using jsonpath-rust
fn extract_with_jsonpath(value: &Value, path: &str) -> Result<Vec<Value>> {
    use jsonpath_rust::JsonPath;

    let jp = JsonPath::try_from(path).map_err(|e| Error::JsonPath {
        message: format!("Invalid JSONPath: {e}"),
    })?;

    let result = jp.find(value);

    match result {
        Value::Array(arr) => Ok(arr),
        Value::Null => Ok(vec![]),
        other => Ok(vec![other]),
    }
}
