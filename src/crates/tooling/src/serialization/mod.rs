//! Serialization utilities
//!
//! Stable JSON serialization and content digests, suitable for cache keys
//! that must be identical across processes and runs.

use crate::Result;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Serialize JSON value to a stable string representation
///
/// Object keys are sorted recursively; array order is preserved.
///
/// # Example
///
/// ```rust
/// use tooling::serialization::stable_json_string;
/// use serde_json::json;
///
/// let val = json!({"b": 2, "a": 1, "c": 3});
/// let stable = stable_json_string(&val).unwrap();
/// assert_eq!(stable, r#"{"a":1,"b":2,"c":3}"#);
/// ```
pub fn stable_json_string(value: &Value) -> Result<String> {
    let normalized = normalize_json(value.clone());
    Ok(serde_json::to_string(&normalized)?)
}

/// Serialize any value to a stable JSON string
pub fn to_stable_json<T: Serialize>(value: &T) -> Result<String> {
    let json_value = serde_json::to_value(value)?;
    stable_json_string(&json_value)
}

/// Hex-encoded SHA-256 of raw bytes
///
/// ```rust
/// use tooling::serialization::sha256_hex;
///
/// assert_eq!(
///     sha256_hex(b"abc"),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{:x}", digest)
}

/// Hex-encoded SHA-256 of the stable JSON form of `value`
///
/// Two values that differ only in object key order produce the same digest.
pub fn stable_digest<T: Serialize>(value: &T) -> Result<String> {
    let stable = to_stable_json(value)?;
    Ok(sha256_hex(stable.as_bytes()))
}

fn normalize_json(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize_json(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(normalize_json).collect()),
        other => other,
    }
}
