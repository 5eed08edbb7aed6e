//! Leaf encoding: `Value` to bytes and back.
//!
//! JSON over the tagged [`Value`] representation. Maps are ordered, so equal
//! values always encode to equal bytes; the content-addressed archivers rely on
//! that.

use ghostdex_common::{Result, error::Error};
use xxhash_rust::xxh3::xxh3_64;

use crate::value::Value;

pub fn encode(value: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::encoding("value", e))
}

pub fn decode(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| Error::encoding("value", e))
}

/// Name under which an encoded unit is stored.
pub fn content_address(bytes: &[u8]) -> String {
    format!("{:016x}", xxh3_64(bytes))
}

/// Canonical string form of a value, used as the identity of a reference.
pub fn canonical_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}")),
    }
}
