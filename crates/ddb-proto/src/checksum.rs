use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::message::Message;

/// Canonicalize by sorting object keys recursively and emitting compact
/// JSON. Two structurally equal messages always canonicalize to the same
/// byte string regardless of field order.
pub fn canonical_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

pub fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hex SHA-256 over the canonical JSON of the message WITHOUT its
/// `checksum` field (to avoid self-reference).
pub fn checksum_of(msg: &Message) -> String {
    let mut raw = serde_json::to_value(msg).expect("json serialization must not fail");
    if let Value::Object(map) = &mut raw {
        map.remove("checksum");
    }
    let canonical = canonical_json(&raw);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
