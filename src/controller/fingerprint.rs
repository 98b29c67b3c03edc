//! Structural content fingerprints
//!
//! Detects drift of a workload's pod template or a tracked ConfigMap/Secret
//! without storing the full value. The value is converted to a
//! `serde_json::Value` and walked canonically:
//! - object keys are visited in sorted order
//! - arrays are visited by index
//! - every node is prefixed with a type tag and every string/collection with its length
//!
//! The resulting byte stream is hashed with FNV-1a, which (unlike
//! `DefaultHasher`/SipHash) is stable across processes and releases.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("value cannot be fingerprinted: {0}")]
pub struct FingerprintError(#[from] serde_json::Error);

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_OBJECT: u8 = 5;

struct Fnv1a(u64);

impl Fnv1a {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= *byte as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_len(&mut self, len: usize) {
        self.write(&(len as u64).to_le_bytes());
    }

    fn write_str(&mut self, s: &str) {
        self.write_len(s.len());
        self.write(s.as_bytes());
    }
}

fn walk(hasher: &mut Fnv1a, value: &Value) {
    match value {
        Value::Null => hasher.write(&[TAG_NULL]),
        Value::Bool(b) => hasher.write(&[TAG_BOOL, *b as u8]),
        Value::Number(n) => {
            hasher.write(&[TAG_NUMBER]);
            hasher.write_str(&n.to_string());
        }
        Value::String(s) => {
            hasher.write(&[TAG_STRING]);
            hasher.write_str(s);
        }
        Value::Array(items) => {
            hasher.write(&[TAG_ARRAY]);
            hasher.write_len(items.len());
            for item in items {
                walk(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.write(&[TAG_OBJECT]);
            hasher.write_len(map.len());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.write_str(key);
                walk(hasher, &map[key]);
            }
        }
    }
}

/// Hash an already-converted JSON value
pub fn hash_value(value: &Value) -> u64 {
    let mut hasher = Fnv1a(FNV_OFFSET);
    walk(&mut hasher, value);
    hasher.0
}

/// Compute the stored fingerprint of any serializable value
///
/// Encoded as a zero-padded 20 digit decimal string (the width of `u64::MAX`).
///
/// # Errors
/// Fails when the value has no JSON representation (e.g. maps with non-string keys).
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, FingerprintError> {
    let value = serde_json::to_value(value)?;
    Ok(encode(hash_value(&value)))
}

fn encode(hash: u64) -> String {
    format!("{hash:020}")
}
