//! Structural content digest.
//!
//! A 32-byte digest over a value's structure and contents, consistent
//! with `PartialEq`: equal values produce equal digests. Used by the
//! array uniqueness check and as an ingredient of the compiled-validator
//! cache key.

use sha2::{Digest, Sha256};

use super::types::Value;

/// Digest a single value.
pub fn content_digest(value: &Value) -> [u8; 32] {
    let mut hasher = Sha256::new();
    digest_into(value, &mut hasher);
    hasher.finalize().into()
}

/// Feed a value's structure into an existing hasher.
pub(crate) fn digest_into(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Null => hasher.update([0u8]),
        Value::Bool(b) => {
            hasher.update([1u8]);
            hasher.update([*b as u8]);
        }
        Value::Int(n) => {
            hasher.update([2u8]);
            hasher.update(n.to_le_bytes());
        }
        Value::Float(f) => {
            hasher.update([3u8]);
            hasher.update(f.to_bits().to_le_bytes());
        }
        Value::Str(s) => {
            hasher.update([4u8]);
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update([5u8]);
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items.iter() {
                digest_into(item, hasher);
            }
        }
        Value::Object(map) => {
            hasher.update([6u8]);
            hasher.update((map.len() as u64).to_le_bytes());
            for (k, v) in map.iter() {
                hasher.update((k.len() as u64).to_le_bytes());
                hasher.update(k.as_bytes());
                digest_into(v, hasher);
            }
        }
        Value::Date(d) => {
            hasher.update([7u8]);
            hasher.update(d.timestamp().to_le_bytes());
            hasher.update(d.timestamp_subsec_nanos().to_le_bytes());
        }
    }
}
