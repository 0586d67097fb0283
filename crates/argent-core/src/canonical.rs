//! Canonical JSON serialization and checksum helpers.
//!
//! Rerun idempotency rests on byte-identical serialization: the same
//! logical value must always produce the same bytes, so metadata and
//! load-level checksums can be compared across independent runs.
//!
//! Canonical JSON here means:
//! - Object keys sorted lexicographically (UTF-8 byte order)
//! - No whitespace
//! - UTF-8 output
//! - Integers only — floats are rejected because their stringification is
//!   not stable across serializers
//!
//! Artifact payloads are hashed as raw bytes and are not subject to the
//! float restriction; canonical JSON applies to hashed *metadata* content.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Serializes `value` into canonical JSON bytes.
///
/// # Errors
///
/// Returns `Error::Serialization` if the value cannot be converted to JSON
/// or contains float values.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let tree = serde_json::to_value(value)
        .map_err(|e| Error::serialization("canonical JSON conversion", e))?;
    let mut out = Vec::new();
    write_value(&tree, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(Error::Serialization {
                    message: format!(
                        "float values are not allowed in canonical JSON (got {n}); use integers"
                    ),
                });
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => {
            let encoded = serde_json::to_vec(s)
                .map_err(|e| Error::serialization("canonical string escape", e))?;
            out.extend_from_slice(&encoded);
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // serde_json maps preserve insertion order; sort keys here so
            // the output is independent of how the value was built.
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));

            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                let encoded = serde_json::to_vec(key)
                    .map_err(|e| Error::serialization("canonical key escape", e))?;
                out.extend_from_slice(&encoded);
                out.push(b':');
                write_value(item, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

/// SHA-256 digest of `bytes`, prefixed with the algorithm name.
#[must_use]
pub fn sha256_prefixed(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("sha256:{}", hex::encode(digest))
}

/// Checksum of a value's canonical JSON serialization.
///
/// # Errors
///
/// Returns `Error::Serialization` if canonical serialization fails.
pub fn canonical_checksum<T: Serialize>(value: &T) -> Result<String> {
    Ok(sha256_prefixed(&to_canonical_bytes(value)?))
}
