//! Content hashing for artifacts and definitions.
//!
//! Values are hashed over their canonical JSON encoding: object keys sorted,
//! no insignificant whitespace. Two semantically equal values therefore share
//! one address regardless of how they were produced.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Canonical JSON bytes for a serializable value.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    // Round-tripping through `Value` sorts object keys (BTreeMap-backed map).
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&value)
}

/// SHA-256 hex digest of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 hex digest of a value's canonical JSON encoding.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&canonical_json(value)?))
}

/// A stable UUID taken from the first 16 bytes of the SHA-256 of `bytes`.
pub fn content_uuid(bytes: &[u8]) -> Uuid {
    let digest = Sha256::digest(bytes);
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(raw).into_uuid()
}
