use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::models::ProviderPayload;

/// Integrity checksums for cached provider payloads.
///
/// A cached entry carries the SHA-256 of its serialized payloads. A row that was
/// edited by hand or corrupted in storage no longer matches and is treated as a
/// cache miss, so the engine refetches instead of serving damaged data.
///
/// Object keys are sorted before hashing so the checksum survives storage engines
/// (JSONB) that reorder keys.
pub fn payload_checksum(payloads: &[ProviderPayload]) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    for payload in payloads {
        hasher.update(payload.provider.as_str().as_bytes());
        hasher.update(serde_json::to_vec(&canonicalize(&payload.body))?);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Returns true if `checksum` matches the payloads.
pub fn verify_payloads(payloads: &[ProviderPayload], checksum: &str) -> bool {
    match payload_checksum(payloads) {
        Ok(computed) if computed == checksum => true,
        Ok(computed) => {
            tracing::warn!(
                "Cache validation failed: checksum mismatch. Expected: {}, computed: {}",
                checksum,
                computed
            );
            false
        }
        Err(e) => {
            tracing::warn!("Cache validation failed: could not serialize payloads: {}", e);
            false
        }
    }
}
