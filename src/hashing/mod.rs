//! Deterministic, non-cryptographic hashing used for cache fingerprints.
//!
//! These hashes are used for fast indexing and equality filters, never for cryptographic
//! verification. A collision degrades to a cache miss, not data corruption, so 64-bit
//! truncation of a BLAKE3 digest is an acceptable tradeoff at realistic cache sizes.

use blake3::Hasher;
use serde_json::Value;
use std::collections::BTreeMap;

/// Computes a 64-bit hash of the input data using BLAKE3, truncated from 256 bits.
///
/// # Collision tolerance
///
/// The higher-level logic (direct-tier lookup, content-addressed cache entries) is
/// designed to tolerate rare collisions gracefully: a collision produces a cache miss,
/// never a returned-wrong-response, because the full serialized projection is never
/// reconstructed from the hash alone. This hash has no cryptographic or authentication
/// use — only fast indexing and probabilistic deduplication.
#[inline]
pub fn hash_to_u64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let bytes: [u8; 8] = hash.as_bytes()[0..8]
        .try_into()
        .expect("BLAKE3 always produces at least 8 bytes");
    u64::from_le_bytes(bytes)
}

/// Re-serializes a [`Value`] so that every object's keys are emitted in sorted order,
/// while array element order is preserved. Array order must be preserved because it
/// carries meaning (message insertion order); object key order never does.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = serde_json::Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Hashes an already-canonicalized JSON projection.
#[inline]
pub fn hash_projection(projection: &Value) -> Result<u64, serde_json::Error> {
    let canon = canonicalize(projection);
    let bytes = serde_json::to_vec(&canon)?;
    Ok(hash_to_u64(&bytes))
}

#[inline]
pub fn hash_tenant_id(tenant: &str) -> u64 {
    hash_to_u64(tenant.as_bytes())
}

/// Hashes a `(role, plan)` pair with an explicit separator so that boundary-shifted
/// inputs (`("ab", "cd")` vs `("abc", "d")`) never collide.
#[inline]
pub fn hash_context(role: &str, plan: &str) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(role.as_bytes());
    hasher.update(b"|");
    hasher.update(plan.as_bytes());

    let hash = hasher.finalize();
    let bytes: [u8; 8] = hash.as_bytes()[0..8]
        .try_into()
        .expect("BLAKE3 always produces at least 8 bytes");
    u64::from_le_bytes(bytes)
}
