//! Deterministic fingerprints for query caching and sync idempotence.

use sha2::{Digest, Sha256};

use crate::defaults::CACHE_PREFIX;
use crate::models::{QueryOptions, SqlRow};

/// Fingerprint of `(tenant, normalized(query), opts)` used as the cache key.
///
/// The query is lowercased and whitespace-normalized so trivially different
/// spellings of the same query share an entry. The request deadline is
/// excluded: it changes execution, not the result.
pub fn query_fingerprint(tenant: &str, query: &str, opts: &QueryOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant.as_bytes());
    hasher.update([0u8]);

    let normalized = normalize_query(query);
    hasher.update(normalized.as_bytes());
    hasher.update([0u8]);

    hasher.update((opts.k as u64).to_le_bytes());
    hasher.update(opts.threshold.to_le_bytes());
    if let Some(preferred) = opts.preferred {
        hasher.update(preferred.to_string().as_bytes());
    }

    let hash = hex::encode(hasher.finalize());
    format!("{}{}", CACHE_PREFIX, &hash[..16])
}

/// Lowercase and collapse runs of whitespace to single spaces.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Content hash of a relational row.
///
/// `SqlRow` serializes with sorted keys, so re-seeing the same row content
/// always yields the same hash regardless of column order at the source.
pub fn row_hash(row: &SqlRow) -> String {
    let serialized = serde_json::to_string(&row.columns).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}
