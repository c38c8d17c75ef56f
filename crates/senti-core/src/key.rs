use crate::errors::CoreError;
use crate::models::AnalysisOptions;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Deterministic cache key: 64-bit hash of the normalized text plus the
/// option fingerprint, e.g. `9f1c03a2b4d5e6f7:sek`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild a key read back from durable storage.
    pub fn from_stored(s: impl Into<String>) -> Self {
        CacheKey(s.into())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim, collapse internal whitespace runs to one space, lower-case.
/// Only used for keying; backends receive the original text.
pub fn normalize_text(text: &str) -> Result<String, CoreError> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(CoreError::EmptyInput);
    }
    Ok(collapsed.to_lowercase())
}

/// Compute the cache key for a text under the given options.
pub fn cache_key(text: &str, options: &AnalysisOptions) -> Result<CacheKey, CoreError> {
    let normalized = normalize_text(text)?;
    let hash = xxh64(normalized.as_bytes(), 0);
    Ok(CacheKey(format!("{hash:016x}:{}", options.fingerprint())))
}
