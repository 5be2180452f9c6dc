//! Analysis configuration.
//!
//! Limits that turn runaway graph builds and path enumerations into
//! `AllocationError`s, plus the sizing of the domain-transition memo.

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;

/// Environment variable overriding [`AnalysisConfig::max_graph_edges`].
pub const ENV_MAX_GRAPH_EDGES: &str = "SEPOLICY_MAX_GRAPH_EDGES";
/// Environment variable overriding [`AnalysisConfig::max_further_candidates`].
pub const ENV_MAX_FURTHER_CANDIDATES: &str = "SEPOLICY_MAX_FURTHER_CANDIDATES";
/// Environment variable overriding [`CacheConfig::max_entries`] of the memo.
pub const ENV_MEMO_CACHE_ENTRIES: &str = "SEPOLICY_MEMO_CACHE_ENTRIES";

/// Configuration for a bounded LRU cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Whether to enable the cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 4_096,
            enabled: true,
        }
    }
}

/// Analysis session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Upper bound on edges in one information-flow graph.
    pub max_graph_edges: usize,
    /// Upper bound on queued candidate paths in one "further" session.
    pub max_further_candidates: usize,
    /// Rule memo used by domain-transition analysis.
    pub memo_cache: CacheConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_graph_edges: 4_000_000,
            max_further_candidates: 100_000,
            memo_cache: CacheConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Create a configuration from environment variables.
    ///
    /// Unset variables keep their defaults; unparsable values are logged
    /// and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = read_env_usize(ENV_MAX_GRAPH_EDGES) {
            config.max_graph_edges = v;
        }
        if let Some(v) = read_env_usize(ENV_MAX_FURTHER_CANDIDATES) {
            config.max_further_candidates = v;
        }
        if let Some(v) = read_env_usize(ENV_MEMO_CACHE_ENTRIES) {
            config.memo_cache.max_entries = v;
            config.memo_cache.enabled = v > 0;
        }
        config
    }

    /// Compute a hash of the configuration parameters.
    pub fn params_hash(&self) -> serde_json::Result<String> {
        canonical_hash_hex(self)
    }

    /// Create a tightly bounded configuration for testing.
    #[cfg(test)]
    pub fn minimal() -> Self {
        Self {
            max_graph_edges: 64,
            max_further_candidates: 16,
            memo_cache: CacheConfig {
                max_entries: 8,
                enabled: true,
            },
        }
    }
}

fn read_env_usize(key: &str) -> Option<usize> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}
