//! In-process TTL cache, one `moka` instance per purpose so each gets its
//! own eviction policy and lifetime instead of sharing a single keyspace.

use std::time::Duration;

use moka::sync::Cache as MokaCache;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::Config;

/// A single purpose-scoped cache: JSON-serialized values behind a moka TTL
/// cache, so callers store any serializable type without this module
/// needing a variant per value type.
#[derive(Clone)]
pub struct TypedCache {
    inner: MokaCache<String, String>,
}

impl TypedCache {
    fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: MokaCache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner
            .get(key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }

    pub fn put<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.inner.insert(key.into(), raw);
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }
}

/// Bundles the per-purpose caches the rest of the crate reaches for, with
/// TTLs sourced from [`Config`] rather than hardcoded here.
pub struct Cache {
    pub intent: TypedCache,
    pub policy: TypedCache,
    pub trip_plan: TypedCache,
    pub deal_search: TypedCache,
    pub explanation: TypedCache,
}

impl Cache {
    pub fn new(config: &Config) -> Self {
        Self {
            intent: TypedCache::new(config.cache_capacity, config.cache_ttl_intent),
            policy: TypedCache::new(config.cache_capacity, config.cache_ttl_policy),
            trip_plan: TypedCache::new(config.cache_capacity, config.cache_ttl_trip_plan),
            deal_search: TypedCache::new(config.cache_capacity, config.cache_ttl_deal_search),
            explanation: TypedCache::new(config.cache_capacity, config.cache_ttl_explanation),
        }
    }
}

#[cfg(test)]
impl Cache {
    /// A standalone cache for tests that don't want to build a full `Config`.
    pub fn for_test() -> Self {
        let ttl = Duration::from_secs(3600);
        Self {
            intent: TypedCache::new(1_000, ttl),
            policy: TypedCache::new(1_000, ttl),
            trip_plan: TypedCache::new(1_000, ttl),
            deal_search: TypedCache::new(1_000, ttl),
            explanation: TypedCache::new(1_000, ttl),
        }
    }
}

/// Builds a stable cache key from an arbitrary set of ordered parts, so
/// callers don't hand-format `format!("{a}:{b}:{c}")` at every call site.
pub fn cache_key(parts: &[&str]) -> String {
    parts.join("\u{1f}")
}
