//! Per-node namespaced TTL cache (spec §4.C, part 2).
//!
//! Grounded on the teacher's interior-mutability idiom (`parking_lot::Mutex`
//! guarding a `rustc_hash::FxHashMap`, as used for `EventBus`'s sink list) —
//! there is no cache in the teacher itself, so the trait/namespace/TTL shape
//! here is built fresh from spec §4.C and the teacher's general
//! error-handling and concurrency conventions.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

/// Namespace prefix for all result-cache entries (spec §4.C).
const NAMESPACE_PREFIX: &str = "__writes__";

/// Derives the cache namespace for a node: `"__writes__"[":"graph_version]":"node_id`.
/// Bumping `graph_version` invalidates every prior entry for every node in
/// one step, since it changes every namespace string at once.
#[must_use]
pub fn namespace(node_id: &str, graph_version: Option<&str>) -> String {
    match graph_version {
        Some(v) => format!("{NAMESPACE_PREFIX}:{v}:{node_id}"),
        None => format!("{NAMESPACE_PREFIX}:{node_id}"),
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Result-cache contract (spec §4.C).
pub trait Cache: Send + Sync {
    /// Returns a deep copy of the cached value, or `None` on miss. An
    /// expired entry is treated as a miss and evicted lazily.
    fn get(&self, namespace: &str, key: &str) -> Option<Value>;

    /// Stores a deep copy of `value`. `ttl = None` (or zero) means no
    /// expiration.
    fn set(&self, namespace: &str, key: &str, value: Value, ttl: Option<Duration>);

    /// Removes every entry in `namespace`.
    fn clear(&self, namespace: &str);
}

/// In-process `Cache` implementation; the only backend this crate ships
/// (spec treats the cache contract, not a particular storage, as load-bearing).
#[derive(Default)]
pub struct InMemoryCache {
    namespaces: Mutex<FxHashMap<String, FxHashMap<String, Entry>>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for InMemoryCache {
    fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let mut namespaces = self.namespaces.lock();
        let bucket = namespaces.get_mut(namespace)?;
        let now = Instant::now();

        match bucket.get(key) {
            Some(entry) if entry.is_expired(now) => {
                bucket.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn set(&self, namespace: &str, key: &str, value: Value, ttl: Option<Duration>) {
        let expires_at = ttl.filter(|d| !d.is_zero()).map(|d| Instant::now() + d);
        let mut namespaces = self.namespaces.lock();
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn clear(&self, namespace: &str) {
        self.namespaces.lock().remove(namespace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn namespace_includes_graph_version_when_present() {
        assert_eq!(namespace("worker", Some("v2")), "__writes__:v2:worker");
        assert_eq!(namespace("worker", None), "__writes__:worker");
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = InMemoryCache::new();
        cache.set("ns", "k", json!({"out": 42}), None);
        assert_eq!(cache.get("ns", "k"), Some(json!({"out": 42})));
    }

    #[test]
    fn get_on_missing_key_is_none() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.get("ns", "missing"), None);
    }

    #[test]
    fn ttl_expiry_forces_recompute() {
        let cache = InMemoryCache::new();
        cache.set("ns", "k", json!(1), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("ns", "k"), None);
    }

    #[test]
    fn zero_ttl_means_no_expiration() {
        let cache = InMemoryCache::new();
        cache.set("ns", "k", json!(1), Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("ns", "k"), Some(json!(1)));
    }

    #[test]
    fn clear_removes_every_entry_in_namespace() {
        let cache = InMemoryCache::new();
        cache.set("ns", "a", json!(1), None);
        cache.set("ns", "b", json!(2), None);
        cache.clear("ns");
        assert_eq!(cache.get("ns", "a"), None);
        assert_eq!(cache.get("ns", "b"), None);
    }

    #[test]
    fn namespaces_are_isolated() {
        let cache = InMemoryCache::new();
        cache.set("ns1", "k", json!(1), None);
        assert_eq!(cache.get("ns2", "k"), None);
    }

    #[test]
    fn graph_version_bump_invalidates_all_prior_entries() {
        let cache = InMemoryCache::new();
        let old_ns = namespace("worker", Some("v1"));
        let new_ns = namespace("worker", Some("v2"));
        cache.set(&old_ns, "k", json!(1), None);
        assert_eq!(cache.get(&new_ns, "k"), None);
    }
}
