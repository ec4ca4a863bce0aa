//! TTL cache for deployment classification results.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::models::DeploymentInfo;

/// Cache statistics exposed over the API.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub ttl_seconds: u64,
}

struct CacheEntry {
    info: DeploymentInfo,
    expires_at: Instant,
}

/// Process-local, best-effort cache keyed by `{kind}/{namespace}/{name}`.
///
/// Reads take the shared lock so they never block each other; expired entries
/// are treated as misses and evicted lazily on the next write of the key.
pub struct DetectionCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl DetectionCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    #[must_use]
    pub fn key(kind: &str, namespace: &str, name: &str) -> String {
        format!("{}/{namespace}/{name}", kind.to_lowercase())
    }

    /// A hit only when the entry exists and has not expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<DeploymentInfo> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = entries.get(key)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.info.clone())
    }

    pub fn set(&self, key: String, info: DeploymentInfo) {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(
            key,
            CacheEntry {
                info,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        let valid = entries.values().filter(|e| now < e.expires_at).count();
        CacheStats {
            total_entries: entries.len(),
            valid_entries: valid,
            expired_entries: entries.len() - valid,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentMethod;

    fn info() -> DeploymentInfo {
        DeploymentInfo::new("default", "app", "Deployment", DeploymentMethod::Direct, 0.60)
    }

    #[test]
    fn get_returns_inserted_entry() {
        let cache = DetectionCache::new(Duration::from_secs(300));
        let key = DetectionCache::key("Deployment", "default", "app");
        cache.set(key.clone(), info());
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.resource_name, "app");
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = DetectionCache::new(Duration::from_millis(5));
        let key = DetectionCache::key("Deployment", "default", "app");
        cache.set(key.clone(), info());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&key).is_none());

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.valid_entries, 0);
    }

    #[test]
    fn clear_drops_everything() {
        let cache = DetectionCache::new(Duration::from_secs(300));
        cache.set(DetectionCache::key("Deployment", "default", "a"), info());
        cache.set(DetectionCache::key("StatefulSet", "default", "b"), info());
        assert_eq!(cache.stats().total_entries, 2);
        cache.clear();
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn key_lowercases_kind() {
        assert_eq!(
            DetectionCache::key("Deployment", "default", "app"),
            "deployment/default/app"
        );
    }
}
