use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use routewise_core::domain::entity::EntityId;
use routewise_core::domain::intent::Intent;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub intent: Intent,
    pub entity_id: EntityId,
}

impl CacheKey {
    pub fn new(intent: Intent, entity_id: EntityId) -> Self {
        Self { intent, entity_id }
    }
}

#[derive(Debug)]
pub struct CacheEntry {
    pub content: String,
    pub suggested_actions: Vec<String>,
    stored_at: Instant,
}

impl CacheEntry {
    pub fn new(content: impl Into<String>, suggested_actions: Vec<String>) -> Self {
        Self { content: content.into(), suggested_actions, stored_at: Instant::now() }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Skill output cache keyed by (intent, entity). One instance is built at
/// startup and shared; entries are never mutated after insertion.
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_secs(ttl_secs: u64) -> Self {
        Self::new(Duration::from_secs(ttl_secs))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.read().await.get(key).filter(|entry| entry.is_fresh(self.ttl)).cloned();
        match entry {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event_name = "agent.cache.hit",
                    intent = key.intent.as_str(),
                    entity_id = key.entity_id.as_str(),
                    "response cache hit"
                );
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn insert(&self, key: CacheKey, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        self.entries.write().await.insert(key, Arc::clone(&entry));
        entry
    }

    /// Drops every intent cached for one entity, returning how many went.
    pub async fn invalidate_entity(&self, entity_id: &EntityId) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| &key.entity_id != entity_id);
        before - entries.len()
    }

    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(self.ttl));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(event_name = "agent.cache.purged", purged, "purged expired cache entries");
        }
        purged
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use routewise_core::domain::entity::EntityId;
    use routewise_core::domain::intent::Intent;

    use super::{CacheEntry, CacheKey, CacheStats, ResponseCache};

    fn key(intent: Intent, id: &str) -> CacheKey {
        CacheKey::new(intent, EntityId::new(id))
    }

    #[tokio::test]
    async fn hit_after_insert_counts_stats() {
        let cache = ResponseCache::from_secs(600);
        assert!(cache.get(&key(Intent::StatusQuery, "m-001")).await.is_none());

        cache.insert(key(Intent::StatusQuery, "m-001"), CacheEntry::new("健康度 82", vec![])).await;
        let entry = cache.get(&key(Intent::StatusQuery, "m-001")).await.expect("cached");
        assert_eq!(entry.content, "健康度 82");
        assert!(cache.get(&key(Intent::Diagnosis, "m-001")).await.is_none());

        assert_eq!(cache.stats().await, CacheStats { hits: 1, misses: 2, entries: 1 });
    }

    #[tokio::test]
    async fn expired_entries_miss_and_purge() {
        let cache = ResponseCache::new(Duration::from_millis(20));
        cache.insert(key(Intent::StatusQuery, "m-001"), CacheEntry::new("旧数据", vec![])).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get(&key(Intent::StatusQuery, "m-001")).await.is_none());
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn invalidation_is_scoped_to_entity() {
        let cache = ResponseCache::from_secs(600);
        cache.insert(key(Intent::StatusQuery, "m-001"), CacheEntry::new("a", vec![])).await;
        cache.insert(key(Intent::Diagnosis, "m-001"), CacheEntry::new("b", vec![])).await;
        cache.insert(key(Intent::StatusQuery, "m-002"), CacheEntry::new("c", vec![])).await;

        assert_eq!(cache.invalidate_entity(&EntityId::new("m-001")).await, 2);
        assert!(cache.get(&key(Intent::StatusQuery, "m-002")).await.is_some());
    }

    #[tokio::test]
    async fn replacing_keeps_earlier_handles_intact() {
        let cache = ResponseCache::from_secs(600);
        let first = cache.insert(key(Intent::StatusQuery, "m-001"), CacheEntry::new("v1", vec![])).await;
        cache.insert(key(Intent::StatusQuery, "m-001"), CacheEntry::new("v2", vec![])).await;

        assert_eq!(first.content, "v1");
        let current = cache.get(&key(Intent::StatusQuery, "m-001")).await.expect("cached");
        assert_eq!(current.content, "v2");
    }
}
