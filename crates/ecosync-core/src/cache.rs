// ── Persistent entity cache ──
//
// Durable mirror of the last result set of every live feed, keyed by
// owner and collection. Read on first paint and while offline, so
// everything here is possibly stale relative to the reactive store.
// Values are replaced whole on every write; there is no merge and no
// versioning.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::storage::{DurableStore, Namespace};

/// Default time-to-live of a cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Owner-scoped cache key: `{owner}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    owner: String,
    name: String,
}

impl CacheKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn owner_prefix(owner: &str) -> String {
        format!("{owner}/")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A cached value plus when it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    pub stored_at: DateTime<Utc>,
}

/// Only the timestamp, for sweeping without decoding payloads.
#[derive(Deserialize)]
struct EntryHeader {
    stored_at: DateTime<Utc>,
}

/// Durable key/value cache of entity snapshots.
///
/// Cheap to clone; clones share the underlying store.
#[derive(Clone)]
pub struct PersistentCache {
    store: Arc<dyn DurableStore>,
    ttl: Duration,
}

impl PersistentCache {
    pub fn new(store: Arc<dyn DurableStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read an entry. Never fails: a miss, an expired entry, and a
    /// storage or decode failure all come back as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let raw_key = key.to_string();
        let bytes = match self.store.get(Namespace::EntityCache, &raw_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %raw_key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %raw_key, error = %e, "cache entry undecodable, treating as miss");
                return None;
            }
        };

        if self.is_expired(entry.stored_at) {
            debug!(key = %raw_key, stored_at = %entry.stored_at, "cache entry expired");
            if let Err(e) = self.store.delete(Namespace::EntityCache, &raw_key).await {
                warn!(key = %raw_key, error = %e, "failed to delete expired cache entry");
            }
            return None;
        }

        Some(entry)
    }

    /// Overwrite the entry under `key` with `value`.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), CoreError> {
        let entry = CacheEntry {
            key: key.to_string(),
            payload: value,
            stored_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        self.store
            .set(Namespace::EntityCache, &entry.key, bytes)
            .await
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<bool, CoreError> {
        self.store
            .delete(Namespace::EntityCache, &key.to_string())
            .await
    }

    /// Delete every expired (or undecodable) entry. Returns how many
    /// were removed.
    pub async fn sweep_expired(&self) -> Result<usize, CoreError> {
        let mut removed = 0;
        for key in self.store.keys(Namespace::EntityCache).await? {
            let Some(bytes) = self.store.get(Namespace::EntityCache, &key).await? else {
                continue;
            };
            let expired = serde_json::from_slice::<EntryHeader>(&bytes)
                .map_or(true, |h| self.is_expired(h.stored_at));
            if expired && self.store.delete(Namespace::EntityCache, &key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }

    /// Delete every entry belonging to `owner`.
    pub async fn purge_owner(&self, owner: &str) -> Result<usize, CoreError> {
        let prefix = CacheKey::owner_prefix(owner);
        let mut removed = 0;
        for key in self.store.keys(Namespace::EntityCache).await? {
            if key.starts_with(&prefix) && self.store.delete(Namespace::EntityCache, &key).await? {
                removed += 1;
            }
        }
        info!(owner, removed, "purged owner cache");
        Ok(removed)
    }

    fn is_expired(&self, stored_at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(stored_at);
        // Entries from the future (clock skew) are treated as fresh.
        age.to_std().is_ok_and(|age| age > self.ttl)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        ids: Vec<String>,
        total: u32,
    }

    fn cache() -> (Arc<MemoryStore>, PersistentCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = PersistentCache::new(store.clone(), DEFAULT_CACHE_TTL);
        (store, cache)
    }

    async fn write_aged(store: &MemoryStore, key: &CacheKey, age: chrono::Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            payload: Snapshot {
                ids: vec!["old".into()],
                total: 1,
            },
            stored_at: Utc::now() - age,
        };
        store
            .set(
                Namespace::EntityCache,
                &key.to_string(),
                serde_json::to_vec(&entry).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn set_then_get_returns_equal_value() {
        let (_, cache) = cache();
        let key = CacheKey::new("u1", "missions");
        let value = Snapshot {
            ids: vec!["m1".into(), "m2".into()],
            total: 2,
        };

        cache.set(&key, &value).await.unwrap();
        let entry = cache.get::<Snapshot>(&key).await.unwrap();

        assert_eq!(entry.payload, value);
        assert_eq!(entry.key, "u1/missions");
    }

    #[tokio::test]
    async fn set_replaces_whole_value() {
        let (_, cache) = cache();
        let key = CacheKey::new("u1", "missions");
        cache
            .set(&key, &Snapshot { ids: vec!["a".into(), "b".into()], total: 2 })
            .await
            .unwrap();
        cache
            .set(&key, &Snapshot { ids: vec!["c".into()], total: 1 })
            .await
            .unwrap();

        let entry = cache.get::<Snapshot>(&key).await.unwrap();
        assert_eq!(entry.payload.ids, vec!["c".to_owned()]);
    }

    #[tokio::test]
    async fn miss_and_garbage_are_none() {
        let (store, cache) = cache();
        let key = CacheKey::new("u1", "posts");
        assert!(cache.get::<Snapshot>(&key).await.is_none());

        store
            .set(Namespace::EntityCache, "u1/posts", b"{not json".to_vec())
            .await
            .unwrap();
        assert!(cache.get::<Snapshot>(&key).await.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_deleted() {
        let (store, cache) = cache();
        let key = CacheKey::new("u1", "missions");
        write_aged(&store, &key, chrono::Duration::days(8)).await;

        assert!(cache.get::<Snapshot>(&key).await.is_none());
        assert!(
            store
                .get(Namespace::EntityCache, "u1/missions")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let (store, cache) = cache();
        write_aged(&store, &CacheKey::new("u1", "old"), chrono::Duration::days(30)).await;
        write_aged(&store, &CacheKey::new("u1", "fresh"), chrono::Duration::hours(1)).await;

        assert_eq!(cache.sweep_expired().await.unwrap(), 1);
        assert!(cache.get::<Snapshot>(&CacheKey::new("u1", "fresh")).await.is_some());
    }

    #[tokio::test]
    async fn purge_owner_leaves_other_owners() {
        let (_, cache) = cache();
        let value = Snapshot { ids: Vec::new(), total: 0 };
        cache.set(&CacheKey::new("u1", "missions"), &value).await.unwrap();
        cache.set(&CacheKey::new("u1", "posts"), &value).await.unwrap();
        cache.set(&CacheKey::new("u10", "missions"), &value).await.unwrap();

        assert_eq!(cache.purge_owner("u1").await.unwrap(), 2);
        assert!(cache.get::<Snapshot>(&CacheKey::new("u10", "missions")).await.is_some());
    }
}
