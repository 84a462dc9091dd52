// ── Tiered point lookups ──
//
// memory → entity cache → network. The first tier that has the entity
// answers; nothing is merged across tiers. The network tier only runs
// while online, is bounded by `network_timeout`, and degrades to
// `NotFound` on any failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::{CacheKey, PersistentCache};
use crate::convert;
use crate::model::{EntityRecord, EntityType};
use crate::remote::RemoteApi;
use crate::session::Connectivity;
use crate::store::{ReactiveStore, StoreUpdate};

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    Cache,
    Network,
}

/// Result of [`TieredReader::resolve_entity`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found {
        record: EntityRecord,
        tier: Tier,
        /// Set for cache hits: the value may lag the live feed.
        possibly_stale: bool,
    },
    NotFound,
}

impl Resolution {
    fn found(record: EntityRecord, tier: Tier) -> Self {
        Self::Found {
            record,
            tier,
            possibly_stale: tier == Tier::Cache,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            Self::Found { tier, .. } => Some(*tier),
            Self::NotFound => None,
        }
    }

    pub fn record(&self) -> Option<&EntityRecord> {
        match self {
            Self::Found { record, .. } => Some(record),
            Self::NotFound => None,
        }
    }

    pub fn into_record(self) -> Option<EntityRecord> {
        match self {
            Self::Found { record, .. } => Some(record),
            Self::NotFound => None,
        }
    }
}

/// Point-in-time tier counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReaderStats {
    pub memory_hits: u64,
    pub cache_hits: u64,
    pub network_hits: u64,
    pub misses: u64,
    /// Aggregate fetches attempted, hit or not.
    pub network_fetches: u64,
    /// Fetches that failed or timed out.
    pub network_errors: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    cache_hits: AtomicU64,
    network_hits: AtomicU64,
    misses: AtomicU64,
    network_fetches: AtomicU64,
    network_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReaderStats {
        ReaderStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_hits: self.network_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
        }
    }
}

/// Resolves single entities by id across memory, cache and network.
pub struct TieredReader {
    store: Arc<ReactiveStore>,
    cache: PersistentCache,
    remote: Arc<dyn RemoteApi>,
    connectivity: watch::Receiver<Connectivity>,
    network_timeout: Duration,
    counters: Counters,
}

impl TieredReader {
    pub fn new(
        store: Arc<ReactiveStore>,
        cache: PersistentCache,
        remote: Arc<dyn RemoteApi>,
        connectivity: watch::Receiver<Connectivity>,
        network_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            remote,
            connectivity,
            network_timeout,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> ReaderStats {
        self.counters.snapshot()
    }

    /// Find `id` of type `entity_type`, first hit wins.
    pub async fn resolve_entity(&self, id: &str, entity_type: EntityType) -> Resolution {
        if let Some(record) = self.store.find(entity_type, id) {
            Counters::bump(&self.counters.memory_hits);
            debug!(%entity_type, id, "resolved from memory");
            return Resolution::found(record, Tier::Memory);
        }

        // Cache and network entries are owner-scoped; no owner, no tiers.
        let owner = self.store.owner_id();

        if let Some(owner) = owner.as_deref() {
            if let Some(record) = self.from_cache(owner, entity_type, id).await {
                Counters::bump(&self.counters.cache_hits);
                debug!(%entity_type, id, "resolved from cache");
                return Resolution::found(record, Tier::Cache);
            }
        }

        if self.connectivity.borrow().is_online() {
            if let Some(record) = self.from_network(owner.as_deref(), entity_type, id).await {
                Counters::bump(&self.counters.network_hits);
                debug!(%entity_type, id, "resolved from network");
                return Resolution::found(record, Tier::Network);
            }
        }

        Counters::bump(&self.counters.misses);
        debug!(%entity_type, id, "entity not found");
        Resolution::NotFound
    }

    /// Scan the owning feed's cached set, then the last cached aggregate.
    async fn from_cache(&self, owner: &str, entity_type: EntityType, id: &str) -> Option<EntityRecord> {
        let mut keys = vec![entity_type.feed().cache_key(owner)];
        if let Some(key) = aggregate_cache_key(owner, entity_type) {
            keys.push(key);
        }

        for key in keys {
            if let Some(entry) = self.cache.get::<StoreUpdate>(&key).await {
                if let Some(record) = entry.payload.find(entity_type, id) {
                    return Some(record);
                }
            }
        }
        None
    }

    async fn from_network(
        &self,
        owner: Option<&str>,
        entity_type: EntityType,
        id: &str,
    ) -> Option<EntityRecord> {
        let (path, field) = entity_type.aggregate()?;
        Counters::bump(&self.counters.network_fetches);

        let body = match tokio::time::timeout(self.network_timeout, self.remote.fetch_aggregate(path))
            .await
        {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                Counters::bump(&self.counters.network_errors);
                warn!(path, error = %e, "aggregate fetch failed");
                return None;
            }
            Err(_) => {
                Counters::bump(&self.counters.network_errors);
                warn!(
                    path,
                    timeout_ms = u64::try_from(self.network_timeout.as_millis()).unwrap_or(u64::MAX),
                    "aggregate fetch timed out"
                );
                return None;
            }
        };

        let update = convert::decode_aggregate(entity_type.feed(), &body, field);
        let found = update.find(entity_type, id);

        if let Some(key) = owner.and_then(|owner| aggregate_cache_key(owner, entity_type)) {
            if let Err(e) = self.cache.set(&key, &update).await {
                warn!(key = %key, error = %e, "failed to cache aggregate");
            }
        }
        found
    }
}

/// Where a fetched aggregate is mirrored. Kept apart from the feed's own
/// key so an aggregate never replaces a feed's result set on priming.
fn aggregate_cache_key(owner: &str, entity_type: EntityType) -> Option<CacheKey> {
    entity_type
        .aggregate()
        .map(|(path, _)| CacheKey::new(owner, format!("aggregate:{path}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_CACHE_TTL;
    use crate::error::CoreError;
    use crate::model::Mission;
    use crate::queue::{MutationPayload, OpType};
    use crate::remote::SubmitReceipt;
    use crate::storage::MemoryStore;
    use crate::test_support::MockRemote;
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    struct Harness {
        store: Arc<ReactiveStore>,
        cache: PersistentCache,
        remote: Arc<MockRemote>,
        online: watch::Sender<Connectivity>,
        reader: TieredReader,
    }

    fn harness() -> Harness {
        let store = Arc::new(ReactiveStore::new());
        store.set_owner(Some("u1".into()));
        let cache = PersistentCache::new(Arc::new(MemoryStore::new()), DEFAULT_CACHE_TTL);
        let remote = Arc::new(MockRemote::default());
        let (online, rx) = watch::channel(Connectivity::Online);
        let reader = TieredReader::new(
            Arc::clone(&store),
            cache.clone(),
            remote.clone(),
            rx,
            Duration::from_secs(5),
        );
        Harness {
            store,
            cache,
            remote,
            online,
            reader,
        }
    }

    fn mission(id: &str, status: &str) -> Mission {
        serde_json::from_value(json!({ "id": id, "status": status, "title": id })).unwrap()
    }

    #[tokio::test]
    async fn memory_hit_short_circuits() {
        let h = harness();
        h.store.set_missions(vec![mission("m1", "active")]);
        h.remote
            .set_aggregate("gamification/dashboard", json!({ "missions": [] }));

        let resolution = h.reader.resolve_entity("m1", EntityType::Mission).await;
        assert_eq!(resolution.tier(), Some(Tier::Memory));

        let stats = h.reader.stats();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.cache_hits + stats.network_fetches, 0);
        assert_eq!(h.remote.fetches(), 0);
    }

    #[tokio::test]
    async fn cache_hit_skips_network_and_is_flagged_stale() {
        let h = harness();
        h.cache
            .set(
                &EntityType::Mission.feed().cache_key("u1"),
                &StoreUpdate::Missions(vec![mission("m2", "pending")]),
            )
            .await
            .unwrap();

        let resolution = h.reader.resolve_entity("m2", EntityType::Mission).await;
        let Resolution::Found {
            record,
            tier,
            possibly_stale,
        } = resolution
        else {
            panic!("expected a cache hit");
        };
        assert_eq!(tier, Tier::Cache);
        assert!(possibly_stale);
        assert_eq!(record, EntityRecord::Mission(mission("m2", "pending")));
        assert_eq!(h.remote.fetches(), 0);
    }

    #[tokio::test]
    async fn network_fallback_caches_the_aggregate() {
        let h = harness();
        h.remote.set_aggregate(
            "gamification/dashboard",
            json!({ "missions": [{ "id": "m3", "status": "completed" }] }),
        );

        let first = h.reader.resolve_entity("m3", EntityType::Mission).await;
        assert_eq!(first.tier(), Some(Tier::Network));
        assert_eq!(h.remote.fetches(), 1);

        // Second lookup is answered by the cached aggregate.
        let second = h.reader.resolve_entity("m3", EntityType::Mission).await;
        assert_eq!(second.tier(), Some(Tier::Cache));
        assert_eq!(h.remote.fetches(), 1);
    }

    #[tokio::test]
    async fn offline_miss_is_not_found_without_fetching() {
        let h = harness();
        h.online.send_replace(Connectivity::Offline);
        h.remote.set_aggregate(
            "gamification/dashboard",
            json!({ "missions": [{ "id": "m4", "status": "active" }] }),
        );

        let resolution = h.reader.resolve_entity("m4", EntityType::Mission).await;
        assert_eq!(resolution, Resolution::NotFound);
        assert_eq!(h.remote.fetches(), 0);
        assert_eq!(h.reader.stats().misses, 1);
    }

    #[tokio::test]
    async fn types_without_aggregate_never_hit_network() {
        let h = harness();
        let resolution = h
            .reader
            .resolve_entity("l1", EntityType::LearningProgress)
            .await;
        assert!(!resolution.is_found());
        assert_eq!(h.remote.fetches(), 0);
    }

    #[tokio::test]
    async fn fetch_error_degrades_to_not_found() {
        let h = harness();
        // No aggregate registered: the mock answers 404.
        let resolution = h.reader.resolve_entity("p1", EntityType::CommunityPost).await;
        assert_eq!(resolution, Resolution::NotFound);
        assert_eq!(h.reader.stats().network_errors, 1);
    }

    struct StalledRemote;

    impl RemoteApi for StalledRemote {
        fn submit<'a>(
            &'a self,
            _op_type: OpType,
            _payload: &'a MutationPayload,
            _key: &'a str,
        ) -> BoxFuture<'a, Result<SubmitReceipt, CoreError>> {
            futures_util::future::pending().boxed()
        }

        fn fetch_aggregate<'a>(&'a self, _path: &'a str) -> BoxFuture<'a, Result<Value, CoreError>> {
            futures_util::future::pending().boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn network_timeout_degrades_to_not_found() {
        let store = Arc::new(ReactiveStore::new());
        let cache = PersistentCache::new(Arc::new(MemoryStore::new()), DEFAULT_CACHE_TTL);
        let (_online, rx) = watch::channel(Connectivity::Online);
        let reader = TieredReader::new(
            store,
            cache,
            Arc::new(StalledRemote),
            rx,
            Duration::from_secs(3),
        );

        let resolution = reader.resolve_entity("f1", EntityType::Farmer).await;
        assert_eq!(resolution, Resolution::NotFound);
        assert_eq!(reader.stats().network_errors, 1);
    }
}
