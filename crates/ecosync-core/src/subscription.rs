// ── Live subscription management ──
//
// Owns every live feed of the current session. Each feed runs as its own
// task: it primes the store from the entity cache, then forwards every
// decoded snapshot to the store-applier task and mirrors it into the
// cache. Logout tears all feeds down in one pass; deliveries that race
// the teardown are dropped by the applier, which checks the session's
// `torn_down` flag captured at subscribe time. Cache mirroring happens
// under a shared gate so `settle` can wait out a write that started
// before teardown; nothing reaches the cache once it returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use strum::{AsRefStr, Display, EnumIter};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ecosync_api::{FeedEvent, FeedQuery};

use crate::cache::{CacheKey, PersistentCache};
use crate::convert;
use crate::error::CoreError;
use crate::model::Role;
use crate::remote::FeedSource;
use crate::session::SessionContext;
use crate::store::{ReactiveStore, StoreUpdate};

/// Size cap of the admin "recent" feeds.
pub const RECENT_FEED_LIMIT: u32 = 5;

/// Size cap of the user's own community post feed.
const OWN_POSTS_LIMIT: u32 = 20;

// ── Feed catalogue ───────────────────────────────────────────────────

/// Every live feed a session can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum FeedKind {
    /// `users/{owner}`: profile and badges.
    Profile,
    /// `user_missions` where `userId == owner`.
    Missions,
    /// `learningProgress` where `farmerId == owner`.
    LearningProgress,
    /// `communityPosts` where `authorId == owner`, newest first.
    CommunityPosts,
    /// `users` where `role == farmer`, newest first. Privileged only.
    RecentFarmers,
    /// `user_missions` awaiting or past verification. Privileged only.
    RecentActivity,
}

impl FeedKind {
    /// Remote collection the feed reads.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Profile | Self::RecentFarmers => "users",
            Self::Missions | Self::RecentActivity => "user_missions",
            Self::LearningProgress => "learningProgress",
            Self::CommunityPosts => "communityPosts",
        }
    }

    /// Whether the feed is filtered down to the session owner.
    pub fn is_owner_scoped(self) -> bool {
        !self.is_privileged()
    }

    /// Whether only admins and institutions may open the feed.
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::RecentFarmers | Self::RecentActivity)
    }

    /// The remote query for this feed on behalf of `owner`.
    pub fn query(self, owner: &str) -> FeedQuery {
        match self {
            Self::Profile => FeedQuery::document(self.collection(), owner),
            Self::Missions => FeedQuery::collection(self.collection()).where_eq("userId", owner),
            Self::LearningProgress => {
                FeedQuery::collection(self.collection()).where_eq("farmerId", owner)
            }
            Self::CommunityPosts => FeedQuery::collection(self.collection())
                .where_eq("authorId", owner)
                .order_by_desc("createdAt")
                .limit(OWN_POSTS_LIMIT),
            Self::RecentFarmers => FeedQuery::collection(self.collection())
                .where_eq("role", "farmer")
                .order_by_desc("createdAt")
                .limit(RECENT_FEED_LIMIT),
            Self::RecentActivity => FeedQuery::collection(self.collection())
                .where_in("status", ["pending_verification", "completed"])
                .order_by_desc("updatedAt")
                .limit(RECENT_FEED_LIMIT),
        }
    }

    /// The feeds a session with `role` opens at login.
    pub fn standard(role: Role) -> Vec<Self> {
        let mut feeds = vec![
            Self::Profile,
            Self::Missions,
            Self::LearningProgress,
            Self::CommunityPosts,
        ];
        if role.is_privileged() {
            feeds.extend([Self::RecentFarmers, Self::RecentActivity]);
        }
        feeds
    }

    /// Cache key under which this feed's last result set is mirrored.
    pub fn cache_key(self, owner: &str) -> CacheKey {
        CacheKey::new(owner, self.as_ref())
    }
}

// ── Handles ──────────────────────────────────────────────────────────

/// Identity of a live subscription: at most one per key per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub feed: FeedKind,
    /// Owner the feed is filtered to; `None` for unscoped admin feeds.
    pub owner_filter: Option<String>,
}

/// Caller-side handle of a live subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// One decoded snapshot on its way to the store.
#[derive(Debug)]
pub(crate) struct FeedDelivery {
    pub(crate) update: StoreUpdate,
    torn_down: Arc<AtomicBool>,
}

impl FeedDelivery {
    /// Apply to `store` unless the session that produced it has ended.
    pub(crate) fn apply_to(self, store: &ReactiveStore) -> bool {
        if self.torn_down.load(Ordering::Acquire) {
            debug!(feed = %self.update.kind(), "dropping delivery from ended session");
            return false;
        }
        store.apply(self.update);
        true
    }
}

// ── Manager ──────────────────────────────────────────────────────────

struct ActiveSession {
    owner_id: String,
    role: Role,
    torn_down: Arc<AtomicBool>,
    cancel: CancellationToken,
    subscriptions: HashMap<SubscriptionKey, SubscriptionHandle>,
}

/// Opens, deduplicates and tears down the live feeds of a session.
pub struct SubscriptionManager {
    feeds: Arc<dyn FeedSource>,
    cache: PersistentCache,
    updates: mpsc::Sender<FeedDelivery>,
    session: Mutex<Option<ActiveSession>>,
    /// Held shared by every cache mirror write, exclusively by `settle`.
    cache_gate: Arc<RwLock<()>>,
}

impl SubscriptionManager {
    pub(crate) fn new(
        feeds: Arc<dyn FeedSource>,
        cache: PersistentCache,
        updates: mpsc::Sender<FeedDelivery>,
    ) -> Self {
        Self {
            feeds,
            cache,
            updates,
            session: Mutex::new(None),
            cache_gate: Arc::new(RwLock::new(())),
        }
    }

    /// Open the standard feeds for `ctx`. Idempotent for the same owner;
    /// a different owner ends the previous session first.
    pub fn start_session(&self, ctx: &SessionContext) -> Result<Vec<SubscriptionHandle>, CoreError> {
        {
            let mut guard = self.lock();
            if let Some(active) = guard.as_ref() {
                if active.owner_id == ctx.owner_id && active.role == ctx.role {
                    debug!(owner = %ctx.owner_id, "session already active");
                    return Ok(active.subscriptions.values().cloned().collect());
                }
            }
            if let Some(previous) = guard.take() {
                Self::tear_down(previous);
            }
            *guard = Some(ActiveSession {
                owner_id: ctx.owner_id.clone(),
                role: ctx.role,
                torn_down: Arc::new(AtomicBool::new(false)),
                cancel: CancellationToken::new(),
                subscriptions: HashMap::new(),
            });
        }

        info!(owner = %ctx.owner_id, role = %ctx.role, "starting live session");
        FeedKind::standard(ctx.role)
            .into_iter()
            .map(|feed| self.subscribe(feed))
            .collect()
    }

    /// Open `feed` for the current session. Returns the existing handle
    /// if the feed is already open.
    pub fn subscribe(&self, feed: FeedKind) -> Result<SubscriptionHandle, CoreError> {
        let mut guard = self.lock();
        let session = guard.as_mut().ok_or(CoreError::NoSession)?;

        if feed.is_privileged() && !session.role.is_privileged() {
            return Err(CoreError::ValidationFailed {
                message: format!("{feed} feed requires an admin or institution role"),
            });
        }

        let key = SubscriptionKey {
            feed,
            owner_filter: feed
                .is_owner_scoped()
                .then(|| session.owner_id.clone()),
        };
        if let Some(existing) = session.subscriptions.get(&key) {
            return Ok(existing.clone());
        }

        let cancel = session.cancel.child_token();
        let events = self
            .feeds
            .open(feed.query(&session.owner_id), cancel.clone());

        let task = FeedTask {
            feed,
            cache_key: feed.cache_key(&session.owner_id),
            events,
            updates: self.updates.clone(),
            cache: self.cache.clone(),
            torn_down: Arc::clone(&session.torn_down),
            cache_gate: Arc::clone(&self.cache_gate),
            cancel: cancel.clone(),
        };
        // Detached: the task ends when its token is cancelled.
        tokio::spawn(task.run());

        let handle = SubscriptionHandle { key: key.clone(), cancel };
        session.subscriptions.insert(key, handle.clone());
        debug!(%feed, owner = %session.owner_id, "live feed opened");
        Ok(handle)
    }

    /// Tear down every feed of the current session in one pass. Returns
    /// how many feeds were closed.
    pub fn unsubscribe_all(&self) -> usize {
        let Some(session) = self.lock().take() else {
            return 0;
        };
        Self::tear_down(session)
    }

    /// Wait for cache writes already under way. Feeds of a torn-down
    /// session write nothing more after this returns.
    pub async fn settle(&self) {
        drop(self.cache_gate.write().await);
    }

    /// Owner of the current session, if any.
    pub fn current_owner(&self) -> Option<String> {
        self.lock().as_ref().map(|s| s.owner_id.clone())
    }

    /// Keys of every open feed.
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.lock()
            .as_ref()
            .map(|s| s.subscriptions.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn tear_down(session: ActiveSession) -> usize {
        // Flag first: anything already in flight is dropped by the applier.
        session.torn_down.store(true, Ordering::Release);
        session.cancel.cancel();
        let closed = session.subscriptions.len();
        info!(owner = %session.owner_id, closed, "live session torn down");
        closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Feed task ────────────────────────────────────────────────────────

struct FeedTask {
    feed: FeedKind,
    cache_key: CacheKey,
    events: mpsc::Receiver<FeedEvent>,
    updates: mpsc::Sender<FeedDelivery>,
    cache: PersistentCache,
    torn_down: Arc<AtomicBool>,
    cache_gate: Arc<RwLock<()>>,
    cancel: CancellationToken,
}

impl FeedTask {
    async fn run(mut self) {
        self.prime_from_cache().await;

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = self.events.recv() => event,
            };

            match event {
                Some(FeedEvent::Snapshot(documents)) => {
                    if self.torn_down.load(Ordering::Acquire) {
                        break;
                    }
                    let update = convert::decode_snapshot(self.feed, documents);
                    if !self.deliver(update.clone()).await {
                        break;
                    }
                    let _gate = self.cache_gate.read().await;
                    if self.torn_down.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(e) = self.cache.set(&self.cache_key, &update).await {
                        warn!(feed = %self.feed, error = %e, "failed to mirror snapshot to cache");
                    }
                }
                Some(FeedEvent::Error(message)) => {
                    // The feed client reconnects on its own.
                    warn!(feed = %self.feed, error = %message, "live feed error");
                }
                None => break,
            }
        }

        debug!(feed = %self.feed, "feed task exiting");
    }

    /// Publish the cached result set, if any, ahead of the first live one.
    async fn prime_from_cache(&self) {
        let Some(entry) = self.cache.get::<StoreUpdate>(&self.cache_key).await else {
            return;
        };
        if entry.payload.kind() != self.feed {
            warn!(feed = %self.feed, key = %self.cache_key, "cache entry is for another feed");
            return;
        }
        debug!(
            feed = %self.feed,
            records = entry.payload.len(),
            stored_at = %entry.stored_at,
            "priming store from cache"
        );
        self.deliver(entry.payload).await;
    }

    async fn deliver(&self, update: StoreUpdate) -> bool {
        let delivery = FeedDelivery {
            update,
            torn_down: Arc::clone(&self.torn_down),
        };
        self.updates.send(delivery).await.is_ok()
    }
}

/// Single consumer of feed deliveries: applies them to the store in
/// arrival order until cancelled or every sender is gone.
pub(crate) async fn store_applier_task(
    store: Arc<ReactiveStore>,
    mut deliveries: mpsc::Receiver<FeedDelivery>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            delivery = deliveries.recv() => {
                let Some(delivery) = delivery else { break };
                delivery.apply_to(&store);
            }
        }
    }
    debug!("store applier exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::DEFAULT_CACHE_TTL;
    use crate::model::Mission;
    use crate::session::Connectivity;
    use crate::storage::MemoryStore;
    use crate::test_support::{HeldStore, MockFeeds, doc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::watch;

    struct Harness {
        feeds: Arc<MockFeeds>,
        cache: PersistentCache,
        manager: SubscriptionManager,
        rx: mpsc::Receiver<FeedDelivery>,
    }

    fn harness() -> Harness {
        let feeds = Arc::new(MockFeeds::default());
        let cache = PersistentCache::new(Arc::new(MemoryStore::new()), DEFAULT_CACHE_TTL);
        let (tx, rx) = mpsc::channel(16);
        let manager = SubscriptionManager::new(feeds.clone(), cache.clone(), tx);
        Harness {
            feeds,
            cache,
            manager,
            rx,
        }
    }

    fn session(owner: &str, role: Role) -> SessionContext {
        let (_tx, rx) = watch::channel(Connectivity::Online);
        SessionContext::new(owner, role, rx)
    }

    async fn next_delivery(rx: &mut mpsc::Receiver<FeedDelivery>) -> FeedDelivery {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn farmer_session_opens_four_feeds() {
        let h = harness();
        let handles = h.manager.start_session(&session("u1", Role::Farmer)).unwrap();
        assert_eq!(handles.len(), 4);
        assert_eq!(h.feeds.opened().len(), 4);
        assert!(
            h.manager
                .active_keys()
                .iter()
                .all(|k| k.owner_filter.as_deref() == Some("u1"))
        );
    }

    #[tokio::test]
    async fn admin_session_adds_admin_feeds() {
        let h = harness();
        let handles = h.manager.start_session(&session("a1", Role::Admin)).unwrap();
        assert_eq!(handles.len(), 6);

        let activity = h
            .feeds
            .opened()
            .into_iter()
            .find(|q| q.filters.iter().any(|f| f.field == "status"))
            .unwrap();
        assert_eq!(activity.limit, Some(RECENT_FEED_LIMIT));
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_per_key() {
        let h = harness();
        h.manager.start_session(&session("u1", Role::Farmer)).unwrap();
        h.manager.subscribe(FeedKind::Missions).unwrap();
        h.manager.subscribe(FeedKind::Missions).unwrap();
        h.manager.start_session(&session("u1", Role::Farmer)).unwrap();

        assert_eq!(h.feeds.opened().len(), 4);
        assert_eq!(h.manager.active_keys().len(), 4);
    }

    #[tokio::test]
    async fn farmer_cannot_open_admin_feed() {
        let h = harness();
        h.manager.start_session(&session("u1", Role::Farmer)).unwrap();
        assert!(h.manager.subscribe(FeedKind::RecentFarmers).is_err());
    }

    #[tokio::test]
    async fn subscribe_without_session_fails() {
        let h = harness();
        assert!(matches!(
            h.manager.subscribe(FeedKind::Profile),
            Err(CoreError::NoSession)
        ));
    }

    #[tokio::test]
    async fn snapshot_is_delivered_and_cached() {
        let mut h = harness();
        h.manager.start_session(&session("u1", Role::Farmer)).unwrap();

        h.feeds
            .push(
                "user_missions",
                vec![doc("m1", json!({ "status": "active", "userId": "u1" }))],
            )
            .await;

        let delivery = next_delivery(&mut h.rx).await;
        assert!(matches!(&delivery.update, StoreUpdate::Missions(m) if m.len() == 1));

        // The cache write happens right after the delivery.
        let key = FeedKind::Missions.cache_key("u1");
        let mut cached = None;
        for _ in 0..50 {
            cached = h.cache.get::<StoreUpdate>(&key).await;
            if cached.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cached.unwrap().payload, delivery.update);
    }

    #[tokio::test]
    async fn cached_set_primes_before_live_snapshot() {
        let mut h = harness();
        let cached = StoreUpdate::Missions(vec![Mission {
            id: "cached".into(),
            mission_id: None,
            user_id: Some("u1".into()),
            title: String::new(),
            status: "active".into(),
            points: 0,
            category: None,
            updated_at: None,
        }]);
        h.cache
            .set(&FeedKind::Missions.cache_key("u1"), &cached)
            .await
            .unwrap();

        h.manager.start_session(&session("u1", Role::Farmer)).unwrap();
        let delivery = next_delivery(&mut h.rx).await;
        assert_eq!(delivery.update, cached);
    }

    #[tokio::test]
    async fn teardown_cancels_feeds_and_drops_late_deliveries() {
        let h = harness();
        let handles = h.manager.start_session(&session("u1", Role::Farmer)).unwrap();

        let late = FeedDelivery {
            update: StoreUpdate::Missions(Vec::new()),
            torn_down: Arc::clone(&h.manager.lock().as_ref().unwrap().torn_down),
        };

        assert_eq!(h.manager.unsubscribe_all(), 4);
        assert!(handles.iter().all(|h| !h.is_active()));
        assert!(h.manager.active_keys().is_empty());
        assert!(h.manager.current_owner().is_none());

        let store = ReactiveStore::new();
        let before = store.revision();
        assert!(!late.apply_to(&store));
        assert_eq!(store.revision(), before);
    }

    #[tokio::test]
    async fn settle_outlasts_a_cache_write_begun_before_teardown() {
        let durable = Arc::new(HeldStore::new());
        let cache = PersistentCache::new(durable.clone(), DEFAULT_CACHE_TTL);
        let feeds = Arc::new(MockFeeds::default());
        let (tx, mut rx) = mpsc::channel(16);
        let manager = Arc::new(SubscriptionManager::new(feeds.clone(), cache.clone(), tx));
        manager.start_session(&session("u1", Role::Farmer)).unwrap();

        durable.hold();
        feeds
            .push(
                "user_missions",
                vec![doc("m1", json!({ "status": "active", "userId": "u1" }))],
            )
            .await;
        next_delivery(&mut rx).await;
        tokio::time::timeout(Duration::from_secs(5), durable.entered())
            .await
            .unwrap();

        // Logout while the mirror write is parked in the store.
        manager.unsubscribe_all();
        let settled = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.settle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!settled.is_finished());

        durable.release();
        tokio::time::timeout(Duration::from_secs(5), settled)
            .await
            .unwrap()
            .unwrap();

        cache.purge_owner("u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            cache
                .get::<StoreUpdate>(&FeedKind::Missions.cache_key("u1"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn new_owner_replaces_session() {
        let h = harness();
        let first = h.manager.start_session(&session("u1", Role::Farmer)).unwrap();
        h.manager.start_session(&session("u2", Role::Farmer)).unwrap();

        assert!(first.iter().all(|h| !h.is_active()));
        assert_eq!(h.manager.current_owner().as_deref(), Some("u2"));
        assert_eq!(h.feeds.opened().len(), 8);
    }
}
