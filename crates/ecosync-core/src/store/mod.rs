// ── Reactive store ──
//
// The single in-memory source of truth consumers read from. Every
// setter replaces its slice of state whole, so a reader sees either the
// previous value or the new one, never a mix. Each slice is a `watch`
// channel; a revision counter bumped on every mutation drives the
// snapshot persister.

mod collection;
mod update;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::model::{
    Activity, AdminStats, Badge, CommunityPost, EntityRecord, EntityType, Farmer,
    LeaderboardEntry, LearningProgress, Mission, MissionBuckets, Notification, Settings,
    UserProfile,
};
use crate::stream::EntityStream;
use crate::subscription::RECENT_FEED_LIMIT;

use self::collection::EntityCollection;
pub use self::update::StoreUpdate;

/// The bounded subset of the store that survives restarts.
///
/// Notifications, the community feed and the admin feeds are
/// deliberately absent: they are cheap to refetch and grow unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub user_profile: Option<UserProfile>,
    #[serde(default)]
    pub active_missions: Vec<Mission>,
    #[serde(default)]
    pub badges: Vec<Badge>,
    #[serde(default)]
    pub leaderboard: Vec<LeaderboardEntry>,
    #[serde(default)]
    pub settings: Settings,
}

/// Central reactive storage for every entity the app shows.
///
/// Shared as `Arc<ReactiveStore>`; there is no global instance.
pub struct ReactiveStore {
    user_profile: watch::Sender<Option<Arc<UserProfile>>>,
    missions: watch::Sender<Arc<MissionBuckets>>,
    badges: watch::Sender<Arc<Vec<Badge>>>,
    learning_progress: EntityCollection<LearningProgress>,
    community_posts: EntityCollection<CommunityPost>,
    leaderboard: EntityCollection<LeaderboardEntry>,
    recent_farmers: EntityCollection<Farmer>,
    recent_activity: EntityCollection<Activity>,
    notifications: EntityCollection<Notification>,
    admin_stats: watch::Sender<AdminStats>,
    settings: watch::Sender<Settings>,
    owner_id: watch::Sender<Option<String>>,
    revision: watch::Sender<u64>,
}

impl Default for ReactiveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactiveStore {
    pub fn new() -> Self {
        Self {
            user_profile: watch::channel(None).0,
            missions: watch::channel(Arc::new(MissionBuckets::default())).0,
            badges: watch::channel(Arc::new(Vec::new())).0,
            learning_progress: EntityCollection::new(),
            community_posts: EntityCollection::new(),
            leaderboard: EntityCollection::new(),
            recent_farmers: EntityCollection::new(),
            recent_activity: EntityCollection::new(),
            notifications: EntityCollection::new(),
            admin_stats: watch::channel(AdminStats::default()).0,
            settings: watch::channel(Settings::default()).0,
            owner_id: watch::channel(None).0,
            revision: watch::channel(0).0,
        }
    }

    // ── Setters ──────────────────────────────────────────────────────

    /// Record which user the store's contents belong to.
    pub fn set_owner(&self, owner_id: Option<String>) {
        self.owner_id.send_replace(owner_id);
        self.bump();
    }

    pub fn set_user_profile(&self, profile: Option<UserProfile>) {
        self.user_profile.send_replace(profile.map(Arc::new));
        self.bump();
    }

    /// Classify `missions` into status buckets and publish them as one
    /// value. Missions with an unknown status are dropped.
    pub fn set_missions(&self, missions: Vec<Mission>) {
        let (buckets, dropped) = MissionBuckets::classify(missions);
        if dropped > 0 {
            debug!(dropped, "missions with unknown status dropped");
        }
        self.missions.send_replace(Arc::new(buckets));
        self.bump();
    }

    pub fn set_badges(&self, badges: Vec<Badge>) {
        self.badges.send_replace(Arc::new(badges));
        self.bump();
    }

    pub fn set_learning_progress(&self, progress: Vec<LearningProgress>) {
        self.learning_progress.replace_all(progress);
        self.bump();
    }

    pub fn set_community_posts(&self, posts: Vec<CommunityPost>) {
        self.community_posts.replace_all(posts);
        self.bump();
    }

    pub fn set_leaderboard(&self, entries: Vec<LeaderboardEntry>) {
        self.leaderboard.replace_all(entries);
        self.bump();
    }

    /// Replace the recent-farmers list and fold its size into
    /// `AdminStats::total_farmers`.
    ///
    /// The feed is capped at the newest few farmers, so the total keeps
    /// whatever the previous total had beyond that cap.
    pub fn set_recent_farmers(&self, farmers: Vec<Farmer>) {
        let len = self.recent_farmers.replace_all(farmers);
        let limit = u64::from(RECENT_FEED_LIMIT);
        self.admin_stats.send_modify(|stats| {
            let seen = u64::try_from(len).unwrap_or(u64::MAX);
            stats.total_farmers = seen.saturating_add(stats.total_farmers.saturating_sub(limit));
        });
        self.bump();
    }

    /// Replace the recent-activity list and recount pending verifications.
    pub fn set_recent_activity(&self, activity: Vec<Activity>) {
        let pending = activity
            .iter()
            .filter(|a| a.is_pending_verification())
            .count();
        self.recent_activity.replace_all(activity);
        self.admin_stats.send_modify(|stats| {
            stats.pending_verifications = u64::try_from(pending).unwrap_or(u64::MAX);
        });
        self.bump();
    }

    pub fn set_admin_stats(&self, stats: AdminStats) {
        self.admin_stats.send_replace(stats);
        self.bump();
    }

    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        self.notifications.replace_all(notifications);
        self.bump();
    }

    pub fn set_settings(&self, settings: Settings) {
        self.settings.send_replace(settings);
        self.bump();
    }

    /// Reset all user data. Settings are device preferences and survive.
    pub fn clear_all(&self) {
        self.owner_id.send_replace(None);
        self.user_profile.send_replace(None);
        self.missions.send_replace(Arc::new(MissionBuckets::default()));
        self.badges.send_replace(Arc::new(Vec::new()));
        self.learning_progress.clear();
        self.community_posts.clear();
        self.leaderboard.clear();
        self.recent_farmers.clear();
        self.recent_activity.clear();
        self.notifications.clear();
        self.admin_stats.send_replace(AdminStats::default());
        self.bump();
    }

    /// Apply one decoded feed snapshot.
    pub fn apply(&self, update: StoreUpdate) {
        debug!(feed = %update.kind(), records = update.len(), "applying store update");
        match update {
            StoreUpdate::Profile(profile) => {
                if let Some(badges) = profile.as_ref().and_then(|p| p.badges.clone()) {
                    self.set_badges(badges);
                }
                self.set_user_profile(profile);
            }
            StoreUpdate::Missions(missions) => self.set_missions(missions),
            StoreUpdate::LearningProgress(progress) => self.set_learning_progress(progress),
            StoreUpdate::CommunityPosts(posts) => self.set_community_posts(posts),
            StoreUpdate::RecentFarmers(farmers) => self.set_recent_farmers(farmers),
            StoreUpdate::RecentActivity(activity) => self.set_recent_activity(activity),
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn owner_id(&self) -> Option<String> {
        self.owner_id.borrow().clone()
    }

    pub fn user_profile(&self) -> Option<Arc<UserProfile>> {
        self.user_profile.borrow().clone()
    }

    pub fn missions(&self) -> Arc<MissionBuckets> {
        self.missions.borrow().clone()
    }

    pub fn active_missions(&self) -> Vec<Arc<Mission>> {
        self.missions.borrow().active.clone()
    }

    pub fn badges(&self) -> Arc<Vec<Badge>> {
        self.badges.borrow().clone()
    }

    pub fn learning_progress(&self) -> Arc<Vec<Arc<LearningProgress>>> {
        self.learning_progress.snapshot()
    }

    pub fn community_posts(&self) -> Arc<Vec<Arc<CommunityPost>>> {
        self.community_posts.snapshot()
    }

    pub fn leaderboard(&self) -> Arc<Vec<Arc<LeaderboardEntry>>> {
        self.leaderboard.snapshot()
    }

    pub fn recent_farmers(&self) -> Arc<Vec<Arc<Farmer>>> {
        self.recent_farmers.snapshot()
    }

    pub fn recent_activity(&self) -> Arc<Vec<Arc<Activity>>> {
        self.recent_activity.snapshot()
    }

    pub fn notifications(&self) -> Arc<Vec<Arc<Notification>>> {
        self.notifications.snapshot()
    }

    pub fn admin_stats(&self) -> AdminStats {
        *self.admin_stats.borrow()
    }

    pub fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    /// Number of mutations applied since creation.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_user_profile(&self) -> EntityStream<Option<Arc<UserProfile>>> {
        EntityStream::new(self.user_profile.subscribe())
    }

    pub fn subscribe_missions(&self) -> EntityStream<Arc<MissionBuckets>> {
        EntityStream::new(self.missions.subscribe())
    }

    pub fn subscribe_badges(&self) -> EntityStream<Arc<Vec<Badge>>> {
        EntityStream::new(self.badges.subscribe())
    }

    pub fn subscribe_learning_progress(&self) -> EntityStream<Arc<Vec<Arc<LearningProgress>>>> {
        EntityStream::new(self.learning_progress.subscribe())
    }

    pub fn subscribe_community_posts(&self) -> EntityStream<Arc<Vec<Arc<CommunityPost>>>> {
        EntityStream::new(self.community_posts.subscribe())
    }

    pub fn subscribe_leaderboard(&self) -> EntityStream<Arc<Vec<Arc<LeaderboardEntry>>>> {
        EntityStream::new(self.leaderboard.subscribe())
    }

    pub fn subscribe_recent_farmers(&self) -> EntityStream<Arc<Vec<Arc<Farmer>>>> {
        EntityStream::new(self.recent_farmers.subscribe())
    }

    pub fn subscribe_recent_activity(&self) -> EntityStream<Arc<Vec<Arc<Activity>>>> {
        EntityStream::new(self.recent_activity.subscribe())
    }

    pub fn subscribe_notifications(&self) -> EntityStream<Arc<Vec<Arc<Notification>>>> {
        EntityStream::new(self.notifications.subscribe())
    }

    pub fn subscribe_admin_stats(&self) -> EntityStream<AdminStats> {
        EntityStream::new(self.admin_stats.subscribe())
    }

    pub fn subscribe_settings(&self) -> EntityStream<Settings> {
        EntityStream::new(self.settings.subscribe())
    }

    /// Ticks on every mutation. Drives the snapshot persister.
    pub fn subscribe_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // ── Lookup ───────────────────────────────────────────────────────

    /// Find an entity by id in the in-memory state.
    pub fn find(&self, entity_type: EntityType, id: &str) -> Option<EntityRecord> {
        match entity_type {
            EntityType::Mission => self
                .missions
                .borrow()
                .find(id)
                .map(|m| EntityRecord::Mission(Mission::clone(m))),
            EntityType::UserProfile => self
                .user_profile()
                .filter(|p| p.id == id)
                .map(|p| EntityRecord::UserProfile(UserProfile::clone(&p))),
            EntityType::LearningProgress => self
                .learning_progress
                .get(id)
                .map(|l| EntityRecord::LearningProgress(LearningProgress::clone(&l))),
            EntityType::CommunityPost => self
                .community_posts
                .get(id)
                .map(|c| EntityRecord::CommunityPost(CommunityPost::clone(&c))),
            EntityType::Farmer => self
                .recent_farmers
                .get(id)
                .map(|f| EntityRecord::Farmer(Farmer::clone(&f))),
            EntityType::Activity => self
                .recent_activity
                .get(id)
                .map(|a| EntityRecord::Activity(Activity::clone(&a))),
        }
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// The bounded subset written to durable storage.
    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            owner_id: self.owner_id(),
            user_profile: self.user_profile().map(|p| UserProfile::clone(&p)),
            active_missions: self
                .active_missions()
                .iter()
                .map(|m| Mission::clone(m))
                .collect(),
            badges: Vec::clone(&self.badges()),
            leaderboard: self
                .leaderboard
                .snapshot()
                .iter()
                .map(|e| LeaderboardEntry::clone(e))
                .collect(),
            settings: self.settings(),
        }
    }

    /// Restore a persisted subset. Call before any live snapshot arrives;
    /// anything not in the subset is left untouched.
    pub fn rehydrate(&self, state: PersistedState) {
        debug!(
            owner = state.owner_id.as_deref().unwrap_or("-"),
            active_missions = state.active_missions.len(),
            "rehydrating store"
        );
        self.owner_id.send_replace(state.owner_id);
        self.user_profile
            .send_replace(state.user_profile.map(Arc::new));
        self.set_missions(state.active_missions);
        self.badges.send_replace(Arc::new(state.badges));
        self.leaderboard.replace_all(state.leaderboard);
        self.settings.send_replace(state.settings);
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }
}
