// ── Typed store updates ──
//
// What a live feed hands to the store: the decoded, complete result set
// of one feed. Also the payload written to the entity cache, so a cached
// set can be replayed into the store unchanged.

use serde::{Deserialize, Serialize};

use crate::model::{
    Activity, CommunityPost, EntityRecord, EntityType, Farmer, Identified, LearningProgress,
    Mission, UserProfile,
};
use crate::subscription::FeedKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "feed", content = "records", rename_all = "kebab-case")]
pub enum StoreUpdate {
    Profile(Option<UserProfile>),
    Missions(Vec<Mission>),
    LearningProgress(Vec<LearningProgress>),
    CommunityPosts(Vec<CommunityPost>),
    RecentFarmers(Vec<Farmer>),
    RecentActivity(Vec<Activity>),
}

impl StoreUpdate {
    /// The feed this update belongs to.
    pub fn kind(&self) -> FeedKind {
        match self {
            Self::Profile(_) => FeedKind::Profile,
            Self::Missions(_) => FeedKind::Missions,
            Self::LearningProgress(_) => FeedKind::LearningProgress,
            Self::CommunityPosts(_) => FeedKind::CommunityPosts,
            Self::RecentFarmers(_) => FeedKind::RecentFarmers,
            Self::RecentActivity(_) => FeedKind::RecentActivity,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Profile(p) => usize::from(p.is_some()),
            Self::Missions(v) => v.len(),
            Self::LearningProgress(v) => v.len(),
            Self::CommunityPosts(v) => v.len(),
            Self::RecentFarmers(v) => v.len(),
            Self::RecentActivity(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scan this result set for `id` of type `entity_type`.
    pub fn find(&self, entity_type: EntityType, id: &str) -> Option<EntityRecord> {
        fn scan<T: Identified + Clone>(items: &[T], id: &str) -> Option<T> {
            items.iter().find(|item| item.id() == id).cloned()
        }

        match (self, entity_type) {
            (Self::Profile(Some(p)), EntityType::UserProfile) if p.id == id => {
                Some(EntityRecord::UserProfile(p.clone()))
            }
            (Self::Missions(v), EntityType::Mission) => scan(v, id).map(EntityRecord::Mission),
            (Self::LearningProgress(v), EntityType::LearningProgress) => {
                scan(v, id).map(EntityRecord::LearningProgress)
            }
            (Self::CommunityPosts(v), EntityType::CommunityPost) => {
                scan(v, id).map(EntityRecord::CommunityPost)
            }
            (Self::RecentFarmers(v), EntityType::Farmer) => scan(v, id).map(EntityRecord::Farmer),
            (Self::RecentActivity(v), EntityType::Activity) => {
                scan(v, id).map(EntityRecord::Activity)
            }
            _ => None,
        }
    }
}
