// ── Tagged entity records ──
//
// `EntityRecord` is what point lookups hand back: one variant per
// resolvable entity type, so callers match on a closed set instead of
// inspecting untyped documents.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::{
    Activity, CommunityPost, Farmer, Identified, LearningProgress, Mission, UserProfile,
};
use crate::subscription::FeedKind;

/// Every entity type the engine can resolve by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Mission,
    UserProfile,
    LearningProgress,
    CommunityPost,
    Farmer,
    Activity,
}

impl EntityType {
    /// The live feed whose result set contains entities of this type.
    pub fn feed(self) -> FeedKind {
        match self {
            Self::Mission => FeedKind::Missions,
            Self::UserProfile => FeedKind::Profile,
            Self::LearningProgress => FeedKind::LearningProgress,
            Self::CommunityPost => FeedKind::CommunityPosts,
            Self::Farmer => FeedKind::RecentFarmers,
            Self::Activity => FeedKind::RecentActivity,
        }
    }

    /// REST aggregate containing entities of this type: `(path, field)`.
    ///
    /// Types without an aggregate endpoint are only resolvable from
    /// memory or cache.
    pub fn aggregate(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Mission => Some(("gamification/dashboard", "missions")),
            Self::CommunityPost => Some(("community/feed", "posts")),
            Self::Farmer => Some(("admin/farmers", "farmers")),
            Self::UserProfile | Self::LearningProgress | Self::Activity => None,
        }
    }
}

/// A single resolved entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "kebab-case")]
pub enum EntityRecord {
    Mission(Mission),
    UserProfile(UserProfile),
    LearningProgress(LearningProgress),
    CommunityPost(CommunityPost),
    Farmer(Farmer),
    Activity(Activity),
}

impl EntityRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Mission(_) => EntityType::Mission,
            Self::UserProfile(_) => EntityType::UserProfile,
            Self::LearningProgress(_) => EntityType::LearningProgress,
            Self::CommunityPost(_) => EntityType::CommunityPost,
            Self::Farmer(_) => EntityType::Farmer,
            Self::Activity(_) => EntityType::Activity,
        }
    }
}

impl Identified for EntityRecord {
    fn id(&self) -> &str {
        match self {
            Self::Mission(m) => m.id(),
            Self::UserProfile(p) => p.id(),
            Self::LearningProgress(l) => l.id(),
            Self::CommunityPost(c) => c.id(),
            Self::Farmer(f) => f.id(),
            Self::Activity(a) => a.id(),
        }
    }
}
