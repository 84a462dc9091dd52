// ── Unified domain model ──
//
// Every type in this module is the canonical, typed representation of a
// document delivered by the remote document store. Raw documents are
// validated into these types at the feed boundary (see `convert`), so
// the store, cache and reader only ever handle well-formed records.

pub mod admin;
pub mod community;
pub mod learning;
pub mod mission;
pub mod record;
pub mod timestamp;
pub mod user;

// ── Re-exports ──────────────────────────────────────────────────────

pub use admin::{Activity, AdminStats, Farmer};
pub use community::CommunityPost;
pub use learning::LearningProgress;
pub use mission::{Mission, MissionBucket, MissionBuckets};
pub use record::{EntityRecord, EntityType};
pub use user::{Badge, LeaderboardEntry, Notification, Role, Settings, UserProfile};

/// Anything addressable by a document id.
pub trait Identified {
    fn id(&self) -> &str;
}
