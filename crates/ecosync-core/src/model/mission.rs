// ── Mission domain types ──
//
// A mission assignment (`user_missions` document) plus the bucketed
// view the store exposes: every mission with a known status lands in
// exactly one of active / pending / completed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::Identified;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: String,
    /// The catalogue mission this assignment refers to.
    #[serde(default)]
    pub mission_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: String,
    /// Raw status as written by the backend. Use [`Mission::bucket`] to
    /// classify it.
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "ecoPoints")]
    pub points: u32,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, with = "super::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Mission {
    /// Classify the mission's status, or `None` if it is not one the
    /// app knows how to show.
    pub fn bucket(&self) -> Option<MissionBucket> {
        MissionBucket::classify(&self.status)
    }
}

impl Identified for Mission {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Which status bucket a mission belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MissionBucket {
    Active,
    Pending,
    Completed,
}

impl MissionBucket {
    /// Map a raw status string to its bucket (trimmed, case-insensitive).
    pub fn classify(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "pending" => Some(Self::Pending),
            "completed" | "verified" | "submitted" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Missions partitioned by status bucket.
///
/// Built in one pass from a full mission set and published as a unit, so
/// readers never observe a mission in two buckets or a half-applied set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissionBuckets {
    pub active: Vec<Arc<Mission>>,
    pub pending: Vec<Arc<Mission>>,
    pub completed: Vec<Arc<Mission>>,
}

impl MissionBuckets {
    /// Partition `missions` by status. Returns the buckets and the number
    /// of missions dropped for having an unknown status.
    pub fn classify(missions: impl IntoIterator<Item = Mission>) -> (Self, usize) {
        let mut buckets = Self::default();
        let mut dropped = 0;

        for mission in missions {
            match mission.bucket() {
                Some(MissionBucket::Active) => buckets.active.push(Arc::new(mission)),
                Some(MissionBucket::Pending) => buckets.pending.push(Arc::new(mission)),
                Some(MissionBucket::Completed) => buckets.completed.push(Arc::new(mission)),
                None => dropped += 1,
            }
        }

        (buckets, dropped)
    }

    pub fn bucket(&self, bucket: MissionBucket) -> &[Arc<Mission>] {
        match bucket {
            MissionBucket::Active => &self.active,
            MissionBucket::Pending => &self.pending,
            MissionBucket::Completed => &self.completed,
        }
    }

    /// Iterate every classified mission, bucket by bucket.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Mission>> {
        self.active
            .iter()
            .chain(self.pending.iter())
            .chain(self.completed.iter())
    }

    pub fn find(&self, id: &str) -> Option<&Arc<Mission>> {
        self.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.pending.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mission(id: &str, status: &str) -> Mission {
        Mission {
            id: id.into(),
            mission_id: None,
            user_id: Some("u1".into()),
            title: format!("Mission {id}"),
            status: status.into(),
            points: 10,
            category: None,
            updated_at: None,
        }
    }

    #[test]
    fn classify_status_aliases() {
        assert_eq!(MissionBucket::classify(" Active "), Some(MissionBucket::Active));
        assert_eq!(MissionBucket::classify("PENDING"), Some(MissionBucket::Pending));
        for done in ["completed", "Verified", "submitted"] {
            assert_eq!(MissionBucket::classify(done), Some(MissionBucket::Completed));
        }
        assert_eq!(MissionBucket::classify("pending_verification"), None);
        assert_eq!(MissionBucket::classify(""), None);
    }

    #[test]
    fn buckets_partition_known_statuses() {
        let (buckets, dropped) = MissionBuckets::classify(vec![
            mission("1", "active"),
            mission("2", "pending"),
            mission("3", "completed"),
            mission("4", "archived"),
        ]);

        let ids = |b: &[Arc<Mission>]| b.iter().map(|m| m.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&buckets.active), vec!["1"]);
        assert_eq!(ids(&buckets.pending), vec!["2"]);
        assert_eq!(ids(&buckets.completed), vec!["3"]);
        assert_eq!(dropped, 1);
        assert_eq!(buckets.len(), 3);
        assert!(buckets.find("4").is_none());
    }

    #[test]
    fn decodes_backend_field_names() {
        let raw = serde_json::json!({
            "id": "um-1",
            "missionId": "m-9",
            "userId": "u1",
            "title": "Compost pit",
            "status": "active",
            "ecoPoints": 40,
            "updatedAt": "2024-05-02T08:30:00Z"
        });
        let m: Mission = serde_json::from_value(raw).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(m.mission_id.as_deref(), Some("m-9"));
        assert_eq!(m.points, 40);
        assert!(m.updated_at.is_some());
    }
}
