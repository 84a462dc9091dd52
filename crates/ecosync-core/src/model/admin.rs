// ── Admin panel domain types ──
//
// Only privileged sessions (admin / institution) subscribe to the feeds
// that produce these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Identified;

/// A recently registered farmer (`users` where `role == farmer`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farmer {
    pub id: String,
    #[serde(default, alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub village: Option<String>,
    #[serde(default)]
    pub eco_score: u64,
    #[serde(default, with = "super::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Identified for Farmer {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A recent mission submission awaiting or past verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub mission_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, with = "super::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Activity {
    pub fn is_pending_verification(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("pending_verification")
    }
}

impl Identified for Activity {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Headline counters for the admin dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_farmers: u64,
    pub pending_verifications: u64,
    pub approved_today: u64,
    pub rejected_today: u64,
}
