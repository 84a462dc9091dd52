// ── User-facing domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::Identified;

// ── Role ────────────────────────────────────────────────────────────

/// Account role. Decides which feeds a session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "lowercase", from = "String")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    #[default]
    Farmer,
    Admin,
    Institution,
}

impl Role {
    /// Admins and institutions see the admin feeds.
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Admin | Self::Institution)
    }
}

impl From<String> for Role {
    /// Unknown roles fall back to the least privileged one.
    fn from(raw: String) -> Self {
        raw.trim().parse().unwrap_or_default()
    }
}

// ── Badge ───────────────────────────────────────────────────────────

/// An earned badge. Profiles store either bare badge ids or full objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BadgeRepr")]
pub struct Badge {
    pub id: String,
    pub name: String,
    #[serde(rename = "earnedAt", with = "super::timestamp")]
    pub earned_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BadgeRepr {
    Id(String),
    Full {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, rename = "earnedAt", with = "super::timestamp")]
        earned_at: Option<DateTime<Utc>>,
    },
}

impl From<BadgeRepr> for Badge {
    fn from(repr: BadgeRepr) -> Self {
        match repr {
            BadgeRepr::Id(id) => Self {
                name: id.clone(),
                id,
                earned_at: None,
            },
            BadgeRepr::Full {
                id,
                name,
                earned_at,
            } => Self {
                name: name.unwrap_or_else(|| id.clone()),
                id,
                earned_at,
            },
        }
    }
}

// ── UserProfile ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default, alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub eco_score: u64,
    /// `None` when the document carries no `badges` field, which leaves
    /// the badges already known untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badges: Option<Vec<Badge>>,
}

impl Identified for UserProfile {
    fn id(&self) -> &str {
        &self.id
    }
}

// ── Leaderboard ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub eco_score: u64,
    #[serde(default)]
    pub rank: u32,
}

impl Identified for LeaderboardEntry {
    fn id(&self) -> &str {
        &self.user_id
    }
}

// ── Notifications ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default, with = "super::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Identified for Notification {
    fn id(&self) -> &str {
        &self.id
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// Local app preferences. Persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub language: String,
    pub theme: String,
    pub notifications_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: "en".into(),
            theme: "light".into(),
            notifications_enabled: true,
        }
    }
}
