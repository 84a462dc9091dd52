// ── Community feed domain type ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Identified;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPost {
    pub id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "imageURL")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub likes: u32,
    #[serde(default, with = "super::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Identified for CommunityPost {
    fn id(&self) -> &str {
        &self.id
    }
}
