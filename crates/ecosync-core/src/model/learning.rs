// ── Learning progress domain type ──

use serde::{Deserialize, Serialize};

use super::Identified;

/// Progress of one farmer through one learning module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningProgress {
    pub id: String,
    #[serde(default)]
    pub module_id: String,
    #[serde(default)]
    pub farmer_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub score: Option<u32>,
}

impl Identified for LearningProgress {
    fn id(&self) -> &str {
        &self.id
    }
}
