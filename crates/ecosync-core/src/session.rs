// ── Session context ──
//
// Who is logged in, with which role, and whether the device is online.
// Created at login and dropped at logout; drives which live feeds exist.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::watch;

use crate::model::Role;

/// Network reachability as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    #[default]
    Offline,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

/// A logged-in session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub owner_id: String,
    pub role: Role,
    pub connectivity: watch::Receiver<Connectivity>,
}

impl SessionContext {
    pub fn new(
        owner_id: impl Into<String>,
        role: Role,
        connectivity: watch::Receiver<Connectivity>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            role,
            connectivity,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.borrow().is_online()
    }
}
