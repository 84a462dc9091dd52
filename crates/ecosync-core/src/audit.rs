// ── Offline audit log ──
//
// Append-only trail of what happened to queued writes: queued, merged
// into an identical pending write, delivered, retried, failed, discarded.
// Entries live in the `offline-log` namespace under time-ordered keys.
// Writing an entry never fails the queue operation that caused it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::queue::{OpType, QueuedMutation};
use crate::storage::{DurableStore, Namespace};

/// Entries kept after [`AuditLog::trim`].
pub const DEFAULT_AUDIT_RETENTION: usize = 1_000;

/// What happened to a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Queued,
    /// An identical pending write already existed; nothing was added.
    Merged,
    Delivered,
    Retrying,
    Failed,
    Retried,
    Discarded,
    /// Returned to PENDING after an interrupted delivery.
    Recovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub mutation_id: Uuid,
    pub op_type: OpType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.mutation_id.simple().to_string();
        write!(f, "{} {} (ID: {})", self.action, self.op_type, &id[..8])?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// Handle on the `offline-log` namespace.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn DurableStore>,
    /// Last key timestamp handed out, in microseconds.
    last_micros: Arc<AtomicI64>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            last_micros: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Append an entry for `record`. Failures are logged and swallowed.
    pub async fn record(&self, action: AuditAction, record: &QueuedMutation, detail: Option<&str>) {
        let at = Utc::now();
        let entry = AuditEntry {
            at,
            action,
            mutation_id: record.id,
            op_type: record.op_type,
            detail: detail.map(ToOwned::to_owned),
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode audit entry");
                return;
            }
        };

        let key = format!("{:020}", self.next_micros(at.timestamp_micros()));
        match self.store.set(Namespace::OfflineLog, &key, bytes).await {
            Ok(()) => debug!(%action, id = %record.id, "audit entry written"),
            Err(e) => warn!(%action, id = %record.id, error = %e, "failed to write audit entry"),
        }
    }

    /// The newest `limit` entries (all when `None`), oldest first.
    /// Undecodable entries are skipped.
    pub async fn entries(&self, limit: Option<usize>) -> Result<Vec<AuditEntry>, CoreError> {
        let keys = self.sorted_keys().await?;
        let skip = limit.map_or(0, |limit| keys.len().saturating_sub(limit));

        let mut entries = Vec::with_capacity(keys.len() - skip);
        for key in &keys[skip..] {
            let Some(bytes) = self.store.get(Namespace::OfflineLog, key).await? else {
                continue;
            };
            match serde_json::from_slice(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(key, error = %e, "skipping undecodable audit entry"),
            }
        }
        Ok(entries)
    }

    /// Delete all but the newest `keep` entries. Returns how many went.
    pub async fn trim(&self, keep: usize) -> Result<usize, CoreError> {
        let keys = self.sorted_keys().await?;
        let excess = keys.len().saturating_sub(keep);
        for key in &keys[..excess] {
            self.store.delete(Namespace::OfflineLog, key).await?;
        }
        if excess > 0 {
            debug!(removed = excess, "audit log trimmed");
        }
        Ok(excess)
    }

    /// Delete every entry.
    pub async fn clear(&self) -> Result<usize, CoreError> {
        self.trim(0).await
    }

    async fn sorted_keys(&self) -> Result<Vec<String>, CoreError> {
        let mut keys = self.store.keys(Namespace::OfflineLog).await?;
        keys.sort_unstable();
        Ok(keys)
    }

    /// `now`, nudged forward so keys stay unique and ordered within a
    /// process.
    fn next_micros(&self, now: i64) -> i64 {
        let previous = self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }
}
