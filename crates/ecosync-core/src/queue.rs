// ── Durable mutation queue ──
//
// Writes attempted while offline (or that failed transiently) are
// persisted here and replayed by the drainer once connectivity returns.
// Every state change is written through to the `mutation-queue`
// namespace before the call returns, so a crash never loses a record.
//
// Ordering is (priority asc, created_at asc, id asc). `created_at` is
// made strictly monotonic per queue so two records enqueued in the same
// instant keep their enqueue order.
//
// Payloads are sealed with a `PayloadCipher` before they touch storage;
// the rest of the record stays readable. Each record also carries the
// SHA-256 of its parameters so a write repeated while the first copy is
// still pending is merged instead of sent twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLog};
use crate::crypto::{PayloadCipher, params_hash};
use crate::error::CoreError;
use crate::storage::{DurableStore, Namespace};

/// Default storage quota across all namespaces (500 MB).
pub const DEFAULT_STORAGE_QUOTA_BYTES: u64 = 500 * 1024 * 1024;

/// Usage ratio at which enqueue starts warning.
const QUOTA_WARN_RATIO: f64 = 0.9;

// ── Priority ─────────────────────────────────────────────────────────

/// Lower is more urgent.
pub type Priority = u8;

/// The kind of write a queued mutation replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum OpType {
    DisasterReport,
    MissionProof,
    TicketCreate,
    CommunityPost,
    Log,
}

impl OpType {
    /// Default priority: safety reports first, background logs last.
    pub fn default_priority(self) -> Priority {
        match self {
            Self::DisasterReport => 1,
            Self::MissionProof => 2,
            Self::TicketCreate => 3,
            Self::CommunityPost => 4,
            Self::Log => 5,
        }
    }

    /// Whether an identical PENDING write of this type absorbs a new one.
    /// Log events are distinct occurrences even when their bodies match.
    pub fn merges_duplicates(self) -> bool {
        !matches!(self, Self::Log)
    }
}

// ── Payload ──────────────────────────────────────────────────────────

/// A binary file carried inside a queued payload.
///
/// Stored base64-encoded so the whole record stays one JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    #[serde(serialize_with = "encode_bytes", deserialize_with = "decode_bytes")]
    pub data: Bytes,
}

fn encode_bytes<S: Serializer>(data: &Bytes, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&BASE64.encode(data))
}

fn decode_bytes<'de, D: Deserializer<'de>>(de: D) -> Result<Bytes, D::Error> {
    let raw = String::deserialize(de)?;
    BASE64
        .decode(raw.as_bytes())
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

/// What a queued mutation sends: a JSON body plus an optional file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MutationPayload {
    pub body: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl MutationPayload {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            body,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// A string field of the JSON body, if present and non-empty.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.body
            .get(name)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

// ── Record ───────────────────────────────────────────────────────────

/// Lifecycle of a queued mutation.
///
/// SUCCESS is never stored: a confirmed record is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStatus {
    Pending,
    InFlight,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: Uuid,
    pub op_type: OpType,
    pub payload: MutationPayload,
    /// Hex SHA-256 of the payload, fixed at enqueue.
    #[serde(default)]
    pub params_hash: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: MutationStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedMutation {
    fn order_key(&self) -> (Priority, DateTime<Utc>, Uuid) {
        (self.priority, self.created_at, self.id)
    }
}

impl fmt::Display for QueuedMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (p{}, {}, attempts {})",
            self.id, self.op_type, self.priority, self.status, self.attempts
        )
    }
}

/// Record counts by status, for a "pending sync" badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.failed
    }
}

// ── Queue ────────────────────────────────────────────────────────────

struct QueueState {
    records: HashMap<Uuid, QueuedMutation>,
    last_created_at: Option<DateTime<Utc>>,
}

/// Durable, priority-ordered queue of pending writes.
pub struct MutationQueue {
    store: Arc<dyn DurableStore>,
    cipher: PayloadCipher,
    audit: AuditLog,
    max_attempts: u32,
    quota_bytes: u64,
    /// Held across the durable write so in-memory and on-disk state
    /// change together.
    state: Mutex<QueueState>,
    counts: watch::Sender<QueueCounts>,
}

impl MutationQueue {
    /// [`open_with_cipher`](Self::open_with_cipher) under the default
    /// queue secret.
    pub async fn open(
        store: Arc<dyn DurableStore>,
        max_attempts: u32,
        quota_bytes: u64,
    ) -> Result<Self, CoreError> {
        Self::open_with_cipher(store, PayloadCipher::default(), max_attempts, quota_bytes).await
    }

    /// Load every stored record. Records that cannot be decoded or
    /// opened with `cipher` are logged and skipped (left on disk for
    /// inspection).
    pub async fn open_with_cipher(
        store: Arc<dyn DurableStore>,
        cipher: PayloadCipher,
        max_attempts: u32,
        quota_bytes: u64,
    ) -> Result<Self, CoreError> {
        let mut records = HashMap::new();
        for key in store.keys(Namespace::MutationQueue).await? {
            let Some(bytes) = store.get(Namespace::MutationQueue, &key).await? else {
                continue;
            };
            match unseal_record(&cipher, &bytes) {
                Ok(record) => {
                    records.insert(record.id, record);
                }
                Err(e) => warn!(key, error = %e, "skipping unreadable queue record"),
            }
        }

        let last_created_at = records.values().map(|r| r.created_at).max();
        let counts = count(&records);
        info!(
            pending = counts.pending,
            in_flight = counts.in_flight,
            failed = counts.failed,
            "mutation queue opened"
        );

        let (counts, _) = watch::channel(counts);
        Ok(Self {
            audit: AuditLog::new(Arc::clone(&store)),
            store,
            cipher,
            max_attempts: max_attempts.max(1),
            quota_bytes,
            state: Mutex::new(QueueState {
                records,
                last_created_at,
            }),
            counts,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The audit trail of this queue's activity.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Observe record counts.
    pub fn subscribe_counts(&self) -> watch::Receiver<QueueCounts> {
        self.counts.subscribe()
    }

    // ── Enqueue ──────────────────────────────────────────────────────

    /// Durably add a write. `priority` defaults to the op type's.
    ///
    /// Returns only after the record is persisted; a storage failure
    /// (including [`CoreError::StorageFull`]) is returned, never dropped.
    /// When an identical write is already PENDING (see
    /// [`OpType::merges_duplicates`]), its id is returned and nothing new
    /// is stored.
    pub async fn enqueue(
        &self,
        op_type: OpType,
        payload: MutationPayload,
        priority: Option<Priority>,
    ) -> Result<Uuid, CoreError> {
        self.enqueue_with_id(Uuid::new_v4(), op_type, payload, priority)
            .await
    }

    /// Enqueue under a caller-chosen id, so a write first attempted
    /// directly keeps its idempotency key when it falls back to the queue.
    pub async fn enqueue_with_id(
        &self,
        id: Uuid,
        op_type: OpType,
        payload: MutationPayload,
        priority: Option<Priority>,
    ) -> Result<Uuid, CoreError> {
        let hash = params_hash(&payload)?;
        let mut state = self.state.lock().await;

        if op_type.merges_duplicates() {
            let existing = state
                .records
                .values()
                .find(|r| {
                    r.status == MutationStatus::Pending
                        && r.op_type == op_type
                        && r.params_hash == hash
                })
                .cloned();
            if let Some(existing) = existing {
                drop(state);
                info!(id = %existing.id, %op_type, "identical write already pending, merged");
                self.audit
                    .record(AuditAction::Merged, &existing, Some(&id.to_string()))
                    .await;
                return Ok(existing.id);
            }
        }

        let created_at = next_created_at(state.last_created_at);
        let record = QueuedMutation {
            id,
            op_type,
            payload,
            params_hash: hash,
            priority: priority.unwrap_or_else(|| op_type.default_priority()),
            created_at,
            attempts: 0,
            status: MutationStatus::Pending,
            last_error: None,
            last_attempt_at: None,
        };
        let bytes = seal_record(&self.cipher, &record)?;
        self.check_quota(bytes.len()).await?;

        self.store
            .set(Namespace::MutationQueue, &id.to_string(), bytes)
            .await?;

        state.last_created_at = Some(created_at);
        state.records.insert(id, record.clone());
        self.publish_counts(&state);
        drop(state);

        info!(%id, %op_type, "mutation enqueued");
        self.audit.record(AuditAction::Queued, &record, None).await;
        Ok(id)
    }

    async fn check_quota(&self, incoming: usize) -> Result<(), CoreError> {
        let used = self.store.usage_bytes().await?;
        let incoming = u64::try_from(incoming).unwrap_or(u64::MAX);
        let projected = used.saturating_add(incoming);

        if projected > self.quota_bytes {
            warn!(used, quota = self.quota_bytes, "durable storage full, rejecting enqueue");
            return Err(CoreError::StorageFull {
                used_bytes: used,
                quota_bytes: self.quota_bytes,
            });
        }

        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let ratio = projected as f64 / self.quota_bytes.max(1) as f64;
        if ratio >= QUOTA_WARN_RATIO {
            warn!(
                used = projected,
                quota = self.quota_bytes,
                "durable storage above 90% of quota"
            );
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// PENDING records in drain order.
    pub async fn list_pending(&self) -> Vec<QueuedMutation> {
        self.list_where(|r| r.status == MutationStatus::Pending)
            .await
    }

    /// FAILED records ("sync issues"), in queue order.
    pub async fn list_failed(&self) -> Vec<QueuedMutation> {
        self.list_where(|r| r.status == MutationStatus::Failed)
            .await
    }

    /// Every record, in queue order.
    pub async fn list_all(&self) -> Vec<QueuedMutation> {
        self.list_where(|_| true).await
    }

    /// The next record the drainer should send.
    pub async fn head(&self) -> Option<QueuedMutation> {
        let state = self.state.lock().await;
        state
            .records
            .values()
            .filter(|r| r.status == MutationStatus::Pending)
            .min_by_key(|r| r.order_key())
            .cloned()
    }

    pub async fn get(&self, id: Uuid) -> Option<QueuedMutation> {
        self.state.lock().await.records.get(&id).cloned()
    }

    pub async fn counts(&self) -> QueueCounts {
        count(&self.state.lock().await.records)
    }

    async fn list_where(&self, keep: impl Fn(&QueuedMutation) -> bool) -> Vec<QueuedMutation> {
        let state = self.state.lock().await;
        let mut out: Vec<_> = state.records.values().filter(|r| keep(r)).cloned().collect();
        out.sort_by_key(QueuedMutation::order_key);
        out
    }

    // ── State transitions ────────────────────────────────────────────

    /// PENDING → IN_FLIGHT.
    pub async fn mark_in_flight(&self, id: Uuid) -> Result<QueuedMutation, CoreError> {
        self.update(id, |record| {
            expect_status(record, MutationStatus::Pending)?;
            record.status = MutationStatus::InFlight;
            record.last_attempt_at = Some(Utc::now());
            Ok(())
        })
        .await
    }

    /// Confirmed delivery: the record is deleted.
    pub async fn mark_success(&self, id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if !state.records.contains_key(&id) {
            return Err(CoreError::MutationNotFound { id });
        }
        self.store
            .delete(Namespace::MutationQueue, &id.to_string())
            .await?;
        let removed = state
            .records
            .remove(&id)
            .ok_or(CoreError::MutationNotFound { id })?;
        self.publish_counts(&state);
        drop(state);

        debug!(%id, "mutation delivered and removed");
        self.audit.record(AuditAction::Delivered, &removed, None).await;
        Ok(())
    }

    /// Transient failure: attempts += 1. The record goes back to PENDING,
    /// or to FAILED once `max_attempts` is reached.
    pub async fn mark_failure(&self, id: Uuid, error: &str) -> Result<QueuedMutation, CoreError> {
        let max_attempts = self.max_attempts;
        let record = self
            .update(id, |record| {
                record.attempts = record.attempts.saturating_add(1);
                record.last_error = Some(error.to_owned());
                record.status = if record.attempts >= max_attempts {
                    MutationStatus::Failed
                } else {
                    MutationStatus::Pending
                };
                Ok(())
            })
            .await?;

        if record.status == MutationStatus::Failed {
            warn!(%id, attempts = record.attempts, error, "mutation exhausted retries");
            self.audit.record(AuditAction::Failed, &record, Some(error)).await;
        } else {
            debug!(%id, attempts = record.attempts, error, "mutation will be retried");
            self.audit.record(AuditAction::Retrying, &record, Some(error)).await;
        }
        Ok(record)
    }

    /// Permanent rejection: straight to FAILED, attempts += 1.
    pub async fn mark_rejected(&self, id: Uuid, error: &str) -> Result<QueuedMutation, CoreError> {
        let record = self
            .update(id, |record| {
                record.attempts = record.attempts.saturating_add(1);
                record.last_error = Some(error.to_owned());
                record.status = MutationStatus::Failed;
                Ok(())
            })
            .await?;
        warn!(%id, error, "mutation rejected by backend");
        self.audit.record(AuditAction::Failed, &record, Some(error)).await;
        Ok(record)
    }

    /// FAILED → PENDING with a fresh retry budget. Keeps its position.
    pub async fn retry(&self, id: Uuid) -> Result<QueuedMutation, CoreError> {
        let record = self
            .update(id, |record| {
                expect_status(record, MutationStatus::Failed)?;
                record.status = MutationStatus::Pending;
                record.attempts = 0;
                Ok(())
            })
            .await?;
        info!(%id, "failed mutation re-queued");
        self.audit.record(AuditAction::Retried, &record, None).await;
        Ok(record)
    }

    /// Remove a record regardless of status. IN_FLIGHT records cannot be
    /// discarded while the drainer owns them.
    pub async fn discard(&self, id: Uuid) -> Result<QueuedMutation, CoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get(&id)
            .ok_or(CoreError::MutationNotFound { id })?;
        if record.status == MutationStatus::InFlight {
            return Err(CoreError::InvalidMutationState {
                id,
                status: MutationStatus::InFlight,
                expected: MutationStatus::Failed,
            });
        }
        self.store
            .delete(Namespace::MutationQueue, &id.to_string())
            .await?;
        let removed = state
            .records
            .remove(&id)
            .ok_or(CoreError::MutationNotFound { id })?;
        self.publish_counts(&state);
        drop(state);

        info!(%id, "mutation discarded");
        self.audit.record(AuditAction::Discarded, &removed, None).await;
        Ok(removed)
    }

    /// Return records left IN_FLIGHT by a crash to PENDING. Run once at
    /// startup, before the drainer.
    pub async fn recover_in_flight(&self) -> Result<usize, CoreError> {
        let stuck: Vec<Uuid> = {
            let state = self.state.lock().await;
            state
                .records
                .values()
                .filter(|r| r.status == MutationStatus::InFlight)
                .map(|r| r.id)
                .collect()
        };
        for id in &stuck {
            let record = self
                .update(*id, |record| {
                    record.status = MutationStatus::Pending;
                    Ok(())
                })
                .await?;
            self.audit.record(AuditAction::Recovered, &record, None).await;
        }
        if !stuck.is_empty() {
            info!(recovered = stuck.len(), "recovered in-flight mutations");
        }
        Ok(stuck.len())
    }

    /// Hand an IN_FLIGHT record back to the drainer after its outcome
    /// could not be recorded. Memory always returns to PENDING so the next
    /// pass resends it under the same key; if storage is still failing the
    /// on-disk copy stays IN_FLIGHT until `recover_in_flight` at startup.
    pub async fn release(&self, id: Uuid) {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(&id) else {
            return;
        };
        if record.status != MutationStatus::InFlight {
            return;
        }
        record.status = MutationStatus::Pending;
        let record = record.clone();
        self.publish_counts(&state);

        let persisted = match seal_record(&self.cipher, &record) {
            Ok(bytes) => {
                self.store
                    .set(Namespace::MutationQueue, &id.to_string(), bytes)
                    .await
            }
            Err(e) => Err(e),
        };
        match persisted {
            Ok(()) => debug!(%id, "in-flight mutation released"),
            Err(e) => warn!(%id, error = %e, "released mutation is still in flight on disk"),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Apply `change` to a copy of the record, persist it, then commit it
    /// to memory. Nothing changes if the change or the write fails.
    async fn update(
        &self,
        id: Uuid,
        change: impl FnOnce(&mut QueuedMutation) -> Result<(), CoreError>,
    ) -> Result<QueuedMutation, CoreError> {
        let mut state = self.state.lock().await;
        let mut record = state
            .records
            .get(&id)
            .cloned()
            .ok_or(CoreError::MutationNotFound { id })?;
        change(&mut record)?;

        let bytes = seal_record(&self.cipher, &record)?;
        self.store
            .set(Namespace::MutationQueue, &id.to_string(), bytes)
            .await?;

        state.records.insert(id, record.clone());
        self.publish_counts(&state);
        Ok(record)
    }

    fn publish_counts(&self, state: &QueueState) {
        self.counts.send_replace(count(&state.records));
    }
}

// ── Sealed encoding ──────────────────────────────────────────────────

/// The record as stored: JSON whose `payload` is the base64 of the sealed
/// payload JSON.
fn seal_record(cipher: &PayloadCipher, record: &QueuedMutation) -> Result<Vec<u8>, CoreError> {
    let sealed = cipher.seal(&serde_json::to_vec(&record.payload)?)?;
    let mut value = serde_json::to_value(record)?;
    let Some(fields) = value.as_object_mut() else {
        return Err(CoreError::Internal("queue record is not a JSON object".into()));
    };
    fields.insert("payload".into(), Value::String(BASE64.encode(sealed)));
    Ok(serde_json::to_vec(&value)?)
}

fn unseal_record(cipher: &PayloadCipher, bytes: &[u8]) -> Result<QueuedMutation, CoreError> {
    let mut value: Value = serde_json::from_slice(bytes)?;
    let Some(fields) = value.as_object_mut() else {
        return Err(CoreError::Serialization {
            message: "queue record is not a JSON object".into(),
        });
    };
    let sealed = fields
        .get("payload")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::Serialization {
            message: "queue record payload is not sealed".into(),
        })?;
    let sealed = BASE64.decode(sealed).map_err(|e| CoreError::Crypto {
        message: format!("sealed payload is not base64: {e}"),
    })?;
    let payload: Value = serde_json::from_slice(&cipher.open(&sealed)?)?;
    fields.insert("payload".into(), payload);
    Ok(serde_json::from_value(value)?)
}

fn count(records: &HashMap<Uuid, QueuedMutation>) -> QueueCounts {
    records
        .values()
        .fold(QueueCounts::default(), |mut counts, r| {
            match r.status {
                MutationStatus::Pending => counts.pending += 1,
                MutationStatus::InFlight => counts.in_flight += 1,
                MutationStatus::Failed => counts.failed += 1,
                MutationStatus::Success => {}
            }
            counts
        })
}

fn expect_status(record: &QueuedMutation, expected: MutationStatus) -> Result<(), CoreError> {
    if record.status == expected {
        Ok(())
    } else {
        Err(CoreError::InvalidMutationState {
            id: record.id,
            status: record.status,
            expected,
        })
    }
}

/// `now`, nudged forward so it is strictly after `last`.
fn next_created_at(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if now <= last => last + chrono::Duration::microseconds(1),
        _ => now,
    }
}
