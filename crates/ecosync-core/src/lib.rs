//! Offline-first sync engine between `ecosync-api` and UI consumers.
//!
//! This crate owns the domain model, the durable state and the reactive
//! data layer of the ecosync workspace:
//!
//! - **[`SyncEngine`]**: Facade managing the full lifecycle:
//!   [`start()`](SyncEngine::start) opens durable storage, recovers the
//!   mutation queue, rehydrates the store and spawns the store applier,
//!   snapshot persister and queue drainer.
//!   [`start_session()`](SyncEngine::start_session) opens the live feeds
//!   for a logged-in user.
//!
//! - **[`ReactiveStore`]**: In-memory source of truth built on
//!   `tokio::sync::watch` channels. Every setter replaces its slice whole;
//!   consumers observe through [`EntityStream<T>`].
//!
//! - **[`PersistentCache`]** / **[`MutationQueue`]**: Durable entity
//!   snapshots and pending writes on top of a [`DurableStore`]
//!   ([`FileStore`] on disk, [`MemoryStore`] for tests). Queued payloads
//!   are sealed with a [`PayloadCipher`]; queue activity is kept in an
//!   [`AuditLog`].
//!
//! - **[`TieredReader`]**: memory → cache → network point lookups.
//!
//! - **[`QueueDrainer`]**: Sequential, priority-ordered replay of the
//!   queue, woken by connectivity changes.
//!
//! - **[`SubscriptionManager`]**: Live feeds of the current session,
//!   torn down together at logout.

pub mod audit;
pub mod cache;
pub mod config;
pub mod convert;
pub mod crypto;
pub mod drain;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod reader;
pub mod remote;
pub mod session;
pub mod storage;
pub mod store;
pub mod stream;
pub mod subscription;

#[cfg(test)]
mod test_support;

// ── Primary re-exports ──────────────────────────────────────────────
pub use audit::{AuditAction, AuditEntry, AuditLog, DEFAULT_AUDIT_RETENTION};
pub use cache::{CacheEntry, CacheKey, DEFAULT_CACHE_TTL, PersistentCache};
pub use config::{EngineConfig, RetryPolicy, StorageLocation, TlsVerification};
pub use crypto::{DEFAULT_QUEUE_SECRET, PayloadCipher, params_hash};
pub use drain::{DrainOutcome, QueueDrainer};
pub use engine::{EngineParts, SubmitOutcome, SyncEngine};
pub use error::CoreError;
pub use queue::{
    Attachment, DEFAULT_STORAGE_QUOTA_BYTES, MutationPayload, MutationQueue, MutationStatus,
    OpType, Priority, QueueCounts, QueuedMutation,
};
pub use reader::{ReaderStats, Resolution, Tier, TieredReader};
pub use remote::{FeedSource, RemoteApi, SubmitReceipt};
pub use session::{Connectivity, SessionContext};
pub use storage::{DurableStore, FileStore, MemoryStore, Namespace};
pub use store::{PersistedState, ReactiveStore, StoreUpdate};
pub use stream::EntityStream;
pub use subscription::{FeedKind, SubscriptionHandle, SubscriptionKey, SubscriptionManager};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Activity, AdminStats, Badge, CommunityPost, EntityRecord, EntityType, Farmer, Identified,
    LeaderboardEntry, LearningProgress, Mission, MissionBucket, MissionBuckets, Notification,
    Role, Settings, UserProfile,
};

pub use ecosync_api::{Document, FeedEvent, FeedQuery, ReconnectConfig};
