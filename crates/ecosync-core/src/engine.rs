// ── Sync engine facade ──
//
// Wires storage, cache, queue, store, reader, drainer and live feeds
// together and owns their background tasks. Consumers hold a cheaply
// cloneable `SyncEngine`; there is no global instance.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ecosync_api::transport::{TlsMode, TransportConfig};
use ecosync_api::{ApiClient, FeedClient};

use crate::audit::DEFAULT_AUDIT_RETENTION;
use crate::cache::PersistentCache;
use crate::config::{EngineConfig, StorageLocation, TlsVerification};
use crate::crypto::PayloadCipher;
use crate::drain::{DrainOutcome, QueueDrainer};
use crate::error::CoreError;
use crate::model::{EntityType, Role};
use crate::queue::{MutationPayload, MutationQueue, OpType, Priority, QueueCounts, QueuedMutation};
use crate::reader::{ReaderStats, Resolution, TieredReader};
use crate::remote::{FeedSource, RemoteApi};
use crate::session::{Connectivity, SessionContext};
use crate::storage::{DurableStore, FileStore, MemoryStore, Namespace};
use crate::store::{PersistedState, ReactiveStore};
use crate::subscription::{SubscriptionHandle, SubscriptionManager, store_applier_task};

const UPDATE_CHANNEL_SIZE: usize = 64;

/// Key of the persisted store subset in the `store-snapshot` namespace.
const SNAPSHOT_KEY: &str = "state";

// ── Parts ────────────────────────────────────────────────────────────

/// The external collaborators an engine runs against.
///
/// [`SyncEngine::start`] builds the production set from config; tests
/// and embedders pass their own to [`SyncEngine::start_with`].
pub struct EngineParts {
    pub durable: Arc<dyn DurableStore>,
    pub remote: Arc<dyn RemoteApi>,
    pub feeds: Arc<dyn FeedSource>,
}

/// How [`SyncEngine::submit_or_enqueue`] disposed of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Accepted by the backend right away.
    Delivered { id: Uuid, entity_id: Option<String> },
    /// Persisted for the drainer to deliver later.
    Queued { id: Uuid },
}

impl SubmitOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Delivered { id, .. } | Self::Queued { id } => *id,
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<ReactiveStore>,
    cache: PersistentCache,
    queue: Arc<MutationQueue>,
    reader: TieredReader,
    drainer: Arc<QueueDrainer>,
    subscriptions: SubscriptionManager,
    remote: Arc<dyn RemoteApi>,
    connectivity: watch::Sender<Connectivity>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Open durable storage, build the HTTP and feed clients from
    /// `config`, and start the engine.
    pub async fn start(config: EngineConfig) -> Result<Self, CoreError> {
        let durable: Arc<dyn DurableStore> = match &config.storage {
            StorageLocation::Directory(root) => Arc::new(FileStore::open(root.clone()).await?),
            StorageLocation::Memory => Arc::new(MemoryStore::new()),
        };
        let transport = build_transport(&config);
        let remote = ApiClient::new(config.api_url.as_str(), config.token.as_ref(), &transport)?;
        let feeds = FeedClient::new(
            config.feed_url.clone(),
            config.token.clone(),
            config.feed_reconnect.clone(),
        );

        Self::start_with(
            config,
            EngineParts {
                durable,
                remote: Arc::new(remote),
                feeds: Arc::new(feeds),
            },
        )
        .await
    }

    /// Start against caller-supplied collaborators.
    ///
    /// Recovers in-flight queue records, rehydrates the store from its
    /// persisted subset, then spawns the store applier, the snapshot
    /// persister and the queue drainer. Connectivity starts `Offline`.
    pub async fn start_with(config: EngineConfig, parts: EngineParts) -> Result<Self, CoreError> {
        let EngineParts {
            durable,
            remote,
            feeds,
        } = parts;

        let cache = PersistentCache::new(Arc::clone(&durable), config.cache_ttl);
        let queue = Arc::new(
            MutationQueue::open_with_cipher(
                Arc::clone(&durable),
                config
                    .queue_secret
                    .as_ref()
                    .map_or_else(PayloadCipher::default, PayloadCipher::from_secret),
                config.retry.max_attempts,
                config.storage_quota_bytes,
            )
            .await?,
        );
        queue.recover_in_flight().await?;
        if let Err(e) = queue.audit().trim(DEFAULT_AUDIT_RETENTION).await {
            warn!(error = %e, "failed to trim the audit log");
        }

        let store = Arc::new(ReactiveStore::new());
        if let Some(state) = load_snapshot(durable.as_ref()).await {
            store.rehydrate(state);
        }

        let (connectivity, connectivity_rx) = watch::channel(Connectivity::Offline);
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_SIZE);

        let reader = TieredReader::new(
            Arc::clone(&store),
            cache.clone(),
            Arc::clone(&remote),
            connectivity_rx.clone(),
            config.network_timeout,
        );
        let drainer = Arc::new(QueueDrainer::new(
            Arc::clone(&queue),
            Arc::clone(&remote),
            connectivity_rx,
            config.retry,
            config.network_timeout,
        ));
        let subscriptions = SubscriptionManager::new(feeds, cache.clone(), updates_tx);

        let cancel = CancellationToken::new();
        let mut handles = vec![
            tokio::spawn(store_applier_task(
                Arc::clone(&store),
                updates_rx,
                cancel.clone(),
            )),
            tokio::spawn(persister_task(
                Arc::clone(&store),
                store.subscribe_revision(),
                Arc::clone(&durable),
                config.persist_debounce,
                cancel.clone(),
            )),
        ];
        if config.background_drain {
            handles.push(tokio::spawn(Arc::clone(&drainer).run(cancel.clone())));
        }

        info!(api = %config.api_url, "sync engine started");
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                cache,
                queue,
                reader,
                drainer,
                subscriptions,
                remote,
                connectivity,
                cancel,
                task_handles: Mutex::new(handles),
            }),
        })
    }

    /// One-shot: start, run closure, shut down.
    ///
    /// Optimized for CLI: no background drainer, so the closure owns
    /// every drain pass.
    pub async fn oneshot<F, Fut, T>(config: EngineConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(SyncEngine) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.background_drain = false;

        let engine = Self::start(cfg).await?;
        let result = f(engine.clone()).await;
        engine.shutdown().await;
        result
    }

    /// Cancel every background task and wait for them. Live feeds are
    /// torn down; the store subset is flushed one last time.
    pub async fn shutdown(&self) {
        self.inner.subscriptions.unsubscribe_all();
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("sync engine stopped");
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The reactive store consumers render from.
    pub fn store(&self) -> &Arc<ReactiveStore> {
        &self.inner.store
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.inner.queue
    }

    pub fn cache(&self) -> &PersistentCache {
        &self.inner.cache
    }

    pub fn reader_stats(&self) -> ReaderStats {
        self.inner.reader.stats()
    }

    // ── Connectivity ─────────────────────────────────────────────────

    /// Report network reachability. A transition to online wakes the
    /// drainer.
    pub fn set_connectivity(&self, connectivity: Connectivity) {
        let previous = self.inner.connectivity.send_replace(connectivity);
        if previous != connectivity {
            info!(%connectivity, "connectivity changed");
        }
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.inner.connectivity.borrow()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.inner.connectivity.subscribe()
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Log `owner_id` in: sweep expired cache entries and open the
    /// standard live feeds for `role`. Store contents that belong to a
    /// different owner are cleared first.
    pub async fn start_session(
        &self,
        owner_id: &str,
        role: Role,
    ) -> Result<Vec<SubscriptionHandle>, CoreError> {
        let store = &self.inner.store;
        if store.owner_id().is_some_and(|current| current != owner_id) {
            info!(owner = owner_id, "store holds another user's data, clearing");
            store.clear_all();
        }
        store.set_owner(Some(owner_id.to_owned()));

        if let Err(e) = self.inner.cache.sweep_expired().await {
            warn!(error = %e, "cache sweep failed");
        }

        let ctx = SessionContext::new(owner_id, role, self.inner.connectivity.subscribe());
        self.inner.subscriptions.start_session(&ctx)
    }

    /// Log out. Tears down every live feed; with `wipe`, also deletes the
    /// owner's cache entries, the audit log and the store contents.
    pub async fn end_session(&self, wipe: bool) -> Result<(), CoreError> {
        let owner = self.inner.subscriptions.current_owner();
        let closed = self.inner.subscriptions.unsubscribe_all();
        self.inner.subscriptions.settle().await;
        debug!(closed, "session feeds closed");

        if wipe {
            if let Some(owner) = owner {
                self.inner.cache.purge_owner(&owner).await?;
            }
            self.inner.queue.audit().clear().await?;
            self.inner.store.clear_all();
        }
        Ok(())
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Point lookup across memory, cache and network.
    pub async fn resolve_entity(&self, id: &str, entity_type: EntityType) -> Resolution {
        self.inner.reader.resolve_entity(id, entity_type).await
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Durably queue a write for the drainer.
    pub async fn enqueue(
        &self,
        op_type: OpType,
        payload: MutationPayload,
        priority: Option<Priority>,
    ) -> Result<Uuid, CoreError> {
        let id = self.inner.queue.enqueue(op_type, payload, priority).await?;
        self.inner.drainer.wake();
        Ok(id)
    }

    /// Try the write directly when online; queue it when offline or on a
    /// transient failure. The queued record reuses the id already sent as
    /// the idempotency key, so a submission that did land is not applied
    /// twice. Permanent rejections are returned, not queued.
    pub async fn submit_or_enqueue(
        &self,
        op_type: OpType,
        payload: MutationPayload,
        priority: Option<Priority>,
    ) -> Result<SubmitOutcome, CoreError> {
        let id = Uuid::new_v4();

        if self.connectivity().is_online() {
            let key = id.to_string();
            let timeout = self.inner.config.network_timeout;
            let submitted =
                tokio::time::timeout(timeout, self.inner.remote.submit(op_type, &payload, &key))
                    .await
                    .unwrap_or_else(|_| {
                        Err(CoreError::Timeout {
                            timeout_secs: timeout.as_secs(),
                        })
                    });

            match submitted {
                Ok(receipt) => {
                    info!(%id, %op_type, "write delivered directly");
                    return Ok(SubmitOutcome::Delivered {
                        id,
                        entity_id: receipt.entity_id,
                    });
                }
                Err(e) if e.is_permanent() => return Err(e),
                Err(e) => warn!(%id, %op_type, error = %e, "direct write failed, queueing"),
            }
        }

        self.inner
            .queue
            .enqueue_with_id(id, op_type, payload, priority)
            .await?;
        self.inner.drainer.wake();
        Ok(SubmitOutcome::Queued { id })
    }

    // ── Queue management ─────────────────────────────────────────────

    pub async fn drain_once(&self) -> Result<DrainOutcome, CoreError> {
        self.inner.drainer.drain_once().await
    }

    pub async fn drain_all(&self) -> Result<Vec<DrainOutcome>, CoreError> {
        self.inner.drainer.drain_all().await
    }

    /// Re-queue a FAILED record and wake the drainer.
    pub async fn retry(&self, id: Uuid) -> Result<QueuedMutation, CoreError> {
        let record = self.inner.queue.retry(id).await?;
        self.inner.drainer.wake();
        Ok(record)
    }

    pub async fn discard(&self, id: Uuid) -> Result<QueuedMutation, CoreError> {
        self.inner.queue.discard(id).await
    }

    pub async fn list_failed(&self) -> Vec<QueuedMutation> {
        self.inner.queue.list_failed().await
    }

    pub async fn queue_counts(&self) -> QueueCounts {
        self.inner.queue.counts().await
    }
}

// ── Store snapshot persistence ───────────────────────────────────────

async fn load_snapshot(durable: &dyn DurableStore) -> Option<PersistedState> {
    let bytes = match durable.get(Namespace::StoreSnapshot, SNAPSHOT_KEY).await {
        Ok(bytes) => bytes?,
        Err(e) => {
            warn!(error = %e, "failed to read store snapshot");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "store snapshot undecodable, starting empty");
            None
        }
    }
}

async fn save_snapshot(store: &ReactiveStore, durable: &dyn DurableStore) {
    let bytes = match serde_json::to_vec(&store.persisted_state()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to encode store snapshot");
            return;
        }
    };
    if let Err(e) = durable.set(Namespace::StoreSnapshot, SNAPSHOT_KEY, bytes).await {
        warn!(error = %e, "failed to persist store snapshot");
    }
}

/// Write the persisted subset after every store mutation, coalescing
/// bursts that land within `debounce` of each other.
/// `revisions` must be subscribed before any mutation the persister is
/// expected to see.
async fn persister_task(
    store: Arc<ReactiveStore>,
    mut revisions: watch::Receiver<u64>,
    durable: Arc<dyn DurableStore>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(debounce) => {}
        }
        revisions.borrow_and_update();
        save_snapshot(&store, durable.as_ref()).await;
    }

    // Flush whatever changed since the last write.
    if revisions.has_changed().unwrap_or(false) {
        save_snapshot(&store, durable.as_ref()).await;
    }
    debug!("store persister exiting");
}

fn build_transport(config: &EngineConfig) -> TransportConfig {
    TransportConfig {
        tls: match &config.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        },
        timeout: config.request_timeout,
        connect_timeout: config.network_timeout,
    }
}
