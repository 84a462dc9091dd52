// Scripted doubles for the engine's external seams.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use ecosync_api::{Document, FeedEvent, FeedQuery};

use crate::error::CoreError;
use crate::queue::{MutationPayload, OpType};
use crate::remote::{FeedSource, RemoteApi, SubmitReceipt};
use crate::storage::{DurableStore, MemoryStore, Namespace};

pub(crate) fn doc(id: &str, data: Value) -> Document {
    Document {
        id: id.into(),
        data: data.as_object().cloned().unwrap_or_default(),
    }
}

// ── Storage ──────────────────────────────────────────────────────────

/// `MemoryStore` whose writes start failing after a set budget.
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    /// Writes still allowed; `usize::MAX` means unlimited.
    writes_left: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            writes_left: AtomicUsize::new(usize::MAX),
        }
    }

    /// Allow `n` more writes, then fail every `set` and `delete`.
    pub(crate) fn fail_after(&self, n: usize) {
        self.writes_left.store(n, Ordering::SeqCst);
    }

    pub(crate) fn heal(&self) {
        self.writes_left.store(usize::MAX, Ordering::SeqCst);
    }

    fn allow_write(&self) -> Result<(), CoreError> {
        let allowed = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if allowed {
            Ok(())
        } else {
            Err(CoreError::Storage {
                message: "disk unavailable".into(),
            })
        }
    }
}

impl DurableStore for FlakyStore {
    fn get<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CoreError>> {
        self.inner.get(ns, key)
    }

    fn set<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        match self.allow_write() {
            Ok(()) => self.inner.set(ns, key, value),
            Err(e) => async move { Err(e) }.boxed(),
        }
    }

    fn delete<'a>(&'a self, ns: Namespace, key: &'a str) -> BoxFuture<'a, Result<bool, CoreError>> {
        match self.allow_write() {
            Ok(()) => self.inner.delete(ns, key),
            Err(e) => async move { Err(e) }.boxed(),
        }
    }

    fn keys(&self, ns: Namespace) -> BoxFuture<'_, Result<Vec<String>, CoreError>> {
        self.inner.keys(ns)
    }

    fn usage_bytes(&self) -> BoxFuture<'_, Result<u64, CoreError>> {
        self.inner.usage_bytes()
    }
}

/// A store whose writes can be parked mid-flight.
pub(crate) struct HeldStore {
    inner: MemoryStore,
    holding: AtomicBool,
    entered: Notify,
    released: Semaphore,
}

impl HeldStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            holding: AtomicBool::new(false),
            entered: Notify::new(),
            released: Semaphore::new(0),
        }
    }

    /// Park every following `set` until [`release`](Self::release).
    pub(crate) fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    /// Resolves once a `set` is parked.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let parked writes finish and stop parking new ones.
    pub(crate) fn release(&self) {
        self.holding.store(false, Ordering::SeqCst);
        self.released.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

impl DurableStore for HeldStore {
    fn get<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CoreError>> {
        self.inner.get(ns, key)
    }

    fn set<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            if self.holding.load(Ordering::SeqCst) {
                self.entered.notify_one();
                if let Ok(permit) = self.released.acquire().await {
                    permit.forget();
                }
            }
            self.inner.set(ns, key, value).await
        }
        .boxed()
    }

    fn delete<'a>(&'a self, ns: Namespace, key: &'a str) -> BoxFuture<'a, Result<bool, CoreError>> {
        self.inner.delete(ns, key)
    }

    fn keys(&self, ns: Namespace) -> BoxFuture<'_, Result<Vec<String>, CoreError>> {
        self.inner.keys(ns)
    }

    fn usage_bytes(&self) -> BoxFuture<'_, Result<u64, CoreError>> {
        self.inner.usage_bytes()
    }
}

// ── Feeds ────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MockFeeds {
    opened: Mutex<Vec<(FeedQuery, mpsc::Sender<FeedEvent>)>>,
}

impl MockFeeds {
    pub(crate) fn opened(&self) -> Vec<FeedQuery> {
        self.lock().iter().map(|(q, _)| q.clone()).collect()
    }

    /// Deliver a snapshot to every open feed on `collection`.
    pub(crate) async fn push(&self, collection: &str, documents: Vec<Document>) {
        let senders: Vec<_> = self
            .lock()
            .iter()
            .filter(|(q, _)| q.collection == collection)
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(FeedEvent::Snapshot(documents.clone())).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(FeedQuery, mpsc::Sender<FeedEvent>)>> {
        self.opened
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl FeedSource for MockFeeds {
    fn open(&self, query: FeedQuery, _cancel: CancellationToken) -> mpsc::Receiver<FeedEvent> {
        let (tx, rx) = mpsc::channel(8);
        self.lock().push((query, tx));
        rx
    }
}

// ── Remote API ───────────────────────────────────────────────────────

/// One recorded `submit` call.
#[derive(Debug, Clone)]
pub(crate) struct SubmitCall {
    pub(crate) op_type: OpType,
    pub(crate) key: String,
}

/// Answers submissions from a script (default: success), and aggregate
/// fetches from a fixed table (default: 404).
#[derive(Default)]
pub(crate) struct MockRemote {
    script: Mutex<VecDeque<Result<SubmitReceipt, CoreError>>>,
    calls: Mutex<Vec<SubmitCall>>,
    aggregates: Mutex<HashMap<String, Value>>,
    fetches: AtomicUsize,
}

impl MockRemote {
    pub(crate) fn script(&self, outcome: Result<SubmitReceipt, CoreError>) {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(outcome);
    }

    pub(crate) fn set_aggregate(&self, path: &str, body: Value) {
        self.aggregates
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(path.to_owned(), body);
    }

    pub(crate) fn calls(&self) -> Vec<SubmitCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl RemoteApi for MockRemote {
    fn submit<'a>(
        &'a self,
        op_type: OpType,
        _payload: &'a MutationPayload,
        idempotency_key: &'a str,
    ) -> BoxFuture<'a, Result<SubmitReceipt, CoreError>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(SubmitCall {
                op_type,
                key: idempotency_key.to_owned(),
            });
        let outcome = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Ok(SubmitReceipt {
                    entity_id: Some(format!("entity-{idempotency_key}")),
                })
            });
        async move { outcome }.boxed()
    }

    fn fetch_aggregate<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Value, CoreError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let body = self
            .aggregates
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path)
            .cloned();
        async move {
            body.ok_or_else(|| CoreError::NotFound {
                entity_type: "resource".into(),
                identifier: path.to_owned(),
            })
        }
        .boxed()
    }
}
