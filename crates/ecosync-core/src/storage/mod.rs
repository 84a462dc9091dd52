// ── Durable key/value storage ──
//
// The engine's only persistence seam. Everything that must survive a
// restart (entity cache, mutation queue, store snapshot, audit log) goes
// through a `DurableStore`, partitioned by `Namespace`. Implementations
// must make each `set` atomic and durable: a reader sees either the old
// value or the new one, and a returned `set` survives power loss.
//
// Several processes may share one store; there is no cross-process
// lock and the last writer wins.

mod file;
mod memory;

use futures_util::future::BoxFuture;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::CoreError;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Logical partition of the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Namespace {
    /// Last delivered result set of each live feed.
    EntityCache,
    /// Pending and failed offline writes.
    MutationQueue,
    /// Persisted subset of the reactive store.
    StoreSnapshot,
    /// Audit trail of queue activity.
    OfflineLog,
}

/// Async, namespaced byte store.
///
/// Methods return boxed futures so the trait stays object safe and the
/// engine can hold an `Arc<dyn DurableStore>`.
pub trait DurableStore: Send + Sync + 'static {
    /// Read a value. A missing key is `Ok(None)`.
    fn get<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CoreError>>;

    /// Replace the whole value stored under `key`.
    fn set<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Delete a value. Returns `true` if it existed.
    fn delete<'a>(&'a self, ns: Namespace, key: &'a str) -> BoxFuture<'a, Result<bool, CoreError>>;

    /// All keys currently stored in `ns`, in no particular order.
    fn keys(&self, ns: Namespace) -> BoxFuture<'_, Result<Vec<String>, CoreError>>;

    /// Total bytes used across every namespace.
    fn usage_bytes(&self) -> BoxFuture<'_, Result<u64, CoreError>>;
}
