// In-memory `DurableStore`, for tests and ephemeral sessions.

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::{DurableStore, Namespace};
use crate::error::CoreError;

/// `DashMap`-backed store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<(Namespace, String), Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn get<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CoreError>> {
        let value = self
            .entries
            .get(&(ns, key.to_owned()))
            .map(|v| v.value().clone());
        async move { Ok(value) }.boxed()
    }

    fn set<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        self.entries.insert((ns, key.to_owned()), value);
        async { Ok(()) }.boxed()
    }

    fn delete<'a>(&'a self, ns: Namespace, key: &'a str) -> BoxFuture<'a, Result<bool, CoreError>> {
        let existed = self.entries.remove(&(ns, key.to_owned())).is_some();
        async move { Ok(existed) }.boxed()
    }

    fn keys(&self, ns: Namespace) -> BoxFuture<'_, Result<Vec<String>, CoreError>> {
        let keys = self
            .entries
            .iter()
            .filter(|r| r.key().0 == ns)
            .map(|r| r.key().1.clone())
            .collect();
        async move { Ok(keys) }.boxed()
    }

    fn usage_bytes(&self) -> BoxFuture<'_, Result<u64, CoreError>> {
        let total: usize = self
            .entries
            .iter()
            .map(|r| r.key().1.len() + r.value().len())
            .sum();
        async move { Ok(u64::try_from(total).unwrap_or(u64::MAX)) }.boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = MemoryStore::new();
        store
            .set(Namespace::EntityCache, "k", b"cache".to_vec())
            .await
            .unwrap();
        store
            .set(Namespace::MutationQueue, "k", b"queue".to_vec())
            .await
            .unwrap();

        assert_eq!(
            store.get(Namespace::EntityCache, "k").await.unwrap().as_deref(),
            Some(&b"cache"[..])
        );
        assert_eq!(store.keys(Namespace::MutationQueue).await.unwrap(), vec!["k"]);

        assert!(store.delete(Namespace::EntityCache, "k").await.unwrap());
        assert!(!store.delete(Namespace::EntityCache, "k").await.unwrap());
        assert!(store.get(Namespace::EntityCache, "k").await.unwrap().is_none());
        assert!(store.get(Namespace::MutationQueue, "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn usage_counts_keys_and_values() {
        let store = MemoryStore::new();
        store
            .set(Namespace::StoreSnapshot, "ab", vec![0; 10])
            .await
            .unwrap();
        assert_eq!(store.usage_bytes().await.unwrap(), 12);
    }
}
