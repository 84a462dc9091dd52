// ── Generic reactive entity collection ──
//
// Whole-set storage for a single entity type: every write replaces the
// full set, lookups by id go through an atomically swapped index, and
// subscribers get the new snapshot through a `watch` channel.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::model::Identified;

/// A reactive, replace-only collection for a single entity type.
pub(crate) struct EntityCollection<T: Identified + Send + Sync + 'static> {
    /// Id -> entity, swapped in one step on every replace.
    index: ArcSwap<HashMap<String, Arc<T>>>,

    /// Full snapshot in delivery order.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Identified + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            index: ArcSwap::from_pointee(HashMap::new()),
            snapshot,
        }
    }

    /// Replace the whole collection. Returns the new length.
    ///
    /// Duplicate ids keep the first occurrence.
    pub(crate) fn replace_all(&self, items: Vec<T>) -> usize {
        let mut index = HashMap::with_capacity(items.len());
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            if index.contains_key(item.id()) {
                continue;
            }
            let item = Arc::new(item);
            index.insert(item.id().to_owned(), Arc::clone(&item));
            values.push(item);
        }

        let len = values.len();
        self.index.store(Arc::new(index));
        // `send_replace` updates unconditionally, even with zero receivers.
        self.snapshot.send_replace(Arc::new(values));
        len
    }

    /// Look up an entity by id.
    pub(crate) fn get(&self, id: &str) -> Option<Arc<T>> {
        self.index.load().get(id).cloned()
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn clear(&self) {
        self.replace_all(Vec::new());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Item {
        id: String,
        label: &'static str,
    }

    impl Identified for Item {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn item(id: &str, label: &'static str) -> Item {
        Item {
            id: id.into(),
            label,
        }
    }

    #[test]
    fn replace_all_swaps_whole_set() {
        let col = EntityCollection::new();
        assert_eq!(col.replace_all(vec![item("a", "x"), item("b", "y")]), 2);
        assert!(col.get("b").is_some());

        assert_eq!(col.replace_all(vec![item("c", "z")]), 1);
        assert!(col.get("a").is_none());
        assert_eq!(col.get("c").unwrap().label, "z");
        assert_eq!(col.snapshot().len(), 1);
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let col = EntityCollection::new();
        assert_eq!(col.replace_all(vec![item("a", "first"), item("a", "second")]), 1);
        assert_eq!(col.get("a").unwrap().label, "first");
    }

    #[test]
    fn snapshot_preserves_delivery_order() {
        let col = EntityCollection::new();
        col.replace_all(vec![item("z", "1"), item("a", "2"), item("m", "3")]);
        let ids: Vec<_> = col.snapshot().iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn subscribers_see_each_replace() {
        let col = EntityCollection::new();
        let mut rx = col.subscribe();

        col.replace_all(vec![item("a", "x")]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        col.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }
}
