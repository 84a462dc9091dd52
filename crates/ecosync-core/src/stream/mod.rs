// ── Reactive store streams ──
//
// Subscription types for consuming store changes. Every observable
// piece of the `ReactiveStore` (a collection snapshot, the mission
// buckets, the profile, settings) is a `watch` channel underneath.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A subscription to one observable value of the store.
///
/// Provides both point-in-time access and reactive change notification
/// via [`changed()`](Self::changed) or by converting to a `Stream`.
pub struct EntityStream<V: Clone + Send + Sync + 'static> {
    current: V,
    receiver: watch::Receiver<V>,
}

impl<V: Clone + Send + Sync + 'static> EntityStream<V> {
    pub(crate) fn new(receiver: watch::Receiver<V>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The value captured at creation (or at the last `changed()`).
    pub fn current(&self) -> &V {
        &self.current
    }

    /// The latest value (may have changed since creation).
    pub fn latest(&self) -> V {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new value.
    /// Returns `None` if the store has been dropped.
    pub async fn changed(&mut self) -> Option<V> {
        self.receiver.changed().await.ok()?;
        let value = self.receiver.borrow_and_update().clone();
        self.current = value.clone();
        Some(value)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    ///
    /// The stream yields the current value first, then every change.
    pub fn into_stream(self) -> EntityWatchStream<V> {
        EntityWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct EntityWatchStream<V: Clone + Send + Sync + 'static> {
    inner: WatchStream<V>,
}

impl<V: Clone + Send + Sync + 'static> Stream for EntityWatchStream<V> {
    type Item = V;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // WatchStream is Unpin: it only holds a boxed future.
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn changed_tracks_latest_value() {
        let (tx, rx) = watch::channel(1_u32);
        let mut stream = EntityStream::new(rx);
        assert_eq!(*stream.current(), 1);

        tx.send_replace(2);
        assert_eq!(stream.latest(), 2);
        assert_eq!(stream.changed().await, Some(2));
        assert_eq!(*stream.current(), 2);

        drop(tx);
        assert_eq!(stream.changed().await, None);
    }

    #[tokio::test]
    async fn into_stream_yields_current_then_changes() {
        let (tx, rx) = watch::channel("a");
        let mut stream = EntityStream::new(rx).into_stream();

        assert_eq!(stream.next().await, Some("a"));
        tx.send_replace("b");
        assert_eq!(stream.next().await, Some("b"));
    }
}
