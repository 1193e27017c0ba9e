// ── Store subscriptions ──
//
// Hub pushes mutate channels, carts and profiles behind the host's back;
// a subscription lets the host await the next snapshot or consume them
// as a `Stream`.

use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Ordered snapshot published by an [`EntityCollection`](crate::EntityCollection).
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// Receiving end of an entity collection.
pub struct EntityStream<T> {
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot<T>>) -> Self {
        Self { receiver }
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        Arc::clone(&self.receiver.borrow())
    }

    /// Next snapshot, or `None` once the collection is gone.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        Some(Arc::clone(&self.receiver.borrow_and_update()))
    }

    /// Snapshots published after this call.
    pub fn updates(self) -> impl Stream<Item = Snapshot<T>> + Send + 'static {
        WatchStream::from_changes(self.receiver)
    }
}
