// Event name → ordered handler list, with isolated execution.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::transport::HubEvent;

/// Error type handlers may return; it is logged and otherwise ignored.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(HubEvent) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Identifies a registration so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    handlers: RwLock<HashMap<String, Vec<(ListenerId, Handler)>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn on<F, Fut>(&self, event: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(HubEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(move |event| handler(event).boxed());
        self.handlers
            .write()
            .expect("listener lock poisoned")
            .entry(event.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut handlers = self.handlers.write().expect("listener lock poisoned");
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(existing, _)| *existing == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .expect("listener lock poisoned")
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Hand `event` to every handler registered for its name, in
    /// registration order. Each returned future runs on its own task.
    /// Returns how many handlers were invoked.
    pub fn dispatch(&self, event: &HubEvent) -> usize {
        let handlers: Vec<Handler> = {
            let map = self.handlers.read().expect("listener lock poisoned");
            match map.get(&event.name) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => {
                    tracing::trace!(event = %event.name, "No listeners for hub event");
                    return 0;
                }
            }
        };

        for handler in &handlers {
            let call = AssertUnwindSafe(|| handler(event.clone()));
            let future = match std::panic::catch_unwind(call) {
                Ok(future) => future,
                Err(_) => {
                    tracing::error!(event = %event.name, "Hub listener panicked");
                    continue;
                }
            };

            let name = event.name.clone();
            tokio::spawn(async move {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(event = %name, error = %e, "Hub listener failed"),
                    Err(_) => tracing::error!(event = %name, "Hub listener panicked"),
                }
            });
        }

        handlers.len()
    }
}
