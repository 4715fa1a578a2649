//! Observer lists backing the connection lifecycle events.
//!
//! Each event keeps an ordered list of registered handlers. Emission iterates
//! over a snapshot so handlers may subscribe or unsubscribe concurrently
//! without poisoning the iteration.

use crate::error::Result;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identifies one registered handler so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// An async event handler. Errors are routed to the connection error event
/// by the emitter, never back to the code that triggered the event.
pub type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Ordered multicast handler list.
pub(crate) struct HandlerList<T> {
    handlers: Mutex<Vec<(SubscriptionId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for HandlerList<T> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> HandlerList<T> {
    pub fn add(&self, handler: Handler<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .expect("handler list lock poisoned")
            .push((id, handler));
        id
    }

    pub fn remove(&self, id: SubscriptionId) {
        self.handlers
            .lock()
            .expect("handler list lock poisoned")
            .retain(|(hid, _)| *hid != id);
    }

    pub fn clear(&self) {
        self.handlers
            .lock()
            .expect("handler list lock poisoned")
            .clear();
    }

    /// Copy-before-iterate snapshot of the registered handlers.
    pub fn snapshot(&self) -> Vec<Handler<T>> {
        self.handlers
            .lock()
            .expect("handler list lock poisoned")
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .expect("handler list lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler<()> {
        Arc::new(move |_| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_add_snapshot_invoke() {
        let list: HandlerList<()> = HandlerList::default();
        let counter = Arc::new(AtomicUsize::new(0));

        list.add(counting_handler(Arc::clone(&counter)));
        list.add(counting_handler(Arc::clone(&counter)));

        for handler in list.snapshot() {
            handler(()).await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_only_targets_one_handler() {
        let list: HandlerList<()> = HandlerList::default();
        let counter = Arc::new(AtomicUsize::new(0));

        let id = list.add(counting_handler(Arc::clone(&counter)));
        list.add(counting_handler(counter));
        assert_eq!(list.len(), 2);

        list.remove(id);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_clear() {
        let list: HandlerList<()> = HandlerList::default();
        list.add(Arc::new(|_| Box::pin(async { Ok(()) })));
        list.clear();
        assert_eq!(list.len(), 0);
    }
}
