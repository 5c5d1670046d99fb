//! Id-keyed listener registry used for queue change notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Handle returned by [`CallbackHub::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

/// A set of `Fn()` listeners invoked together.
///
/// Listeners run under the hub's lock, so they must be cheap and must not
/// call back into whatever component fired them (the queue fires hubs after
/// every mutating operation). The intended listener shape is "nudge a
/// channel or condvar", nothing more.
#[derive(Default)]
pub struct CallbackHub {
    listeners: Mutex<HashMap<SubscriptionId, Box<dyn Fn() + Send>>>,
    next_id: AtomicU64,
}

impl CallbackHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and return its id.
    pub fn subscribe(&self, listener: impl Fn() + Send + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, Box::new(listener));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().remove(&id);
    }

    /// Invoke every registered listener.
    pub fn call(&self) {
        let listeners = self.listeners.lock();
        for listener in listeners.values() {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_subscribe_call_unsubscribe() {
        let hub = CallbackHub::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let id = hub.subscribe(move || {
            h.fetch_add(1, Ordering::Relaxed);
        });

        hub.call();
        hub.call();
        assert_eq!(hits.load(Ordering::Relaxed), 2);

        hub.unsubscribe(id);
        hub.call();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unsubscribe_unknown_id_is_noop() {
        let hub = CallbackHub::new();
        hub.unsubscribe(42);
        hub.call();
    }

    #[test]
    fn test_multiple_listeners_all_fire() {
        let hub = CallbackHub::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let h = Arc::clone(&hits);
            hub.subscribe(move || {
                h.fetch_add(1, Ordering::Relaxed);
            });
        }

        hub.call();
        assert_eq!(hits.load(Ordering::Relaxed), 3);
    }
}
