//! Event bus
//!
//! Handlers run synchronously on the publishing task, in subscription order.
//! A panicking handler is logged and skipped; the remaining handlers still
//! see the event.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use flowdeck_core::{FlowEvent, FlowEventKind};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{error, warn};

pub type EventHandler = Arc<dyn Fn(&FlowEvent) + Send + Sync>;

struct Entry {
    id: u64,
    /// `None` receives every kind
    kind: Option<FlowEventKind>,
    handler: EventHandler,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    entries: RwLock<Vec<Entry>>,
    channel: RwLock<Option<mpsc::Sender<FlowEvent>>>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }
}

/// Publish/subscribe hub owned by one engine
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by `EventBus::on`; call `unsubscribe` to stop receiving events
///
/// Dropping the handle keeps the subscription alive.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Returns false when the subscription was already gone
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.id),
            None => false,
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind
    pub fn on<F>(&self, kind: FlowEventKind, handler: F) -> Subscription
    where
        F: Fn(&FlowEvent) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every event kind
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&FlowEvent) + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(handler))
    }

    fn subscribe(&self, kind: Option<FlowEventKind>, handler: EventHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.write().push(Entry { id, kind, handler });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Also forward every event to `tx`; a full or closed channel drops the event
    pub fn forward_to(&self, tx: mpsc::Sender<FlowEvent>) {
        *self.inner.channel.write() = Some(tx);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Deliver `event` to every matching handler
    pub fn publish(&self, event: &FlowEvent) {
        let kind = event.kind();
        // Handlers may subscribe or unsubscribe while running
        let snapshot: Vec<EventHandler> = self
            .inner
            .entries
            .read()
            .iter()
            .filter(|e| e.kind.map_or(true, |k| k == kind))
            .map(|e| e.handler.clone())
            .collect();

        for handler in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(
                    "Event handler panicked on '{}' for instance {}; continuing",
                    kind,
                    event.instance_id()
                );
            }
        }

        let channel = self.inner.channel.read().clone();
        if let Some(tx) = channel {
            if let Err(e) = tx.try_send(event.clone()) {
                warn!("Dropped '{}' event on forwarding channel: {}", kind, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn pause(id: &str) -> FlowEvent {
        FlowEvent::Pause {
            instance_id: id.into(),
        }
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let seen = seen.clone();
            bus.on(FlowEventKind::Pause, move |_| seen.lock().push(n));
        }
        bus.publish(&pause("i1"));

        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_kind_filter() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.on(FlowEventKind::Resume, move |e| s.lock().push(e.kind()));
        let s = seen.clone();
        bus.on_any(move |e| s.lock().push(e.kind()));

        bus.publish(&pause("i1"));
        assert_eq!(*seen.lock(), vec![FlowEventKind::Pause]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0));

        bus.on(FlowEventKind::Pause, |_| panic!("handler bug"));
        let s = seen.clone();
        bus.on(FlowEventKind::Pause, move |_| *s.lock() += 1);

        bus.publish(&pause("i1"));
        bus.publish(&pause("i1"));
        assert_eq!(*seen.lock(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0));

        let s = seen.clone();
        let sub = bus.on_any(move |_| *s.lock() += 1);
        bus.publish(&pause("i1"));
        assert!(sub.unsubscribe());
        bus.publish(&pause("i1"));

        assert_eq!(*seen.lock(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_forward_to_channel() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(4);
        bus.forward_to(tx);

        bus.publish(&pause("i9"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.instance_id(), "i9");
    }
}
