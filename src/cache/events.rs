//! Cache Event Module
//!
//! Synchronous publish/subscribe hub scoped to one cache instance.
//!
//! Handlers run in registration order on the thread that triggered the
//! action. The handler list is snapshotted before delivery, so a handler may
//! subscribe, unsubscribe or call back into the cache without deadlocking.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::error;

// == Delete Reason ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteReason {
    /// Explicit `delete`, `delete_many`, `delete_by_tag` or namespace clear
    Manual,
}

// == Cache Event ==
/// One completed engine action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheEvent {
    Hit { key: String },
    Miss { key: String },
    Set { key: String, size: usize },
    Delete { key: String, reason: DeleteReason },
    Expire { key: String },
    Evict { key: String, strategy: String },
    Clear { count: usize },
    Prune { count: usize },
}

impl CacheEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Hit { .. } => EventKind::Hit,
            CacheEvent::Miss { .. } => EventKind::Miss,
            CacheEvent::Set { .. } => EventKind::Set,
            CacheEvent::Delete { .. } => EventKind::Delete,
            CacheEvent::Expire { .. } => EventKind::Expire,
            CacheEvent::Evict { .. } => EventKind::Evict,
            CacheEvent::Clear { .. } => EventKind::Clear,
            CacheEvent::Prune { .. } => EventKind::Prune,
        }
    }

    /// Key the event refers to, if it concerns a single entry.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key }
            | CacheEvent::Miss { key }
            | CacheEvent::Set { key, .. }
            | CacheEvent::Delete { key, .. }
            | CacheEvent::Expire { key }
            | CacheEvent::Evict { key, .. } => Some(key),
            CacheEvent::Clear { .. } | CacheEvent::Prune { .. } => None,
        }
    }
}

// == Event Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Hit,
    Miss,
    Set,
    Delete,
    Expire,
    Evict,
    Clear,
    Prune,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Hit => "hit",
            EventKind::Miss => "miss",
            EventKind::Set => "set",
            EventKind::Delete => "delete",
            EventKind::Expire => "expire",
            EventKind::Evict => "evict",
            EventKind::Clear => "clear",
            EventKind::Prune => "prune",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by `subscribe`/`on`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type EventHandler = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    filter: Option<EventKind>,
    handler: EventHandler,
}

// == Event Bus ==
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a handler for every event.
    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.register(None, handler)
    }

    /// Registers a handler for one kind of event.
    pub fn on(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.register(Some(kind), handler)
    }

    fn register(&self, filter: Option<EventKind>, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            filter,
            handler,
        });
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Detaches every handler.
    pub fn clear(&self) {
        self.subscriptions.write().clear();
    }

    pub fn handler_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // == Emit ==
    /// Delivers `event` to every matching handler.
    ///
    /// A panicking handler is logged and skipped; the remaining handlers
    /// still run and the panic never reaches the caller.
    pub fn emit(&self, event: &CacheEvent) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.filter.map_or(true, |f| f == kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(event = %kind, "Cache event handler panicked");
            }
        }
    }

    pub fn emit_all(&self, events: &[CacheEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, EventHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: EventHandler = Arc::new(move |event: &CacheEvent| {
            sink.lock().push(event.kind().to_string());
        });
        (seen, handler)
    }

    #[test]
    fn test_subscribe_receives_all_events() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        bus.subscribe(handler);

        bus.emit(&CacheEvent::Hit { key: "a".into() });
        bus.emit(&CacheEvent::Clear { count: 3 });

        assert_eq!(*seen.lock(), vec!["hit", "clear"]);
    }

    #[test]
    fn test_on_filters_by_kind() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        bus.on(EventKind::Miss, handler);

        bus.emit(&CacheEvent::Hit { key: "a".into() });
        bus.emit(&CacheEvent::Miss { key: "b".into() });

        assert_eq!(*seen.lock(), vec!["miss"]);
    }

    #[test]
    fn test_off_detaches_handler() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        let id = bus.subscribe(handler);

        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(&CacheEvent::Hit { key: "a".into() });

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(Arc::new(move |_: &CacheEvent| order.lock().push(i)));
        }

        bus.emit(&CacheEvent::Prune { count: 0 });

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let bus = EventBus::new();
        bus.subscribe(Arc::new(|_: &CacheEvent| panic!("boom")));
        let (seen, handler) = recorder();
        bus.subscribe(handler);

        bus.emit(&CacheEvent::Expire { key: "a".into() });

        assert_eq!(*seen.lock(), vec!["expire"]);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(Arc::new(move |_: &CacheEvent| {
            inner.subscribe(Arc::new(|_: &CacheEvent| {}));
        }));

        bus.emit(&CacheEvent::Hit { key: "a".into() });

        assert_eq!(bus.handler_count(), 2);
    }

    #[test]
    fn test_event_key_and_serialization() {
        let event = CacheEvent::Evict {
            key: "a".into(),
            strategy: "lru".into(),
        };
        assert_eq!(event.key(), Some("a"));
        assert_eq!(CacheEvent::Clear { count: 1 }.key(), None);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "evict");
        assert_eq!(json["strategy"], "lru");
    }
}
