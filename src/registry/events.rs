//! Lifecycle event bus.
//!
//! Subscribers are plain callbacks invoked synchronously, in subscription
//! order, by the task that performed the transition. Callbacks must not
//! block; forward to a channel if work is needed.

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Discriminant of a [`LifecycleEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Idle,
    Timeout,
    Error,
    Closed,
    DataSent,
    DataReceived,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Idle => "idle",
            EventKind::Timeout => "timeout",
            EventKind::Error => "error",
            EventKind::Closed => "closed",
            EventKind::DataSent => "data_sent",
            EventKind::DataReceived => "data_received",
        }
    }
}

/// A named notification about one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected { name: String },
    Idle { name: String },
    Timeout { name: String },
    Error { name: String, cause: String },
    Closed { name: String },
    DataSent { name: String, bytes: usize },
    DataReceived { name: String, bytes: usize },
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::Connected { .. } => EventKind::Connected,
            LifecycleEvent::Idle { .. } => EventKind::Idle,
            LifecycleEvent::Timeout { .. } => EventKind::Timeout,
            LifecycleEvent::Error { .. } => EventKind::Error,
            LifecycleEvent::Closed { .. } => EventKind::Closed,
            LifecycleEvent::DataSent { .. } => EventKind::DataSent,
            LifecycleEvent::DataReceived { .. } => EventKind::DataReceived,
        }
    }

    /// Name of the connection the event is about.
    pub fn name(&self) -> &str {
        match self {
            LifecycleEvent::Connected { name }
            | LifecycleEvent::Idle { name }
            | LifecycleEvent::Timeout { name }
            | LifecycleEvent::Error { name, .. }
            | LifecycleEvent::Closed { name }
            | LifecycleEvent::DataSent { name, .. }
            | LifecycleEvent::DataReceived { name, .. } => name,
        }
    }
}

/// Handle returned by `subscribe*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    filter: Option<EventKind>,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Observer registry for lifecycle events. Cloning shares subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<RwLock<BusInner>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, filter: Option<EventKind>, callback: Callback) -> SubscriptionId {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.subscribers.push(Subscriber {
            id,
            filter,
            callback,
        });
        id
    }

    /// Subscribe to one kind of event.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.add(Some(kind), Arc::new(callback))
    }

    /// Subscribe to every event.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(callback))
    }

    /// Receive every event on an unbounded channel.
    ///
    /// The subscription stays registered until [`EventBus::unsubscribe`];
    /// events sent after the receiver is dropped are discarded.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe_all(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != id);
        before != inner.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }

    /// Deliver `event` to every matching subscriber before returning.
    pub fn emit(&self, event: &LifecycleEvent) {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<Callback> = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            inner
                .subscribers
                .iter()
                .filter(|s| s.filter.map_or(true, |k| k == event.kind()))
                .map(|s| s.callback.clone())
                .collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn filtered_and_global_subscribers() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.subscribe(EventKind::Closed, move |e| s.lock().unwrap().push(format!("closed:{}", e.name())));
        let s = seen.clone();
        bus.subscribe_all(move |e| s.lock().unwrap().push(format!("all:{}", e.kind().as_str())));

        bus.emit(&LifecycleEvent::Connected { name: "a".into() });
        bus.emit(&LifecycleEvent::Closed { name: "a".into() });

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["all:connected", "closed:a", "all:closed"]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe_channel();
        bus.emit(&LifecycleEvent::Idle { name: "x".into() });
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&LifecycleEvent::Idle { name: "y".into() });

        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::Idle { name: "x".into() });
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
