//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Define the upstream connection lifecycle (Connecting → Connected → ...)
//! - Generate unique connection IDs so a reused name is a new incarnation
//! - Track in-flight inbound connections for graceful shutdown

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a registered upstream connection.
///
/// ```text
/// Connecting ─▶ Connected ─▶ Idle
///     │             │          │
///     └─────────────┴──────────┴──▶ Closed | Errored | TimedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Transport is being established.
    Connecting,
    /// Transport is up and carrying traffic.
    Connected,
    /// Keep-alive interval elapsed without traffic. Still usable.
    Idle,
    /// Closed gracefully, locally or by the peer.
    Closed,
    /// Failed with a transport error.
    Errored,
    /// Connect deadline or idle timeout expired.
    TimedOut,
}

impl ConnectionState {
    /// Terminal states remove the connection from the registry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Closed | ConnectionState::Errored | ConnectionState::TimedOut
        )
    }

    /// Whether data may be sent or received in this state.
    pub fn can_transfer(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Idle)
    }

    /// Whether `self → next` is a legal one-way transition.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Connecting, Connected) => true,
            (Connected, Idle) => true,
            (from, to) if !from.is_terminal() && to.is_terminal() => true,
            _ => false,
        }
    }
}

/// Tracks in-flight inbound connections for graceful shutdown.
///
/// Guards decrement the count on drop; [`ConnectionTracker::wait_idle`]
/// resolves once the count reaches zero.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
    /// Woken whenever a guard is dropped.
    drained: Arc<Notify>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            drained: Arc::clone(&self.drained),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all tracked connections are closed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.drained.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait until all tracked connections are closed or `grace` elapses.
    ///
    /// Returns false if connections were still open at the deadline.
    pub async fn wait_idle_for(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.wait_idle()).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    drained: Arc<Notify>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        self.drained.notify_waiters();
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn transitions_are_one_way() {
        use ConnectionState::*;
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(TimedOut));
        assert!(Connected.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Closed));
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Errored));
        assert!(!Closed.can_transition_to(Connected));
    }

    #[test]
    fn transfer_states() {
        assert!(ConnectionState::Connected.can_transfer());
        assert!(ConnectionState::Idle.can_transfer());
        assert!(!ConnectionState::Connecting.can_transfer());
        assert!(!ConnectionState::Closed.can_transfer());
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_resolves_after_last_guard() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let t = tracker.clone();
        let waiter = tokio::spawn(async move { t.wait_idle().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(tracker.wait_idle_for(Duration::from_millis(10)).await);
    }
}
