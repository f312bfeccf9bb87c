//! Bounded-concurrency admission queue with FIFO hand-off.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug)]
struct State {
    running: usize,
    waiters: VecDeque<oneshot::Sender<AdmissionPermit>>,
}

#[derive(Debug)]
struct Inner {
    max: usize,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Limits the number of concurrently active connections or requests.
///
/// Cloning is cheap; all clones share the same counter and wait-list.
#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    inner: Arc<Inner>,
}

impl AdmissionQueue {
    /// Create a queue admitting at most `max` holders at a time.
    ///
    /// A `max` of zero is treated as one so that callers cannot deadlock.
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max: max.max(1),
                state: Mutex::new(State {
                    running: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Acquire a slot, waiting in arrival order if none is free.
    ///
    /// Never fails. Dropping the returned future while queued gives up the
    /// place in line; a slot granted to an abandoned waiter is passed on.
    pub async fn acquire(&self) -> AdmissionPermit {
        let rx = {
            let mut state = self.inner.lock();
            if state.running < self.inner.max && state.waiters.is_empty() {
                state.running += 1;
                return AdmissionPermit::armed(self.inner.clone());
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        tracing::trace!(queued = self.queued(), "Admission slot unavailable, waiting");

        match rx.await {
            Ok(permit) => permit,
            // Senders are only dropped after a successful hand-off or when the
            // whole queue is dropped, which cannot happen while `self` lives.
            Err(_) => Box::pin(self.acquire()).await,
        }
    }

    /// Acquire a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        let mut state = self.inner.lock();
        if state.running < self.inner.max && state.waiters.is_empty() {
            state.running += 1;
            Some(AdmissionPermit::armed(self.inner.clone()))
        } else {
            None
        }
    }

    /// Return a slot. Equivalent to dropping the permit.
    pub fn release(&self, permit: AdmissionPermit) {
        drop(permit);
    }

    /// Number of slots currently held.
    pub fn running(&self) -> usize {
        self.inner.lock().running
    }

    /// Number of callers parked waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Configured maximum concurrency.
    pub fn max(&self) -> usize {
        self.inner.max
    }
}

/// Permission to hold one active resource. Released exactly once, on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    inner: Option<Arc<Inner>>,
}

impl AdmissionPermit {
    fn armed(inner: Arc<Inner>) -> Self {
        Self { inner: Some(inner) }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        let mut state = inner.lock();
        let mut permit = AdmissionPermit::armed(inner.clone());
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(permit) {
                Ok(()) => return,
                // Waiter gave up; try the next one.
                Err(returned) => permit = returned,
            }
        }
        state.running -= 1;
        // Disarm so the hand-off permit does not release a second time.
        permit.inner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn grants_up_to_max_immediately() {
        let queue = AdmissionQueue::new(2);
        let p1 = queue.acquire().await;
        let p2 = queue.acquire().await;
        assert_eq!(queue.running(), 2);
        assert!(queue.try_acquire().is_none());

        drop(p1);
        assert_eq!(queue.running(), 1);
        drop(p2);
        assert_eq!(queue.running(), 0);
    }

    #[tokio::test]
    async fn waiters_are_released_in_fifo_order() {
        let queue = AdmissionQueue::new(1);
        let first = queue.acquire().await;

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for i in 0..3 {
            let q = queue.clone();
            let tx = order_tx.clone();
            handles.push(tokio::spawn(async move {
                let permit = q.acquire().await;
                tx.send(i).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(permit);
            }));
            // Make arrival order deterministic.
            while queue.queued() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(queue.running(), 1);
        drop(first);

        for handle in handles {
            handle.await.unwrap();
        }
        let mut order = Vec::new();
        while let Ok(i) = order_rx.try_recv() {
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(queue.running(), 0);
        assert_eq!(queue.queued(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_leak_slot() {
        let queue = AdmissionQueue::new(1);
        let held = queue.acquire().await;

        let q = queue.clone();
        let abandoned = tokio::spawn(async move {
            let _ = q.acquire().await;
        });
        while queue.queued() < 1 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        let _ = abandoned.await;

        drop(held);
        assert_eq!(queue.running(), 0);
        let again = tokio::time::timeout(Duration::from_millis(100), queue.acquire())
            .await
            .expect("slot should be free");
        assert_eq!(queue.running(), 1);
        queue.release(again);
        assert_eq!(queue.running(), 0);
    }

    #[test]
    fn zero_max_is_clamped() {
        let queue = AdmissionQueue::new(0);
        assert_eq!(queue.max(), 1);
        assert!(queue.try_acquire().is_some());
    }
}
