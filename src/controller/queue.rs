//! Deduplicating, rate-limited work queue keyed by `namespace/name`.
//!
//! At most one pending entry per key: re-adding a pending key is a no-op,
//! and a key re-added while it is being processed is queued again once
//! `done` is called for it. Failed keys come back through [`WorkQueue::requeue`]
//! with per-key exponential backoff so retries never hammer the apiserver.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Inner {
    order: VecDeque<String>,
    pending: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

pub struct WorkQueue {
    inner: Mutex<Inner>,
    ready: Notify,
    stopped: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl WorkQueue {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ready: Notify::new(),
            stopped: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut inner = self.inner.lock().unwrap();
        if inner.shutting_down || !inner.pending.insert(key.clone()) {
            return;
        }
        if inner.processing.contains(&key) {
            // signal kept in `pending`; done() re-queues it
            return;
        }
        inner.order.push_back(key);
        drop(inner);
        self.ready.notify_one();
    }

    /// Waits for the next key. Returns `None` once the queue has shut down
    /// and the already-queued items are drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let mut ready = pin!(self.ready.notified());
            ready.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(key) = inner.order.pop_front() {
                    inner.pending.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            ready.await;
        }
    }

    /// Marks a key as no longer in flight. Must be called on every exit
    /// path of processing so the key becomes eligible for a fresh add.
    pub fn done(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.remove(key);
        if inner.pending.contains(key) && !inner.shutting_down {
            inner.order.push_back(key.to_string());
            drop(inner);
            self.ready.notify_one();
        }
    }

    /// Clears the backoff state for a key after success or a deliberate drop.
    pub fn forget(&self, key: &str) {
        self.inner.lock().unwrap().failures.remove(key);
    }

    /// Re-adds a failed key after its per-key backoff delay; returns how
    /// many times the key has failed so far.
    pub fn requeue(self: &Arc<Self>, key: &str) -> u32 {
        let (attempts, delay) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.shutting_down {
                return inner.failures.get(key).copied().unwrap_or_default();
            }
            let attempts = inner.failures.entry(key.to_string()).or_default();
            *attempts += 1;
            let attempts = *attempts;
            (attempts, backoff_delay(self.base_delay, self.max_delay, attempts))
        };
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
        attempts
    }

    pub fn retries(&self, key: &str) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .failures
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.shutting_down {
                return;
            }
            inner.shutting_down = true;
        }
        self.ready.notify_waiters();
        self.ready.notify_one();
        self.stopped.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().unwrap().shutting_down
    }

    /// Resolves once the queue has been shut down.
    pub async fn closed(&self) {
        let mut stopped = pin!(self.stopped.notified());
        stopped.as_mut().enable();
        if self.is_shutting_down() {
            return;
        }
        stopped.await;
    }
}

fn backoff_delay(base: Duration, max: Duration, attempts: u32) -> Duration {
    let doublings = attempts.saturating_sub(1);
    base.saturating_mul(2u32.saturating_pow(doublings)).min(max)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{backoff_delay, WorkQueue};

    fn queue() -> Arc<WorkQueue> {
        Arc::new(WorkQueue::new(
            Duration::from_millis(10),
            Duration::from_millis(80),
        ))
    }

    #[tokio::test]
    async fn at_most_one_pending_entry_per_key() {
        let queue = queue();
        for _ in 0..5 {
            queue.add("ns1/web");
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("ns1/web"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn get_waits_for_an_add() {
        let queue = queue();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add("ns1/web");
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("get should wake on add")
            .unwrap();
        assert_eq!(got.as_deref(), Some("ns1/web"));
    }

    #[tokio::test]
    async fn add_during_processing_is_not_lost() {
        let queue = queue();
        queue.add("ns1/web");
        let key = queue.get().await.unwrap();

        // arrives while the key is in flight: depth stays zero for now
        queue.add("ns1/web");
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("ns1/web"));
    }

    #[tokio::test]
    async fn shutdown_drains_queued_items_first() {
        let queue = queue();
        queue.add("ns1/web");
        queue.shut_down();
        assert_eq!(queue.get().await.as_deref(), Some("ns1/web"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn shutdown_wakes_a_blocked_getter() {
        let queue = queue();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("get should observe shutdown")
            .unwrap();
        assert_eq!(got, None);
        queue.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_delivers_after_backoff_and_forget_resets() {
        let queue = queue();
        queue.add("ns1/web");
        let key = queue.get().await.unwrap();
        queue.done(&key);

        assert_eq!(queue.requeue(&key), 1);
        assert_eq!(queue.retries(&key), 1);
        assert_eq!(queue.get().await.as_deref(), Some("ns1/web"));

        queue.done(&key);
        assert_eq!(queue.requeue(&key), 2);
        assert_eq!(queue.get().await.as_deref(), Some("ns1/web"));
        queue.done(&key);

        queue.forget(&key);
        assert_eq!(queue.retries(&key), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(10);
        let max = Duration::from_millis(80);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_millis(40));
        assert_eq!(backoff_delay(base, max, 4), Duration::from_millis(80));
        assert_eq!(backoff_delay(base, max, 12), max);
        assert_eq!(backoff_delay(base, max, 64), max);
    }
}
