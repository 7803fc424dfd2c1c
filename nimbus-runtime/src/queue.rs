//! Per-key work queue.
//!
//! Guarantees that a key is processed by at most one worker at a time:
//! - a key already waiting in the queue is not queued twice
//! - a key enqueued while a worker holds it is marked dirty and re-queued
//!   when the worker releases its [`Lease`]

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

struct QueueState<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    shutting_down: bool,
}

/// Deduplicating FIFO of keys with at-most-one-in-flight per key.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        // The state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a key. No-op if it is already queued or the queue is shut down.
    pub fn enqueue(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down || state.queued.contains(&key) {
            return;
        }
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        state.queued.insert(key.clone());
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add a key after a delay.
    pub fn enqueue_after(self: &Arc<Self>, key: K, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn acquire(self: &Arc<Self>) -> Option<Lease<K>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(Lease {
                        queue: Arc::clone(self),
                        key,
                    });
                }
            }

            notified.await;
        }
    }

    fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) && !state.shutting_down {
            state.queued.insert(key.clone());
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys waiting (not counting keys being processed).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive claim on a key. Releasing it (drop) lets the key be processed again.
pub struct Lease<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    queue: Arc<WorkQueue<K>>,
    key: K,
}

impl<K> Lease<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for Lease<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deduplicates_queued_keys() {
        let queue = Arc::new(WorkQueue::new());
        queue.enqueue("a");
        queue.enqueue("a");
        queue.enqueue("b");
        assert_eq!(queue.len(), 2);

        let first = queue.acquire().await.unwrap();
        assert_eq!(*first.key(), "a");
    }

    #[tokio::test]
    async fn test_key_in_flight_is_not_handed_out_twice() {
        let queue = Arc::new(WorkQueue::new());
        queue.enqueue("a");
        let lease = queue.acquire().await.unwrap();

        // Enqueued while processing: held back until the lease is released.
        queue.enqueue("a");
        assert!(queue.is_empty());

        drop(lease);
        assert_eq!(queue.len(), 1);
        let again = queue.acquire().await.unwrap();
        assert_eq!(*again.key(), "a");
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let queue: Arc<WorkQueue<&'static str>> = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.acquire().await.is_none() })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_delay() {
        let queue = Arc::new(WorkQueue::new());
        queue.enqueue_after("a", Duration::from_secs(30));
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_workers_get_distinct_keys() {
        let queue = Arc::new(WorkQueue::new());
        queue.enqueue("a");
        queue.enqueue("b");

        let l1 = queue.acquire().await.unwrap();
        let l2 = queue.acquire().await.unwrap();
        assert_ne!(l1.key(), l2.key());
    }
}
