//! Rate-limited work queue.
//!
//! Watchers push object keys, workers pull them. The queue guarantees:
//! - a key is pending at most once (repeated adds are absorbed)
//! - a key is processed by at most one worker at a time; a key added while
//!   in flight is re-queued when the worker calls `done`
//! - failed keys come back after a per-key exponential delay
//!   (`add_rate_limited`), reset by `forget`

use crate::backoff::ExponentialBackoff;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Per-key failure tracking for rate-limited requeues.
#[derive(Debug)]
struct RateLimiter<T> {
    base: Duration,
    max: Duration,
    backoffs: HashMap<T, ExponentialBackoff>,
}

impl<T: Eq + Hash> RateLimiter<T> {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            backoffs: HashMap::new(),
        }
    }

    fn when(&mut self, item: T) -> Duration {
        let (base, max) = (self.base, self.max);
        self.backoffs
            .entry(item)
            .or_insert_with(|| ExponentialBackoff::new(base, max))
            .next_backoff()
    }

    fn forget(&mut self, item: &T) {
        self.backoffs.remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.backoffs.get(item).map_or(0, ExponentialBackoff::failures)
    }
}

#[derive(Debug)]
struct QueueState<T> {
    /// Keys waiting for a worker, in arrival order
    queue: VecDeque<T>,
    /// Keys that need processing (queued, or re-added while in flight)
    dirty: HashSet<T>,
    /// Keys currently held by a worker
    processing: HashSet<T>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner<T> {
    name: &'static str,
    state: Mutex<QueueState<T>>,
    limiter: Mutex<RateLimiter<T>>,
    notify: Notify,
}

/// Deduplicating, rate-limited work queue. Cheap to clone.
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    /// Creates a named queue whose rate limiter starts at `base` and doubles
    /// per consecutive failure up to `max`.
    pub fn new(name: &'static str, base: Duration, max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                limiter: Mutex::new(RateLimiter::new(base, max)),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limiter(&self) -> MutexGuard<'_, RateLimiter<T>> {
        self.inner.limiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `item` as needing processing.
    pub fn add(&self, item: T) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(item.clone()) {
            // Already pending
            return;
        }
        if state.processing.contains(&item) {
            // Picked up again by done()
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Waits for the next key. Returns `None` once the queue is shut down and
    /// drained.
    ///
    /// Every key returned must be handed back through [`WorkQueue::done`].
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an add() in between is not missed
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Releases `item` after processing, whatever the outcome.
    pub fn done(&self, item: &T) {
        let mut state = self.state();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clears the failure history of `item`.
    pub fn forget(&self, item: &T) {
        self.limiter().forget(item);
    }

    /// Adds `item` after its next backoff delay.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.limiter().when(item.clone());
        debug!("{} queue: requeue {:?} in {:?}", self.inner.name, item, delay);
        self.add_after(item, delay);
    }

    /// Adds `item` once `delay` has elapsed.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Number of consecutive rate-limited requeues of `item`
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter().num_requeues(item)
    }

    /// Number of keys waiting for a worker
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Returns true if no key is waiting for a worker
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting keys and wakes all waiting workers.
    pub fn shutdown(&self) {
        info!("Shutting down {} queue", self.inner.name);
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new("test", Duration::from_millis(5), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_add_deduplicates_pending_keys() {
        let queue = queue();
        queue.add("node-a".to_string());
        queue.add("node-a".to_string());
        queue.add("node-b".to_string());

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.as_deref(), Some("node-a"));
        assert_eq!(queue.get().await.as_deref(), Some("node-b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_added_while_processing_waits_for_done() {
        let queue = queue();
        queue.add("node-a".to_string());
        let key = queue.get().await.unwrap();

        queue.add("node-a".to_string());
        queue.add("node-a".to_string());
        // Not handed to a second worker while in flight
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = queue();
        queue.add("node-a".to_string());
        let key = queue.get().await.unwrap();
        queue.done(&key);

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = queue();
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.add("ns/pod".to_string());

        let key = tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
        assert_eq!(key.as_deref(), Some("ns/pod"));
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiting_workers() {
        let queue = queue();
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.shutdown();

        let key = tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
        assert_eq!(key, None);

        // Adds after shutdown are ignored
        queue.add("node-a".to_string());
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_delays_and_counts() {
        let queue = queue();
        queue.add_rate_limited("node-a".to_string());
        assert!(queue.is_empty());
        assert_eq!(queue.num_requeues(&"node-a".to_string()), 1);

        let start = tokio::time::Instant::now();
        let key = queue.get().await;
        assert_eq!(key.as_deref(), Some("node-a"));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_grows_until_forget() {
        let queue = queue();
        let key = "node-a".to_string();

        for expected in [5u64, 10, 20, 40] {
            let start = tokio::time::Instant::now();
            queue.add_rate_limited(key.clone());
            let got = queue.get().await.unwrap();
            assert!(start.elapsed() >= Duration::from_millis(expected));
            queue.done(&got);
        }
        assert_eq!(queue.num_requeues(&key), 4);

        queue.forget(&key);
        assert_eq!(queue.num_requeues(&key), 0);

        let start = tokio::time::Instant::now();
        queue.add_rate_limited(key.clone());
        queue.get().await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
