//! A de-duplicating, rate-limited work queue of object keys.
//!
//! A key is in at most one of two places at a time: waiting in the queue or
//! being processed by a worker. Adding a key that is being processed marks it
//! dirty, and it is queued again once the worker calls [`WorkQueue::done`].
//! This guarantees that no two workers ever process the same key concurrently.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

mod rate_limiter;
pub use rate_limiter::ItemExponentialBackoff;

pub struct WorkQueue<K> {
    name: &'static str,
    state: Mutex<State<K>>,
    limiter: Mutex<ItemExponentialBackoff<K>>,
    /// Woken when a key becomes available or the queue shuts down.
    available: Notify,
    /// Woken when the last in-flight key is released after shutdown.
    drained: Notify,
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Creates a queue whose rate-limited insertions back off from `base` up to `max`.
    pub fn new(name: &'static str, base: Duration, max: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            limiter: Mutex::new(ItemExponentialBackoff::new(base, max)),
            available: Notify::new(),
            drained: Notify::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Marks `key` as needing processing.
    ///
    /// No-op if the key is already waiting. If it is currently being processed,
    /// it is queued again when the current pass calls [`done`](Self::done).
    pub fn add(&self, key: K) {
        let mut state = self.state.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.available.notify_one();
    }

    /// Adds `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Adds `key` after the per-key exponential backoff delay.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = self.limiter.lock().when(&key);
        self.add_after(key, delay);
    }

    /// Stops tracking the backoff history of `key`.
    pub fn forget(&self, key: &K) {
        self.limiter.lock().forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.limiter.lock().num_requeues(key)
    }

    /// Waits for the next key, or returns `None` once the queue is shut down.
    ///
    /// Every key returned must be released with [`done`](Self::done).
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Releases a key returned by [`get`](Self::get).
    pub fn done(&self, key: &K) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.shutting_down {
            if state.processing.is_empty() {
                self.drained.notify_waiters();
            }
            return;
        }
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.available.notify_one();
        }
    }

    /// Rejects further additions and wakes all waiting workers with `None`.
    ///
    /// Keys that were waiting but not yet handed out are discarded.
    pub fn shut_down(&self) {
        let mut state = self.state.lock();
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        drop(state);
        self.available.notify_waiters();
    }

    /// Shuts the queue down and waits until every in-flight key is released.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            let in_flight = self.state.lock().processing.len();
            if in_flight == 0 {
                return;
            }
            log::debug!(
                "Waiting for {in_flight} in-flight keys of {} queue",
                self.name
            );
            drained.await;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys handed out and not yet released.
    pub fn in_flight(&self) -> usize {
        self.state.lock().processing.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn queue() -> Arc<WorkQueue<&'static str>> {
        WorkQueue::new("test", Duration::from_millis(1), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let q = queue();
        q.add("a");
        q.add("a");
        q.add("b");
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, Some("b"));
    }

    #[tokio::test]
    async fn key_added_while_processing_is_requeued_after_done() {
        let q = queue();
        q.add("a");
        let key = q.get().await.unwrap();

        q.add("a");
        assert!(q.is_empty(), "in-flight key must not be handed out twice");

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some("a"));
    }

    #[tokio::test]
    async fn done_without_readd_does_not_requeue() {
        let q = queue();
        q.add("a");
        let key = q.get().await.unwrap();
        q.done(&key);
        assert!(q.is_empty());
        assert_eq!(q.in_flight(), 0);
    }

    #[tokio::test]
    async fn get_blocks_until_add() {
        let q = queue();
        let getter = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.get().await }
        });
        tokio::task::yield_now().await;
        q.add("late");
        assert_eq!(getter.await.unwrap(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_add_is_delayed_by_backoff() {
        let q = queue();
        q.add_rate_limited("a");
        q.add_rate_limited("a");
        assert!(q.is_empty());
        assert_eq!(q.num_requeues(&"a"), 2);

        let got = tokio::time::timeout(Duration::from_millis(5), q.get()).await;
        assert_eq!(got.unwrap(), Some("a"));

        q.forget(&"a");
        assert_eq!(q.num_requeues(&"a"), 0);
    }

    #[tokio::test]
    async fn shutdown_wakes_waiting_workers() {
        let q = queue();
        let getter = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.get().await }
        });
        tokio::task::yield_now().await;
        q.shut_down();
        assert_eq!(getter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn shutdown_discards_waiting_keys_and_rejects_adds() {
        let q = queue();
        q.add("a");
        q.shut_down();
        q.add("b");
        assert!(q.is_empty());
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn drain_waits_for_in_flight_keys() {
        let q = queue();
        q.add("a");
        let key = q.get().await.unwrap();

        let drain = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.shut_down_with_drain().await }
        });
        tokio::task::yield_now().await;
        assert!(!drain.is_finished());

        q.done(&key);
        tokio::time::timeout(Duration::from_secs(1), drain)
            .await
            .expect("drain should finish once the key is released")
            .unwrap();
    }

    #[tokio::test]
    async fn drain_with_nothing_in_flight_returns_immediately() {
        let q = queue();
        q.add("a");
        q.shut_down_with_drain().await;
        assert!(q.is_shutting_down());
    }
}
