//! Wires the change feed, the two work queues and the two reconcilers together.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{FeedError, RunError};
use crate::queue::WorkQueue;
use crate::reconciler::{PodReconciler, RolloutReconciler};
use crate::runner::run_worker;
use crate::store::{ObjectStore, PodPatcher};
use crate::subscriber::{ChangeEvent, ChangeKind, Object, ObjectKey, ObjectKind};

/// Owns both work queues and supervises the loops that drain them.
pub struct Controller<S, P> {
    config: Config,
    store: Arc<S>,
    patcher: Arc<P>,
    pod_queue: Arc<WorkQueue<ObjectKey>>,
    rollout_queue: Arc<WorkQueue<ObjectKey>>,
}

impl<S: ObjectStore, P: PodPatcher> Controller<S, P> {
    pub fn new(config: Config, store: Arc<S>, patcher: Arc<P>) -> Self {
        let pod_queue = WorkQueue::new("pod", config.backoff_base, config.backoff_max);
        let rollout_queue = WorkQueue::new("rollout", config.backoff_base, config.backoff_max);
        Self {
            config,
            store,
            patcher,
            pod_queue,
            rollout_queue,
        }
    }

    /// Routes one notification to the queue of its kind.
    ///
    /// Deletions are only logged: a deleted pod needs no label, and pods of a
    /// deleted rollout resolve to a lookup miss in the pod reconciler.
    pub fn handle_event(&self, event: ChangeEvent) {
        let kind = event.kind();
        match (event.change, event.object) {
            (ChangeKind::Deleted, Object::Pod(pod)) => {
                log::info!("{kind} deleted: {}", pod.key);
            }
            (ChangeKind::Deleted, Object::Rollout(rollout)) => {
                log::info!(
                    "{kind} deleted: {}: {:?}",
                    rollout.key,
                    rollout.stable_rs
                );
            }
            (_, Object::Pod(pod)) => self.pod_queue.add_rate_limited(pod.key),
            (_, Object::Rollout(rollout)) => self.rollout_queue.add_rate_limited(rollout.key),
        }
    }

    /// Runs until `cancel` fires, then drains in-flight work and returns.
    ///
    /// Workers and the periodic resync start once the store reports its cache
    /// as ready; the feed is consumed from the start so that the cache can
    /// fill up.
    pub async fn run<F>(self, feed: F, cancel: CancellationToken) -> Result<(), RunError>
    where
        F: Stream<Item = Result<ChangeEvent, FeedError>> + Send + 'static,
    {
        let this = Arc::new(self);
        let feed_task = tokio::spawn(Arc::clone(&this).consume_feed(feed, cancel.clone()));

        let ready = tokio::select! {
            ready = this.store.wait_until_ready() => Some(ready),
            _ = cancel.cancelled() => None,
        };
        let tasks = match ready {
            Some(Ok(())) => {
                log::info!("Caches synced, starting workers");
                let mut tasks = this.spawn_workers();
                if !this.config.resync_period.is_zero() {
                    tasks.push(tokio::spawn(Arc::clone(&this).resync(cancel.clone())));
                }
                tasks
            }
            Some(Err(err)) => {
                cancel.cancel();
                this.shut_down().await;
                feed_task.await?;
                return Err(RunError::CacheSync(err));
            }
            None => Vec::new(),
        };

        cancel.cancelled().await;
        this.shut_down().await;

        for task in tasks {
            task.await?;
        }
        feed_task.await?;
        log::info!("Controller shutdown complete");
        Ok(())
    }

    async fn shut_down(&self) {
        log::info!("Shutting down queues...");
        tokio::join!(
            self.pod_queue.shut_down_with_drain(),
            self.rollout_queue.shut_down_with_drain(),
        );
    }

    fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let pods = Arc::new(PodReconciler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.patcher),
            self.config.labels.clone(),
        ));
        let rollouts = Arc::new(RolloutReconciler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.pod_queue),
            self.config.labels.association.as_str(),
        ));

        let pod_workers = (0..self.config.pod_workers.max(1))
            .map(|_| tokio::spawn(run_worker(Arc::clone(&self.pod_queue), Arc::clone(&pods))));
        let rollout_workers = (0..self.config.rollout_workers.max(1)).map(|_| {
            tokio::spawn(run_worker(
                Arc::clone(&self.rollout_queue),
                Arc::clone(&rollouts),
            ))
        });
        pod_workers.chain(rollout_workers).collect()
    }

    /// Requeues every cached object once per resync period, so that drift the
    /// feed never reported is still corrected.
    async fn resync(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.resync_period;
        let mut ticks = time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticks.tick() => self.requeue_all(),
                _ = cancel.cancelled() => break,
            }
        }
    }

    fn requeue_all(&self) {
        let listings = [
            (ObjectKind::Pod, self.store.pod_keys(), &self.pod_queue),
            (ObjectKind::Rollout, self.store.rollout_keys(), &self.rollout_queue),
        ];
        for (kind, keys, queue) in listings {
            match keys {
                Ok(keys) => {
                    log::debug!("Resyncing {} {kind}s", keys.len());
                    for key in keys {
                        queue.add_rate_limited(key);
                    }
                }
                Err(err) => log::warn!("Cannot list {kind}s for resync: {err}"),
            }
        }
    }

    async fn consume_feed<F>(self: Arc<Self>, feed: F, cancel: CancellationToken)
    where
        F: Stream<Item = Result<ChangeEvent, FeedError>> + Send + 'static,
    {
        let mut feed = Box::pin(feed);
        loop {
            let next = tokio::select! {
                next = feed.next() => next,
                _ = cancel.cancelled() => break,
            };
            match next {
                Some(Ok(event)) => self.handle_event(event),
                Some(Err(err)) => log::warn!("Change feed error: {err}"),
                None => {
                    log::warn!("Change feed ended");
                    break;
                }
            }
        }
    }
}
