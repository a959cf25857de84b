use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::subscriber::ObjectKey;

/// Processes keys from `queue` one at a time until the queue shuts down.
pub async fn run_worker<R: Reconciler>(queue: Arc<WorkQueue<ObjectKey>>, reconciler: Arc<R>) {
    log::info!("Starting {} worker", queue.name());
    while process_next_work_item(&queue, reconciler.as_ref()).await {}
    log::info!("Shutting down {} worker", queue.name());
}

/// Takes one key off the queue and reconciles it.
///
/// Returns `false` once the queue has shut down. Failures never stop the loop:
/// retryable ones put the key back with backoff, the rest are dropped.
pub(crate) async fn process_next_work_item<R: Reconciler>(
    queue: &Arc<WorkQueue<ObjectKey>>,
    reconciler: &R,
) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };
    log::debug!("Processing {}: {key}", queue.name());

    let result = AssertUnwindSafe(reconciler.reconcile(&key))
        .catch_unwind()
        .await;
    match result {
        Ok(Ok(())) => queue.forget(&key),
        Ok(Err(err)) if err.is_retryable() => {
            log::warn!("Failed to process {} {key}, requeueing: {err}", queue.name());
            queue.add_rate_limited(key.clone());
        }
        Ok(Err(err)) => {
            log::error!("Dropping {} {key}: {err}", queue.name());
            queue.forget(&key);
        }
        Err(_) => {
            log::error!("Processing {} {key} panicked, requeueing", queue.name());
            queue.add_rate_limited(key.clone());
        }
    }
    queue.done(&key);
    true
}
