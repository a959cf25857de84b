use std::sync::Arc;

use super::Reconciler;
use crate::error::Error;
use crate::queue::WorkQueue;
use crate::store::{LabelSelector, ObjectStore};
use crate::subscriber::ObjectKey;

/// Requeues every pod labelled as belonging to a rollout.
///
/// Deliberately does not read `status.stableRS`: the pod reconciler fetches it
/// fresh when it processes each pod, so a value read here could only be staler.
pub struct RolloutReconciler<S> {
    store: Arc<S>,
    pod_queue: Arc<WorkQueue<ObjectKey>>,
    association_label: String,
}

impl<S: ObjectStore> RolloutReconciler<S> {
    pub fn new(
        store: Arc<S>,
        pod_queue: Arc<WorkQueue<ObjectKey>>,
        association_label: impl Into<String>,
    ) -> Self {
        Self {
            store,
            pod_queue,
            association_label: association_label.into(),
        }
    }

    pub async fn process_rollout(&self, key: &ObjectKey) -> Result<(), Error> {
        key.validate()?;

        let selector =
            LabelSelector::new().equals(self.association_label.as_str(), key.name.as_str());
        let pods = self.store.list_pods(&key.namespace, &selector)?;
        log::debug!("Rollout {key} has {} pods to requeue", pods.len());

        for pod in pods {
            self.pod_queue.add_rate_limited(pod.key);
        }
        Ok(())
    }
}

impl<S: ObjectStore> Reconciler for RolloutReconciler<S> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), Error> {
        self.process_rollout(key).await
    }
}
