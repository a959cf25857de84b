use std::sync::Arc;

use super::Reconciler;
use crate::config::Labels;
use crate::error::{Error, PatchError};
use crate::store::{ObjectStore, PodPatcher};
use crate::subscriber::ObjectKey;

/// Copies the owning rollout's `status.stableRS` onto the pod's stable label.
pub struct PodReconciler<S, P> {
    store: Arc<S>,
    patcher: Arc<P>,
    labels: Labels,
}

impl<S: ObjectStore, P: PodPatcher> PodReconciler<S, P> {
    pub fn new(store: Arc<S>, patcher: Arc<P>, labels: Labels) -> Self {
        Self {
            store,
            patcher,
            labels,
        }
    }

    pub async fn process_pod(&self, key: &ObjectKey) -> Result<(), Error> {
        key.validate()?;

        let Some(pod) = self.store.get_pod(key)? else {
            log::debug!("Pod {key} not found, likely was deleted, skipping");
            return Ok(());
        };

        let rollout_name = match pod.label(&self.labels.association) {
            Some(name) if !name.is_empty() => name,
            Some(_) => {
                log::debug!("Pod {key} has an empty rollout label, skipping");
                return Ok(());
            }
            None => {
                log::debug!("Pod {key} does not have a rollout label, skipping");
                return Ok(());
            }
        };

        let rollout_key = ObjectKey::new(key.namespace.as_str(), rollout_name);
        let Some(rollout) = self.store.get_rollout(&rollout_key)? else {
            log::info!("Rollout {rollout_key} referenced by pod {key} not found, skipping");
            return Ok(());
        };

        if pod.label(&self.labels.stable) == Some(rollout.stable_rs.as_str()) {
            return Ok(());
        }

        log::info!("Updating pod {key} to {}", rollout.stable_rs);
        match self
            .patcher
            .patch_pod_label(key, &self.labels.stable, &rollout.stable_rs)
            .await
        {
            Ok(()) => Ok(()),
            Err(PatchError::NotFound(_)) => {
                log::debug!("Pod {key} disappeared before it could be patched");
                Ok(())
            }
            Err(err) => {
                log::warn!("Error patching pod {key} to {}: {err}", rollout.stable_rs);
                Err(err.into())
            }
        }
    }
}

impl<S: ObjectStore, P: PodPatcher> Reconciler for PodReconciler<S, P> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), Error> {
        self.process_pod(key).await
    }
}
