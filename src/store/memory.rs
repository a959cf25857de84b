//! An in-process [`ObjectStore`] and [`PodPatcher`].
//!
//! Patches are applied to the stored pods and recorded, and failures can be
//! scripted ahead of time, which makes this the collaborator of choice for
//! exercising the reconcilers without an apiserver.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::{LabelSelector, ObjectStore, Pod, PodPatcher, Rollout};
use crate::error::{PatchError, StoreError};
use crate::subscriber::ObjectKey;

/// A recorded [`PodPatcher::patch_pod_label`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchCall {
    pub key: ObjectKey,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Failed,
}

pub struct MemoryStore {
    pods: RwLock<BTreeMap<ObjectKey, Pod>>,
    rollouts: RwLock<BTreeMap<ObjectKey, Rollout>>,
    patches: Mutex<Vec<PatchCall>>,
    scripted_failures: Mutex<VecDeque<PatchError>>,
    readiness: watch::Sender<Readiness>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_readiness(Readiness::Ready)
    }
}

impl MemoryStore {
    /// A store whose cache counts as synced from the start.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that holds [`ObjectStore::wait_until_ready`] until
    /// [`mark_ready`](Self::mark_ready) or [`mark_failed`](Self::mark_failed).
    pub fn pending() -> Self {
        Self::with_readiness(Readiness::Pending)
    }

    fn with_readiness(readiness: Readiness) -> Self {
        Self {
            pods: RwLock::default(),
            rollouts: RwLock::default(),
            patches: Mutex::default(),
            scripted_failures: Mutex::default(),
            readiness: watch::channel(readiness).0,
        }
    }

    pub fn mark_ready(&self) {
        self.readiness.send_replace(Readiness::Ready);
    }

    /// Makes pending and future cache sync waits fail.
    pub fn mark_failed(&self) {
        self.readiness.send_replace(Readiness::Failed);
    }

    pub fn insert_pod(&self, pod: Pod) {
        self.pods.write().insert(pod.key.clone(), pod);
    }

    pub fn remove_pod(&self, key: &ObjectKey) -> Option<Pod> {
        self.pods.write().remove(key)
    }

    pub fn pod(&self, key: &ObjectKey) -> Option<Pod> {
        self.pods.read().get(key).cloned()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.pods.read().values().cloned().collect()
    }

    pub fn insert_rollout(&self, rollout: Rollout) {
        self.rollouts.write().insert(rollout.key.clone(), rollout);
    }

    pub fn remove_rollout(&self, key: &ObjectKey) -> Option<Rollout> {
        self.rollouts.write().remove(key)
    }

    pub fn rollout(&self, key: &ObjectKey) -> Option<Rollout> {
        self.rollouts.read().get(key).cloned()
    }

    /// Makes the next patch call fail with `err` instead of applying.
    pub fn fail_next_patch(&self, err: PatchError) {
        self.scripted_failures.lock().push_back(err);
    }

    /// Every patch call made so far, including failed ones.
    pub fn patches(&self) -> Vec<PatchCall> {
        self.patches.lock().clone()
    }
}

impl ObjectStore for MemoryStore {
    fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, StoreError> {
        Ok(self.pod(key))
    }

    fn get_rollout(&self, key: &ObjectKey) -> Result<Option<Rollout>, StoreError> {
        Ok(self.rollout(key))
    }

    fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, StoreError> {
        Ok(self
            .pods
            .read()
            .values()
            .filter(|pod| pod.key.namespace == namespace && selector.matches(&pod.labels))
            .cloned()
            .collect())
    }

    fn pod_keys(&self) -> Result<Vec<ObjectKey>, StoreError> {
        Ok(self.pods.read().keys().cloned().collect())
    }

    fn rollout_keys(&self) -> Result<Vec<ObjectKey>, StoreError> {
        Ok(self.rollouts.read().keys().cloned().collect())
    }

    async fn wait_until_ready(&self) -> Result<(), StoreError> {
        let mut readiness = self.readiness.subscribe();
        let state = *readiness
            .wait_for(|state| *state != Readiness::Pending)
            .await
            .map_err(|_| StoreError::Unavailable)?;
        match state {
            Readiness::Ready => Ok(()),
            Readiness::Pending | Readiness::Failed => Err(StoreError::Unavailable),
        }
    }
}

impl PodPatcher for MemoryStore {
    async fn patch_pod_label(
        &self,
        key: &ObjectKey,
        label: &str,
        value: &str,
    ) -> Result<(), PatchError> {
        self.patches.lock().push(PatchCall {
            key: key.clone(),
            label: label.to_owned(),
            value: value.to_owned(),
        });
        if let Some(err) = self.scripted_failures.lock().pop_front() {
            return Err(err);
        }
        match self.pods.write().get_mut(key) {
            Some(pod) => {
                pod.labels.insert(label.to_owned(), value.to_owned());
                Ok(())
            }
            None => Err(PatchError::NotFound(key.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pending_store_waits_for_mark_ready() {
        let store = MemoryStore::pending();
        let wait = tokio::time::timeout(Duration::from_secs(1), store.wait_until_ready());
        assert!(wait.await.is_err());

        store.mark_ready();
        store.wait_until_ready().await.unwrap();
    }

    #[tokio::test]
    async fn failed_store_reports_unavailable() {
        let store = MemoryStore::pending();
        store.mark_failed();
        assert!(matches!(
            store.wait_until_ready().await,
            Err(StoreError::Unavailable)
        ));
    }

    #[test]
    fn keys_cover_every_stored_object() {
        let store = MemoryStore::new();
        store.insert_pod(Pod::new(ObjectKey::new("ns", "p1")));
        store.insert_pod(Pod::new(ObjectKey::new("other", "p2")));
        store.insert_rollout(Rollout::new(ObjectKey::new("ns", "r1"), "v1"));

        assert_eq!(
            store.pod_keys().unwrap(),
            [ObjectKey::new("ns", "p1"), ObjectKey::new("other", "p2")]
        );
        assert_eq!(store.rollout_keys().unwrap(), [ObjectKey::new("ns", "r1")]);

        store.remove_pod(&ObjectKey::new("ns", "p1"));
        assert_eq!(store.pod_keys().unwrap(), [ObjectKey::new("other", "p2")]);
    }
}
