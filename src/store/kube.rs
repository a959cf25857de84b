//! [`ObjectStore`] and [`PodPatcher`] backed by reflector caches and the apiserver.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod as KubePod;
use kube_client::{Api, Client};
use kube_core::params::{Patch, PatchParams};
use kube_core::{ApiResource, DynamicObject, Resource, ResourceExt};
use kube_runtime::reflector::{ObjectRef, Store};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Canonical, LabelSelector, ObjectStore, Pod, PodPatcher, Rollout};
use crate::error::{PatchError, StoreError};
use crate::subscriber::{Object, ObjectKey};

pub struct KubeStore {
    client: Client,
    pods: Store<KubePod>,
    rollouts: Store<DynamicObject>,
    rollout_resource: ApiResource,
}

impl KubeStore {
    pub fn new(
        client: Client,
        pods: Store<KubePod>,
        rollouts: Store<DynamicObject>,
        rollout_resource: ApiResource,
    ) -> Self {
        Self {
            client,
            pods,
            rollouts,
            rollout_resource,
        }
    }
}

impl ObjectStore for KubeStore {
    fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, StoreError> {
        let obj_ref = ObjectRef::new(&key.name).within(&key.namespace);
        self.pods.get(&obj_ref).as_deref().map(pod_from).transpose()
    }

    fn get_rollout(&self, key: &ObjectKey) -> Result<Option<Rollout>, StoreError> {
        let obj_ref = ObjectRef::<DynamicObject>::new_with(&key.name, self.rollout_resource.clone())
            .within(&key.namespace);
        self.rollouts
            .get(&obj_ref)
            .as_deref()
            .map(rollout_from)
            .transpose()
    }

    fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, StoreError> {
        self.pods
            .state()
            .iter()
            .map(Arc::as_ref)
            .filter(|pod| pod.namespace().as_deref() == Some(namespace))
            .filter(|pod| selector.matches(pod.labels()))
            .map(pod_from)
            .collect()
    }

    fn pod_keys(&self) -> Result<Vec<ObjectKey>, StoreError> {
        self.pods
            .state()
            .iter()
            .map(|pod| object_key("pod", pod.as_ref()))
            .collect()
    }

    fn rollout_keys(&self) -> Result<Vec<ObjectKey>, StoreError> {
        self.rollouts
            .state()
            .iter()
            .map(|rollout| object_key("rollout", rollout.as_ref()))
            .collect()
    }

    async fn wait_until_ready(&self) -> Result<(), StoreError> {
        self.pods
            .wait_until_ready()
            .await
            .map_err(|_| StoreError::Unavailable)?;
        self.rollouts
            .wait_until_ready()
            .await
            .map_err(|_| StoreError::Unavailable)
    }
}

impl PodPatcher for KubeStore {
    async fn patch_pod_label(
        &self,
        key: &ObjectKey,
        label: &str,
        value: &str,
    ) -> Result<(), PatchError> {
        let api = Api::<KubePod>::namespaced(self.client.clone(), &key.namespace);
        let patch = Patch::Strategic(label_patch(label, value));
        match api.patch(&key.name, &PatchParams::default(), &patch).await {
            Ok(_) => Ok(()),
            Err(err) => Err(patch_error(key, err)),
        }
    }
}

fn label_patch(label: &str, value: &str) -> Value {
    json!({
        "metadata": {
            "labels": {
                label: value,
            }
        }
    })
}

fn patch_error(key: &ObjectKey, err: kube_client::Error) -> PatchError {
    match err {
        kube_client::Error::Api(resp) if resp.code == 404 => PatchError::NotFound(key.clone()),
        kube_client::Error::Api(resp) if resp.code == 409 => PatchError::Conflict(key.clone()),
        err => PatchError::Transient {
            key: key.clone(),
            reason: err.to_string(),
        },
    }
}

fn object_key<K: Resource>(kind: &'static str, obj: &K) -> Result<ObjectKey, StoreError> {
    let meta = obj.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| StoreError::conversion(kind, "<unnamed>", "missing metadata.name"))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| StoreError::conversion(kind, name.as_str(), "missing metadata.namespace"))?;
    Ok(ObjectKey::new(namespace, name))
}

fn pod_from(pod: &KubePod) -> Result<Pod, StoreError> {
    Ok(Pod {
        key: object_key("pod", pod)?,
        labels: pod.labels().clone(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct RolloutStatus {
    #[serde(rename = "stableRS", default)]
    stable_rs: Option<String>,
}

/// Reads a rollout out of its generic document form.
fn rollout_from(obj: &DynamicObject) -> Result<Rollout, StoreError> {
    let key = object_key("rollout", obj)?;
    let status = match obj.data.get("status") {
        None | Some(Value::Null) => RolloutStatus::default(),
        Some(status) => RolloutStatus::deserialize(status)
            .map_err(|err| StoreError::conversion("rollout", key.to_string(), err.to_string()))?,
    };
    Ok(Rollout::new(key, status.stable_rs.unwrap_or_default()))
}

impl Canonical for KubePod {
    fn canonical(&self) -> Result<Object, StoreError> {
        pod_from(self).map(Object::Pod)
    }
}

/// Dynamic objects are only ever watched for the rollout resource.
impl Canonical for DynamicObject {
    fn canonical(&self) -> Result<Object, StoreError> {
        rollout_from(self).map(Object::Rollout)
    }
}
