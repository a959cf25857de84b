//! Read and write access to pods and rollouts.
//!
//! Reads go through a possibly-stale local cache ([`ObjectStore`]); the only
//! write is a single label patch on a pod ([`PodPatcher`]). Both are shared by
//! all workers, so implementations must be thread-safe.

use std::collections::BTreeMap;
use std::future::Future;

use crate::error::{PatchError, StoreError};
use crate::subscriber::{Object, ObjectKey};

pub mod kube;
pub mod memory;

/// The pod attributes consumed by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub key: ObjectKey,
    pub labels: BTreeMap<String, String>,
}

impl Pod {
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// The rollout attributes consumed by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollout {
    pub key: ObjectKey,
    /// `status.stableRS`; empty if the rollout has not promoted a replica set yet.
    pub stable_rs: String,
}

impl Rollout {
    pub fn new(key: ObjectKey, stable_rs: impl Into<String>) -> Self {
        Self {
            key,
            stable_rs: stable_rs.into(),
        }
    }
}

/// A conjunction of `label == value` requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.insert(label.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(label, value)| labels.get(label) == Some(value))
    }
}

/// Point-in-time lookups against the local object cache.
///
/// A missing object is `Ok(None)`, never an error.
pub trait ObjectStore: Send + Sync + 'static {
    fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, StoreError>;

    fn get_rollout(&self, key: &ObjectKey) -> Result<Option<Rollout>, StoreError>;

    fn list_pods(&self, namespace: &str, selector: &LabelSelector)
        -> Result<Vec<Pod>, StoreError>;

    /// Keys of every cached pod, for periodic resync.
    fn pod_keys(&self) -> Result<Vec<ObjectKey>, StoreError>;

    /// Keys of every cached rollout, for periodic resync.
    fn rollout_keys(&self) -> Result<Vec<ObjectKey>, StoreError>;

    /// Resolves once the cache has completed its initial listing.
    ///
    /// Workers are not started before this resolves, so an implementation
    /// that returns early lets lookups treat a half-filled cache as
    /// authoritative.
    fn wait_until_ready(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// The single mutation the controller performs.
pub trait PodPatcher: Send + Sync + 'static {
    /// Sets `label` to `value` on the pod, leaving other labels untouched.
    fn patch_pod_label(
        &self,
        key: &ObjectKey,
        label: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), PatchError>> + Send;
}

/// Conversion of a wire object into the controller's canonical representation.
pub trait Canonical {
    fn canonical(&self) -> Result<Object, StoreError>;
}
