//! The two reconcilers driven by the work queues.
//!
//! [`PodReconciler`] is the only component that writes pod labels.
//! [`RolloutReconciler`] never writes; it only fans a rollout change back out
//! to the pod queue, where each pod re-derives the current stable identifier.

use std::future::Future;

use crate::error::Error;
use crate::subscriber::ObjectKey;

mod pod;
pub use pod::PodReconciler;
mod rollout;
pub use rollout::RolloutReconciler;

/// Brings the object identified by a key in line with current cluster state.
///
/// Implementations re-read everything they need from the store on every call,
/// so any number of coalesced notifications collapse into a single pass.
pub trait Reconciler: Send + Sync + 'static {
    fn reconcile(&self, key: &ObjectKey) -> impl Future<Output = Result<(), Error>> + Send;
}
