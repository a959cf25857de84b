//! rollout-stable-label keeps a label on rollout pods in sync with the
//! rollout's `status.stableRS`, so that selectors keyed on that label only
//! ever target pods of the promoted replica set.
//!
//! Two queue-driven reconcilers cooperate:
//! the pod reconciler re-reads a pod and its rollout and patches the label if
//! it diverges, while the rollout reconciler requeues every pod associated
//! with a changed rollout. Only the pod reconciler writes, so rollout changes
//! cause pod requeues, pod requeues cause patches, and patches never cause
//! rollout requeues.
//!
//! The label converges eventually: once notifications quiesce and both
//! queues drain, every pod whose rollout exists carries its current stableRS.

pub mod config;
pub use config::Config;
mod controller;
pub use controller::Controller;
pub mod error;
pub use error::{Error, FeedError, PatchError, RunError, StoreError};
pub mod queue;
pub mod reconciler;
mod runner;
pub use runner::run_worker;
pub mod store;
pub mod subscriber;
