use kube_runtime::watcher;
use thiserror::Error;

use crate::subscriber::ObjectKey;

/// Failures while reading from the object cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The cache has been torn down and can no longer serve reads.
    #[error("object cache is unavailable")]
    Unavailable,
    /// An object could not be converted into its canonical form.
    #[error("cannot convert {kind} {object}: {reason}")]
    Conversion {
        kind: &'static str,
        object: String,
        reason: String,
    },
}

impl StoreError {
    pub(crate) fn conversion(
        kind: &'static str,
        object: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conversion {
            kind,
            object: object.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of the label patch call.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("pod {0} not found")]
    NotFound(ObjectKey),
    #[error("conflicting update on pod {0}")]
    Conflict(ObjectKey),
    #[error("transient failure patching pod {key}: {reason}")]
    Transient { key: ObjectKey, reason: String },
}

/// The error type returned by a single reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error("malformed object key {0:?}")]
    MalformedKey(String),
}

impl Error {
    /// Whether requeueing the key can ever make the next attempt succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::MalformedKey(_))
    }
}

/// Items of a change feed that could not be turned into a [`ChangeEvent`](crate::subscriber::ChangeEvent).
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("watch failed: {0}")]
    Watch(#[from] watcher::Error),
    #[error("malformed notification: {0}")]
    Malformed(#[from] StoreError),
}

/// The error type returned by [`Controller::run`](crate::Controller::run).
#[derive(Debug, Error)]
pub enum RunError {
    #[error("object cache did not sync: {0}")]
    CacheSync(#[source] StoreError),
    #[error("controller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_keys_are_not_retried() {
        assert!(!Error::MalformedKey("no-slash".into()).is_retryable());
    }

    #[test]
    fn patch_and_store_failures_are_retried() {
        let key = ObjectKey::new("ns", "p1");
        assert!(Error::from(PatchError::Conflict(key.clone())).is_retryable());
        assert!(Error::from(PatchError::Transient {
            key,
            reason: "timeout".into(),
        })
        .is_retryable());
        assert!(Error::from(StoreError::Unavailable).is_retryable());
    }

    #[test]
    fn conversion_error_names_the_object() {
        let err = StoreError::conversion("rollout", "ns/r1", "status.stableRS is not a string");
        assert_eq!(
            err.to_string(),
            "cannot convert rollout ns/r1: status.stableRS is not a string"
        );
    }
}
