//! Change notifications for pods and rollouts.

use std::fmt;

use crate::error::Error;
use crate::store::{Pod, Rollout};

/// Uniquely identifies a namespaced object of a known kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// The object namespace
    pub namespace: String,
    /// The object name
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Rejects keys that can never resolve to an object.
    pub fn validate(&self) -> Result<(), Error> {
        if self.namespace.is_empty() || self.name.is_empty() {
            return Err(Error::MalformedKey(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Pod,
    Rollout,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Pod => "pod",
            ObjectKind::Rollout => "rollout",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
}

/// An observed object in its canonical form.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Pod(Pod),
    Rollout(Rollout),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Pod(_) => ObjectKind::Pod,
            Object::Rollout(_) => ObjectKind::Rollout,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        match self {
            Object::Pod(pod) => &pod.key,
            Object::Rollout(rollout) => &rollout.key,
        }
    }
}

/// A single create, update or delete notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub change: ChangeKind,
    /// The object state carried by the notification; for deletes, the last known state.
    pub object: Object,
}

impl ChangeEvent {
    pub fn new(change: ChangeKind, object: Object) -> Self {
        Self { change, object }
    }

    pub fn kind(&self) -> ObjectKind {
        self.object.kind()
    }

    pub fn key(&self) -> &ObjectKey {
        self.object.key()
    }
}

pub mod objects;
pub use objects::{objects, with};
