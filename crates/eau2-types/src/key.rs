use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a node in the cluster.
///
/// Ids are handed out by the registrar in registration order and never
/// reused. [`REGISTRAR_ID`] is reserved for the registrar itself.
pub type NodeId = u64;

/// The registrar is always node 0.
pub const REGISTRAR_ID: NodeId = 0;

/// Name of a stored table together with the node that owns it.
///
/// Two keys are equal only when both the name and the home node match, so
/// the same name may live on several nodes as unrelated objects. Keys are
/// immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    name: String,
    home: NodeId,
}

impl Key {
    pub fn new(name: impl Into<String>, home: NodeId) -> Self {
        Self {
            name: name.into(),
            home,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node that owns this key and answers requests for it.
    pub fn home(&self) -> NodeId {
        self.home
    }

    pub fn is_owned_by(&self, node: NodeId) -> bool {
        self.home == node
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.home)
    }
}
