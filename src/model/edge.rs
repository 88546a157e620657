//! Edge (relationship) handle carried through operator records.

use serde::{Deserialize, Serialize};

use super::{NodeId, RelTypeId};

/// Opaque edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// An edge reference: id, endpoints, and relationship type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub src: NodeId,
    pub dst: NodeId,
    pub rel_type: RelTypeId,
}

impl Edge {
    pub fn new(id: EdgeId, src: NodeId, dst: NodeId, rel_type: RelTypeId) -> Self {
        Self { id, src, dst, rel_type }
    }

    /// The "other" end of the edge from the given node.
    pub fn other_node(&self, from: NodeId) -> Option<NodeId> {
        if from == self.src {
            Some(self.dst)
        } else if from == self.dst {
            Some(self.src)
        } else {
            None
        }
    }
}
