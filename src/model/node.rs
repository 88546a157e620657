//! Node handle carried through operator records.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::LabelId;

/// Opaque node identifier. Doubles as the row/column index of the node
/// in every label, relation, and adjacency matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node reference: id plus the label set it carried when resolved.
///
/// Property access goes through the graph's entity store; records hold
/// only this lightweight handle for the lifetime of the query's latch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub labels: SmallVec<[LabelId; 2]>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self { id, labels: SmallVec::new() }
    }

    pub fn with_labels(id: NodeId, labels: impl IntoIterator<Item = LabelId>) -> Self {
        Self { id, labels: labels.into_iter().collect() }
    }

    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }
}
