//! Undo log for the single writer.
//!
//! Entity-store mutations apply immediately so the writing query reads
//! its own writes; matrix mutations stage in pending buffers. On
//! cancellation or error the pending buffers are discarded and this log
//! is replayed in reverse, so no partial write ever escapes the query.

use crate::hexastore::Triplet;
use crate::model::{AttrId, EdgeId, LabelId, NodeId, Value};

/// One reversible mutation.
#[derive(Debug)]
pub enum UndoOp {
    CreateNode(NodeId),
    CreateEdge { id: EdgeId, triplet: Triplet },
    DeleteNode { id: NodeId },
    DeleteEdge { id: EdgeId, triplet: Triplet },
    SetNodeProp { id: NodeId, attr: AttrId, old: Option<Value> },
    SetEdgeProp { id: EdgeId, attr: AttrId, old: Option<Value> },
    AddLabel { id: NodeId, label: LabelId },
    RemoveLabel { id: NodeId, label: LabelId },
}

/// Append-only mutation journal, cleared at commit.
#[derive(Debug, Default)]
pub struct UndoLog {
    ops: Vec<UndoOp>,
}

impl UndoLog {
    pub fn record(&mut self, op: UndoOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Drain in reverse application order.
    pub fn drain_reverse(&mut self) -> impl Iterator<Item = UndoOp> + '_ {
        std::mem::take(&mut self.ops).into_iter().rev()
    }
}
