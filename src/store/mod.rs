//! # Entity Store
//!
//! Append-only, block-allocated storage for node and edge records.
//! Ids are slot indices; deletion tombstones a slot and ids are never
//! reused in-session. Matrix dimensions track the *allocated* capacity
//! of the node array, so growth here drives matrix growth in the graph.

pub mod block;

use smallvec::SmallVec;

use crate::model::{AttrId, EdgeId, LabelId, NodeId, PropertyBag, RelTypeId, Value};
use block::BlockStore;

/// A stored node record.
#[derive(Debug, Clone)]
pub struct NodeSlot {
    pub labels: SmallVec<[LabelId; 2]>,
    pub props: PropertyBag,
    deleted: bool,
}

/// A stored edge record.
#[derive(Debug, Clone)]
pub struct EdgeSlot {
    pub src: NodeId,
    pub dst: NodeId,
    pub rel_type: RelTypeId,
    pub props: PropertyBag,
    deleted: bool,
}

/// Parallel block-allocated arrays of node and edge slots.
#[derive(Debug, Default)]
pub struct EntityStore {
    nodes: BlockStore<NodeSlot>,
    edges: BlockStore<EdgeSlot>,
    live_nodes: u64,
    live_edges: u64,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Allocate a fresh node slot. Ids are monotonically increasing.
    pub fn create_node(&mut self, labels: impl IntoIterator<Item = LabelId>) -> NodeId {
        let id = self.nodes.push(NodeSlot {
            labels: labels.into_iter().collect(),
            props: PropertyBag::new(),
            deleted: false,
        });
        self.live_nodes += 1;
        NodeId(id)
    }

    pub fn create_edge(&mut self, src: NodeId, dst: NodeId, rel_type: RelTypeId) -> EdgeId {
        let id = self.edges.push(EdgeSlot {
            src,
            dst,
            rel_type,
            props: PropertyBag::new(),
            deleted: false,
        });
        self.live_edges += 1;
        EdgeId(id)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Returns `None` for unknown or tombstoned ids.
    pub fn get_node(&self, id: NodeId) -> Option<&NodeSlot> {
        self.nodes.get(id.0).filter(|s| !s.deleted)
    }

    pub fn get_edge(&self, id: EdgeId) -> Option<&EdgeSlot> {
        self.edges.get(id.0).filter(|s| !s.deleted)
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
        self.nodes.get_mut(id.0).filter(|s| !s.deleted)
    }

    pub fn get_edge_mut(&mut self, id: EdgeId) -> Option<&mut EdgeSlot> {
        self.edges.get_mut(id.0).filter(|s| !s.deleted)
    }

    pub fn node_alive(&self, id: NodeId) -> bool {
        self.get_node(id).is_some()
    }

    pub fn edge_alive(&self, id: EdgeId) -> bool {
        self.get_edge(id).is_some()
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Upsert a node property. Returns the previous value, if any.
    pub fn node_set_property(
        &mut self,
        id: NodeId,
        attr: AttrId,
        value: Value,
    ) -> Option<Option<Value>> {
        let slot = self.get_node_mut(id)?;
        Some(slot.props.insert(attr, value))
    }

    pub fn node_remove_property(&mut self, id: NodeId, attr: AttrId) -> Option<Option<Value>> {
        let slot = self.get_node_mut(id)?;
        Some(slot.props.remove(&attr))
    }

    pub fn edge_set_property(
        &mut self,
        id: EdgeId,
        attr: AttrId,
        value: Value,
    ) -> Option<Option<Value>> {
        let slot = self.get_edge_mut(id)?;
        Some(slot.props.insert(attr, value))
    }

    pub fn edge_remove_property(&mut self, id: EdgeId, attr: AttrId) -> Option<Option<Value>> {
        let slot = self.get_edge_mut(id)?;
        Some(slot.props.remove(&attr))
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Tombstone a node slot. The caller clears matrix entries through
    /// the graph's pending buffers. Returns false if already gone.
    pub fn delete_node(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(id.0) {
            Some(slot) if !slot.deleted => {
                slot.deleted = true;
                self.live_nodes -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn delete_edge(&mut self, id: EdgeId) -> bool {
        match self.edges.get_mut(id.0) {
            Some(slot) if !slot.deleted => {
                slot.deleted = true;
                self.live_edges -= 1;
                true
            }
            _ => false,
        }
    }

    /// Revive a tombstoned node (cancellation rollback path).
    pub(crate) fn revive_node(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id.0) {
            if slot.deleted {
                slot.deleted = false;
                self.live_nodes += 1;
            }
        }
    }

    pub(crate) fn revive_edge(&mut self, id: EdgeId) {
        if let Some(slot) = self.edges.get_mut(id.0) {
            if slot.deleted {
                slot.deleted = false;
                self.live_edges += 1;
            }
        }
    }

    // ========================================================================
    // Counts & iteration
    // ========================================================================

    /// Next node id to be allocated; equals the logical array length.
    pub fn node_size(&self) -> u64 {
        self.nodes.len()
    }

    pub fn edge_size(&self) -> u64 {
        self.edges.len()
    }

    /// Allocated capacity of the node array (block-granular). Matrices
    /// are dimensioned to this.
    pub fn node_capacity(&self) -> u64 {
        self.nodes.capacity()
    }

    pub fn live_node_count(&self) -> u64 {
        self.live_nodes
    }

    pub fn live_edge_count(&self) -> u64 {
        self.live_edges
    }

    /// Iterate ids of alive nodes in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, s)| !s.deleted)
            .map(|(i, _)| NodeId(i))
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges
            .iter()
            .filter(|(_, s)| !s.deleted)
            .map(|(i, _)| EdgeId(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotone() {
        let mut store = EntityStore::new();
        let a = store.create_node([]);
        let b = store.create_node([LabelId(0)]);
        assert_eq!(a, NodeId(0));
        assert_eq!(b, NodeId(1));
        assert_eq!(store.node_size(), 2);
    }

    #[test]
    fn test_tombstone_hides_slot_but_keeps_id_space() {
        let mut store = EntityStore::new();
        let a = store.create_node([]);
        assert!(store.delete_node(a));
        assert!(!store.delete_node(a));
        assert!(store.get_node(a).is_none());
        // Ids are not reused.
        let b = store.create_node([]);
        assert_eq!(b, NodeId(1));
        assert_eq!(store.live_node_count(), 1);
        assert_eq!(store.node_size(), 2);
    }

    #[test]
    fn test_property_upsert_returns_old() {
        let mut store = EntityStore::new();
        let n = store.create_node([]);
        let attr = AttrId(0);
        assert_eq!(store.node_set_property(n, attr, Value::Int(1)), Some(None));
        assert_eq!(
            store.node_set_property(n, attr, Value::Int(2)),
            Some(Some(Value::Int(1)))
        );
        assert_eq!(
            store.get_node(n).unwrap().props.get(&attr),
            Some(&Value::Int(2))
        );
    }

    #[test]
    fn test_scan_skips_tombstones() {
        let mut store = EntityStore::new();
        let a = store.create_node([]);
        let b = store.create_node([]);
        let c = store.create_node([]);
        store.delete_node(b);
        let ids: Vec<NodeId> = store.node_ids().collect();
        assert_eq!(ids, vec![a, c]);
    }
}
