//! # Graph
//!
//! The matrix-backed storage engine: one boolean label matrix per label
//! (diagonal), one boolean relation matrix per relationship type, one
//! adjacency matrix, the entity store, the hexastore, and the schema
//! tables — all coordinated by a per-graph reader/writer latch.
//!
//! Mutations stage matrix updates in the pending buffers and apply
//! entity-store changes immediately (journaled in the undo log), so a
//! writing query reads its own writes while concurrent readers keep the
//! materialised snapshot. `flush` runs under the exclusive latch and
//! materialises everything atomically; `rollback` discards the pending
//! buffers and replays the journal in reverse.
//!
//! This graph is a multigraph: several edges of the same type may
//! connect the same (src, dst) pair. Relation matrices stay boolean;
//! the hexastore is the authority on residual multiplicity, and a
//! matrix entry is cleared only when no triplet remains for it.

pub mod schema;
pub mod snapshot;
pub mod undo;

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::algebra::{apply, mxv, AnyPairBool, Descriptor, MinPlusF64, SparseMatrix, SparseVector};
use crate::hexastore::{Hexastore, Triplet, TripletPattern};
use crate::model::{
    AttrId, Edge, EdgeId, LabelId, Node, NodeId, RelTypeId, Value,
};
use crate::store::EntityStore;
use crate::{Error, Result};
use schema::Schema;
use snapshot::GraphSnapshot;
use undo::{UndoLog, UndoOp};

/// How a query observes staged state.
///
/// A writer sees its own pending matrix updates and every entity id; a
/// reader sees only materialised matrix entries and the entities that
/// existed when its latch was acquired.
#[derive(Debug, Clone, Copy)]
pub struct ReadView {
    pub include_pending: bool,
    /// Node ids at or above this horizon are invisible.
    pub node_horizon: u64,
    /// Edge ids at or above this horizon are invisible.
    pub edge_horizon: u64,
}

impl ReadView {
    pub fn writer() -> Self {
        Self { include_pending: true, node_horizon: u64::MAX, edge_horizon: u64::MAX }
    }

    pub fn reader(node_horizon: u64, edge_horizon: u64) -> Self {
        Self { include_pending: false, node_horizon, edge_horizon }
    }
}

#[derive(Debug, Default)]
struct Matrices {
    dim: u64,
    labels: HashMap<LabelId, SparseMatrix<bool>>,
    relations: HashMap<RelTypeId, SparseMatrix<bool>>,
    adjacency: SparseMatrix<bool>,
}

impl Matrices {
    fn ensure_dim(&mut self, dim: u64) {
        if dim <= self.dim {
            return;
        }
        self.dim = dim;
        self.adjacency.resize(dim, dim);
        for m in self.labels.values_mut() {
            m.resize(dim, dim);
        }
        for m in self.relations.values_mut() {
            m.resize(dim, dim);
        }
    }

    fn label_mut(&mut self, label: LabelId) -> &mut SparseMatrix<bool> {
        let dim = self.dim;
        self.labels
            .entry(label)
            .or_insert_with(|| SparseMatrix::new(dim, dim))
    }

    fn relation_mut(&mut self, rel: RelTypeId) -> &mut SparseMatrix<bool> {
        let dim = self.dim;
        self.relations
            .entry(rel)
            .or_insert_with(|| SparseMatrix::new(dim, dim))
    }
}

/// A named property graph.
pub struct Graph {
    name: String,
    latch: RwLock<()>,
    store: RwLock<EntityStore>,
    schema: RwLock<Schema>,
    matrices: RwLock<Matrices>,
    hexastore: RwLock<Hexastore>,
    undo: Mutex<UndoLog>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latch: RwLock::new(()),
            store: RwLock::new(EntityStore::new()),
            schema: RwLock::new(Schema::new()),
            matrices: RwLock::new(Matrices::default()),
            hexastore: RwLock::new(Hexastore::new()),
            undo: Mutex::new(UndoLog::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The per-graph reader/writer latch. Executors hold a read guard
    /// per reading query and an upgradable guard per writing query.
    pub fn latch(&self) -> &RwLock<()> {
        &self.latch
    }

    // ========================================================================
    // Schema
    // ========================================================================

    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.schema.read().label_id(name)
    }

    pub fn label_id_or_create(&self, name: &str) -> LabelId {
        self.schema.write().label_id_or_create(name)
    }

    pub fn label_name(&self, id: LabelId) -> Option<String> {
        self.schema.read().label_name(id).map(str::to_owned)
    }

    pub fn label_names(&self) -> Vec<String> {
        self.schema.read().label_names().to_vec()
    }

    pub fn rel_type_id(&self, name: &str) -> Option<RelTypeId> {
        self.schema.read().rel_type_id(name)
    }

    pub fn rel_type_id_or_create(&self, name: &str) -> RelTypeId {
        self.schema.write().rel_type_id_or_create(name)
    }

    pub fn rel_type_name(&self, id: RelTypeId) -> Option<String> {
        self.schema.read().rel_type_name(id).map(str::to_owned)
    }

    pub fn rel_type_names(&self) -> Vec<String> {
        self.schema.read().rel_type_names().to_vec()
    }

    pub fn all_rel_type_ids(&self) -> Vec<RelTypeId> {
        self.schema.read().all_rel_type_ids()
    }

    pub fn attr_id(&self, name: &str) -> Option<AttrId> {
        self.schema.read().attr_id(name)
    }

    pub fn attr_id_or_create(&self, name: &str) -> AttrId {
        self.schema.write().attr_id_or_create(name)
    }

    pub fn attr_name(&self, id: AttrId) -> Option<String> {
        self.schema.read().attr_name(id).map(str::to_owned)
    }

    pub fn attr_names(&self) -> Vec<String> {
        self.schema.read().attr_names().to_vec()
    }

    pub fn add_index(&self, label: LabelId, attr: AttrId) -> bool {
        self.schema.write().add_index(label, attr)
    }

    pub fn drop_index(&self, label: LabelId, attr: AttrId) -> bool {
        self.schema.write().drop_index(label, attr)
    }

    pub fn has_index(&self, label: LabelId, attr: AttrId) -> bool {
        self.schema.read().has_index(label, attr)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Allocate a node, stage its label-matrix diagonal entries, and
    /// journal the creation.
    pub fn create_node(
        &self,
        labels: &[LabelId],
        props: Vec<(AttrId, Value)>,
    ) -> NodeId {
        let mut store = self.store.write();
        let id = store.create_node(labels.iter().copied());
        if let Some(slot) = store.get_node_mut(id) {
            for (attr, v) in props {
                slot.props.insert(attr, v);
            }
        }
        let capacity = store.node_capacity();
        drop(store);

        let mut matrices = self.matrices.write();
        matrices.ensure_dim(capacity);
        for &label in labels {
            matrices.label_mut(label).set(id.0, id.0, true);
        }
        drop(matrices);

        self.undo.lock().record(UndoOp::CreateNode(id));
        id
    }

    /// Connect: allocate the edge record, stage `R_t[src,dst]` and
    /// `A[src,dst]`, and insert the six hexastore keys.
    pub fn create_edge(
        &self,
        src: NodeId,
        dst: NodeId,
        rel_type: RelTypeId,
        props: Vec<(AttrId, Value)>,
    ) -> Result<EdgeId> {
        let mut store = self.store.write();
        if !store.node_alive(src) {
            return Err(Error::EntityMissing(format!("node {src}")));
        }
        if !store.node_alive(dst) {
            return Err(Error::EntityMissing(format!("node {dst}")));
        }
        let id = store.create_edge(src, dst, rel_type);
        if let Some(slot) = store.get_edge_mut(id) {
            for (attr, v) in props {
                slot.props.insert(attr, v);
            }
        }
        drop(store);

        let mut matrices = self.matrices.write();
        matrices.relation_mut(rel_type).set(src.0, dst.0, true);
        matrices.adjacency.set(src.0, dst.0, true);
        drop(matrices);

        let triplet = Triplet { subject: src, rel_type, edge: id, object: dst };
        self.hexastore.write().insert_triplet(triplet);
        self.undo.lock().record(UndoOp::CreateEdge { id, triplet });
        Ok(id)
    }

    /// Tombstone an edge, drop its hexastore keys, and stage the matrix
    /// removals its disappearance warrants. Returns false if already
    /// gone.
    pub fn delete_edge(&self, id: EdgeId) -> bool {
        let mut store = self.store.write();
        let Some(slot) = store.get_edge(id) else {
            return false;
        };
        let (src, dst, rel_type) = (slot.src, slot.dst, slot.rel_type);
        store.delete_edge(id);
        drop(store);

        self.unlink_edge(Triplet { subject: src, rel_type, edge: id, object: dst });
        true
    }

    fn unlink_edge(&self, triplet: Triplet) {
        let (src, dst, rel_type) = (triplet.subject, triplet.object, triplet.rel_type);
        let mut hexa = self.hexastore.write();
        hexa.delete_triplet(triplet);

        // Multigraph reconciliation: clear matrix entries only once the
        // hexastore has no residual triplet for them.
        let same_type_left = !hexa
            .scan(TripletPattern {
                subject: Some(src),
                rel_type: Some(rel_type),
                object: Some(dst),
            })
            .is_empty();
        let any_type_left = same_type_left
            || !hexa
                .scan(TripletPattern {
                    subject: Some(src),
                    rel_type: None,
                    object: Some(dst),
                })
                .is_empty();
        drop(hexa);

        let mut matrices = self.matrices.write();
        if !same_type_left {
            matrices.relation_mut(rel_type).remove(src.0, dst.0);
        }
        if !any_type_left {
            matrices.adjacency.remove(src.0, dst.0);
        }
        drop(matrices);

        self.undo
            .lock()
            .record(UndoOp::DeleteEdge { id: triplet.edge, triplet });
    }

    /// Tombstone a node, stage its label-diagonal removals, delete every
    /// incident edge, and stage clearing of its adjacency row/column.
    /// Returns the number of edges deleted alongside, or `None` if the
    /// node was already gone.
    pub fn delete_node(&self, id: NodeId) -> Option<u64> {
        let mut store = self.store.write();
        let labels = store.get_node(id)?.labels.clone();
        store.delete_node(id);
        drop(store);

        {
            let mut matrices = self.matrices.write();
            for &label in &labels {
                matrices.label_mut(label).remove(id.0, id.0);
            }
        }

        // Incident edges: subject-anchored and object-anchored scans.
        let hexa = self.hexastore.read();
        let mut incident: Vec<Triplet> = hexa.scan(TripletPattern::subject(id));
        for t in hexa.scan(TripletPattern::object(id)) {
            if t.subject != id {
                incident.push(t);
            }
        }
        drop(hexa);

        let edges_deleted = incident.len() as u64;
        for t in &incident {
            self.store.write().delete_edge(t.edge);
            self.unlink_edge(*t);
        }

        {
            let mut matrices = self.matrices.write();
            matrices.adjacency.remove_row(id.0);
            matrices.adjacency.remove_col(id.0);
        }

        self.undo.lock().record(UndoOp::DeleteNode { id });
        Some(edges_deleted)
    }

    pub fn set_node_property(&self, id: NodeId, attr: AttrId, value: Value) -> Result<()> {
        let old = self
            .store
            .write()
            .node_set_property(id, attr, value)
            .ok_or_else(|| Error::EntityMissing(format!("node {id}")))?;
        self.undo.lock().record(UndoOp::SetNodeProp { id, attr, old });
        Ok(())
    }

    pub fn remove_node_property(&self, id: NodeId, attr: AttrId) -> Result<bool> {
        let old = self
            .store
            .write()
            .node_remove_property(id, attr)
            .ok_or_else(|| Error::EntityMissing(format!("node {id}")))?;
        let existed = old.is_some();
        self.undo.lock().record(UndoOp::SetNodeProp { id, attr, old });
        Ok(existed)
    }

    pub fn set_edge_property(&self, id: EdgeId, attr: AttrId, value: Value) -> Result<()> {
        let old = self
            .store
            .write()
            .edge_set_property(id, attr, value)
            .ok_or_else(|| Error::EntityMissing(format!("edge {id}")))?;
        self.undo.lock().record(UndoOp::SetEdgeProp { id, attr, old });
        Ok(())
    }

    pub fn remove_edge_property(&self, id: EdgeId, attr: AttrId) -> Result<bool> {
        let old = self
            .store
            .write()
            .edge_remove_property(id, attr)
            .ok_or_else(|| Error::EntityMissing(format!("edge {id}")))?;
        let existed = old.is_some();
        self.undo.lock().record(UndoOp::SetEdgeProp { id, attr, old });
        Ok(existed)
    }

    /// Add a label to a node, staging its diagonal entry. Returns true
    /// when the label was newly added.
    pub fn add_node_label(&self, id: NodeId, label: LabelId) -> Result<bool> {
        let mut store = self.store.write();
        let slot = store
            .get_node_mut(id)
            .ok_or_else(|| Error::EntityMissing(format!("node {id}")))?;
        if slot.labels.contains(&label) {
            return Ok(false);
        }
        slot.labels.push(label);
        drop(store);

        self.matrices.write().label_mut(label).set(id.0, id.0, true);
        self.undo.lock().record(UndoOp::AddLabel { id, label });
        Ok(true)
    }

    pub fn remove_node_label(&self, id: NodeId, label: LabelId) -> Result<bool> {
        let mut store = self.store.write();
        let slot = store
            .get_node_mut(id)
            .ok_or_else(|| Error::EntityMissing(format!("node {id}")))?;
        let before = slot.labels.len();
        slot.labels.retain(|l| *l != label);
        if slot.labels.len() == before {
            return Ok(false);
        }
        drop(store);

        self.matrices.write().label_mut(label).remove(id.0, id.0);
        self.undo.lock().record(UndoOp::RemoveLabel { id, label });
        Ok(true)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn node(&self, id: NodeId) -> Option<Node> {
        let store = self.store.read();
        let slot = store.get_node(id)?;
        Some(Node { id, labels: slot.labels.clone() })
    }

    pub fn edge(&self, id: EdgeId) -> Option<Edge> {
        let store = self.store.read();
        let slot = store.get_edge(id)?;
        Some(Edge { id, src: slot.src, dst: slot.dst, rel_type: slot.rel_type })
    }

    pub fn node_property(&self, id: NodeId, attr: AttrId) -> Value {
        self.store
            .read()
            .get_node(id)
            .and_then(|s| s.props.get(&attr).cloned())
            .unwrap_or(Value::Null)
    }

    pub fn edge_property(&self, id: EdgeId, attr: AttrId) -> Value {
        self.store
            .read()
            .get_edge(id)
            .and_then(|s| s.props.get(&attr).cloned())
            .unwrap_or(Value::Null)
    }

    /// Properties sorted by attribute id, for deterministic formatting.
    pub fn node_properties(&self, id: NodeId) -> Vec<(AttrId, Value)> {
        let store = self.store.read();
        let mut out: Vec<(AttrId, Value)> = store
            .get_node(id)
            .map(|s| s.props.iter().map(|(&a, v)| (a, v.clone())).collect())
            .unwrap_or_default();
        out.sort_by_key(|&(a, _)| a);
        out
    }

    pub fn edge_properties(&self, id: EdgeId) -> Vec<(AttrId, Value)> {
        let store = self.store.read();
        let mut out: Vec<(AttrId, Value)> = store
            .get_edge(id)
            .map(|s| s.props.iter().map(|(&a, v)| (a, v.clone())).collect())
            .unwrap_or_default();
        out.sort_by_key(|&(a, _)| a);
        out
    }

    pub fn all_node_ids(&self) -> Vec<NodeId> {
        self.store.read().node_ids().collect()
    }

    pub fn all_edge_ids(&self) -> Vec<EdgeId> {
        self.store.read().edge_ids().collect()
    }

    pub fn node_count(&self) -> u64 {
        self.store.read().live_node_count()
    }

    pub fn edge_count(&self) -> u64 {
        self.store.read().live_edge_count()
    }

    /// Snapshot horizon for a reader: edges allocated later are
    /// invisible to it.
    pub fn edge_size(&self) -> u64 {
        self.store.read().edge_size()
    }

    /// Ids on the diagonal of the label matrix, ascending.
    pub fn label_node_ids(&self, label: LabelId, view: ReadView) -> Vec<NodeId> {
        let matrices = self.matrices.read();
        let Some(m) = matrices.labels.get(&label) else {
            return Vec::new();
        };
        let mut ids: BTreeSet<u64> = m
            .iter()
            .filter(|&(i, j, _)| i == j)
            .map(|(i, _, _)| i)
            .collect();
        if view.include_pending {
            for (i, j, val) in m.pending_ops() {
                if i != j {
                    continue;
                }
                match val {
                    Some(_) => {
                        ids.insert(i);
                    }
                    None => {
                        ids.remove(&i);
                    }
                }
            }
        }
        ids.into_iter().map(NodeId).collect()
    }

    /// Outgoing one-hop traversal: for each relation type, pull the
    /// destination vector `R_tᵀ · e_src` and recover edge identity from
    /// the hexastore. Destinations come out in ascending node id.
    pub fn traverse_out(
        &self,
        src: NodeId,
        rel_types: &[RelTypeId],
        view: ReadView,
    ) -> Vec<Edge> {
        self.traverse(src, rel_types, true, view)
    }

    /// Incoming one-hop traversal: sources with an edge into `dst`.
    pub fn traverse_in(
        &self,
        dst: NodeId,
        rel_types: &[RelTypeId],
        view: ReadView,
    ) -> Vec<Edge> {
        self.traverse(dst, rel_types, false, view)
    }

    fn traverse(
        &self,
        anchor: NodeId,
        rel_types: &[RelTypeId],
        outgoing: bool,
        view: ReadView,
    ) -> Vec<Edge> {
        let matrices = self.matrices.read();
        let dim = matrices.dim.max(anchor.0 + 1);
        // other-node -> relation types reaching it, ascending.
        let mut hits: BTreeMap<u64, Vec<RelTypeId>> = BTreeMap::new();

        for &t in rel_types {
            let Some(m) = matrices.relations.get(&t) else {
                continue;
            };
            let q = SparseVector::unit(dim, anchor.0, true);
            let mut w: SparseVector<bool> = SparseVector::new(dim);
            let desc = if outgoing {
                Descriptor::new().transpose_a()
            } else {
                Descriptor::new()
            };
            mxv(&mut w, None, None, m, &q, &AnyPairBool, desc);

            let mut reached: BTreeSet<u64> = w.iter().map(|(i, _)| i).collect();
            if view.include_pending {
                for (i, j, val) in m.pending_ops() {
                    let (from, to) = if outgoing { (i, j) } else { (j, i) };
                    if from != anchor.0 {
                        continue;
                    }
                    match val {
                        Some(_) => {
                            reached.insert(to);
                        }
                        None => {
                            reached.remove(&to);
                        }
                    }
                }
            }
            for other in reached {
                hits.entry(other).or_default().push(t);
            }
        }
        drop(matrices);

        let hexa = self.hexastore.read();
        let mut out = Vec::new();
        for (other, types) in hits {
            for t in types {
                let (s, o) = if outgoing {
                    (anchor, NodeId(other))
                } else {
                    (NodeId(other), anchor)
                };
                for triplet in hexa.scan(TripletPattern {
                    subject: Some(s),
                    rel_type: Some(t),
                    object: Some(o),
                }) {
                    if triplet.edge.0 < view.edge_horizon {
                        out.push(Edge {
                            id: triplet.edge,
                            src: s,
                            dst: o,
                            rel_type: t,
                        });
                    }
                }
            }
        }
        out
    }

    /// Both endpoints bound: test `R_t[src, dst]` directly, then recover
    /// the connecting edges.
    pub fn edges_between(
        &self,
        src: NodeId,
        dst: NodeId,
        rel_types: &[RelTypeId],
        view: ReadView,
    ) -> Vec<Edge> {
        let matrices = self.matrices.read();
        let connected: Vec<RelTypeId> = rel_types
            .iter()
            .copied()
            .filter(|t| {
                matrices.relations.get(t).is_some_and(|m| {
                    if view.include_pending {
                        m.get(src.0, dst.0).unwrap_or(false)
                    } else {
                        m.get_materialised(src.0, dst.0).unwrap_or(false)
                    }
                })
            })
            .collect();
        drop(matrices);

        let hexa = self.hexastore.read();
        let mut out = Vec::new();
        for t in connected {
            for triplet in hexa.scan(TripletPattern {
                subject: Some(src),
                rel_type: Some(t),
                object: Some(dst),
            }) {
                if triplet.edge.0 < view.edge_horizon {
                    out.push(Edge { id: triplet.edge, src, dst, rel_type: t });
                }
            }
        }
        out
    }

    /// Unit-weight shortest-path cost over the adjacency matrix via
    /// min-plus relaxation. Unreachable targets cost +∞.
    pub fn shortest_path_cost(&self, src: NodeId, dst: NodeId) -> f64 {
        if self.node(src).is_none() || self.node(dst).is_none() {
            return f64::INFINITY;
        }
        if src == dst {
            return 0.0;
        }
        let matrices = self.matrices.read();
        let dim = matrices.dim.max(src.0.max(dst.0) + 1);
        let mut weights: SparseMatrix<f64> = SparseMatrix::new(dim, dim);
        apply(&mut weights, None, &matrices.adjacency, |_| 1.0, Descriptor::new());
        drop(matrices);

        let mut dist = SparseVector::unit(dim, src.0, 0.0);
        // Bellman-Ford: at most |V| - 1 relaxations reach a fixpoint.
        for _ in 0..dim {
            let mut next = dist.clone();
            mxv(
                &mut next,
                None,
                Some(|a: f64, b: f64| a.min(b)),
                &weights,
                &dist,
                &MinPlusF64,
                Descriptor::new().transpose_a(),
            );
            let converged = next.nvals() == dist.nvals()
                && next.iter().all(|(i, v)| dist.get(i) == Some(v));
            dist = next;
            if converged {
                break;
            }
        }
        dist.get(dst.0).unwrap_or(f64::INFINITY)
    }

    // ========================================================================
    // Commit / rollback
    // ========================================================================

    /// True if any matrix holds staged updates.
    pub fn has_pending(&self) -> bool {
        let matrices = self.matrices.read();
        matrices.adjacency.has_pending()
            || matrices.labels.values().any(SparseMatrix::has_pending)
            || matrices.relations.values().any(SparseMatrix::has_pending)
    }

    /// Materialise every staged matrix update and clear the journal.
    /// Caller holds the exclusive latch.
    pub fn flush(&self) {
        let mut matrices = self.matrices.write();
        let mut flushed = 0usize;
        if matrices.adjacency.has_pending() {
            matrices.adjacency.wait();
            flushed += 1;
        }
        for m in matrices.labels.values_mut() {
            if m.has_pending() {
                m.wait();
                flushed += 1;
            }
        }
        for m in matrices.relations.values_mut() {
            if m.has_pending() {
                m.wait();
                flushed += 1;
            }
        }
        drop(matrices);

        self.undo.lock().clear();
        debug!(graph = %self.name, matrices = flushed, "flushed pending updates");
    }

    /// Discard staged matrix updates and replay the journal in reverse.
    /// Leaves the graph exactly as it was before the query started.
    pub fn rollback(&self) {
        {
            let mut matrices = self.matrices.write();
            matrices.adjacency.discard_pending();
            for m in matrices.labels.values_mut() {
                m.discard_pending();
            }
            for m in matrices.relations.values_mut() {
                m.discard_pending();
            }
        }

        let ops: Vec<UndoOp> = self.undo.lock().drain_reverse().collect();
        let mut store = self.store.write();
        let mut hexa = self.hexastore.write();
        for op in ops {
            match op {
                UndoOp::CreateNode(id) => {
                    store.delete_node(id);
                }
                UndoOp::CreateEdge { id, triplet } => {
                    store.delete_edge(id);
                    hexa.delete_triplet(triplet);
                }
                UndoOp::DeleteNode { id } => {
                    store.revive_node(id);
                }
                UndoOp::DeleteEdge { id, triplet } => {
                    store.revive_edge(id);
                    hexa.insert_triplet(triplet);
                }
                UndoOp::SetNodeProp { id, attr, old } => {
                    if let Some(slot) = store.get_node_mut(id) {
                        match old {
                            Some(v) => {
                                slot.props.insert(attr, v);
                            }
                            None => {
                                slot.props.remove(&attr);
                            }
                        }
                    }
                }
                UndoOp::SetEdgeProp { id, attr, old } => {
                    if let Some(slot) = store.get_edge_mut(id) {
                        match old {
                            Some(v) => {
                                slot.props.insert(attr, v);
                            }
                            None => {
                                slot.props.remove(&attr);
                            }
                        }
                    }
                }
                UndoOp::AddLabel { id, label } => {
                    if let Some(slot) = store.get_node_mut(id) {
                        slot.labels.retain(|l| *l != label);
                    }
                }
                UndoOp::RemoveLabel { id, label } => {
                    if let Some(slot) = store.get_node_mut(id) {
                        if !slot.labels.contains(&label) {
                            slot.labels.push(label);
                        }
                    }
                }
            }
        }
        debug!(graph = %self.name, "rolled back staged updates");
    }

    // ========================================================================
    // Introspection for invariant checks
    // ========================================================================

    pub fn label_matrix_nvals(&self, label: LabelId) -> u64 {
        self.matrices
            .read()
            .labels
            .get(&label)
            .map_or(0, SparseMatrix::nvals)
    }

    pub fn relation_matrix_nvals(&self, rel: RelTypeId) -> u64 {
        self.matrices
            .read()
            .relations
            .get(&rel)
            .map_or(0, SparseMatrix::nvals)
    }

    pub fn adjacency_nvals(&self) -> u64 {
        self.matrices.read().adjacency.nvals()
    }

    pub fn total_matrix_nvals(&self) -> u64 {
        let matrices = self.matrices.read();
        matrices.adjacency.nvals()
            + matrices.labels.values().map(SparseMatrix::nvals).sum::<u64>()
            + matrices
                .relations
                .values()
                .map(SparseMatrix::nvals)
                .sum::<u64>()
    }

    pub fn hexastore_key_count(&self) -> u64 {
        self.hexastore.read().key_count()
    }

    /// Every materialised relation entry must be witnessed by at least
    /// one live edge record and its hexastore triplet, label matrices
    /// must be diagonal, and relation entries must imply adjacency.
    /// Used by tests and the checkpoint path.
    pub fn check_invariants(&self) -> Result<()> {
        let matrices = self.matrices.read();
        let store = self.store.read();
        let hexa = self.hexastore.read();

        for (label, m) in &matrices.labels {
            if m.iter().any(|(i, j, _)| i != j) {
                return Err(Error::Internal(format!(
                    "label matrix {label} has an off-diagonal entry"
                )));
            }
        }

        for (&t, m) in &matrices.relations {
            for (i, j, _) in m.iter() {
                if matrices.adjacency.get_materialised(i, j).is_none() {
                    return Err(Error::Internal(format!(
                        "relation {t} entry ({i},{j}) missing from adjacency"
                    )));
                }
                let witnesses = hexa.scan(TripletPattern {
                    subject: Some(NodeId(i)),
                    rel_type: Some(t),
                    object: Some(NodeId(j)),
                });
                if witnesses.is_empty() {
                    return Err(Error::Internal(format!(
                        "relation {t} entry ({i},{j}) has no hexastore witness"
                    )));
                }
                for w in witnesses {
                    let slot = store.get_edge(w.edge).ok_or_else(|| {
                        Error::Internal(format!("edge {} is tombstoned", w.edge))
                    })?;
                    if slot.src != NodeId(i) || slot.dst != NodeId(j) || slot.rel_type != t {
                        return Err(Error::Internal(format!(
                            "edge {} disagrees with its triplet",
                            w.edge
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Checkpoint
    // ========================================================================

    /// Produce the replayable persisted form. Caller holds the
    /// exclusive latch, so nothing is pending.
    pub fn checkpoint(&self) -> GraphSnapshot {
        GraphSnapshot::capture(self)
    }

    /// Rebuild a graph deterministically from a snapshot.
    pub fn restore(name: impl Into<String>, snapshot: &GraphSnapshot) -> Graph {
        snapshot.replay(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer() -> ReadView {
        ReadView::writer()
    }

    #[test]
    fn test_create_node_stages_label_diagonal() {
        let g = Graph::new("t");
        let person = g.label_id_or_create("Person");
        let n = g.create_node(&[person], vec![]);
        // Pending until flush.
        assert_eq!(g.label_matrix_nvals(person), 0);
        assert_eq!(g.label_node_ids(person, writer()), vec![n]);
        assert!(g.label_node_ids(person, ReadView::reader(u64::MAX, u64::MAX)).is_empty());

        g.flush();
        assert_eq!(g.label_matrix_nvals(person), 1);
        assert_eq!(g.label_node_ids(person, ReadView::reader(u64::MAX, u64::MAX)), vec![n]);
    }

    #[test]
    fn test_connect_and_traverse() {
        let g = Graph::new("t");
        let knows = g.rel_type_id_or_create("KNOWS");
        let a = g.create_node(&[], vec![]);
        let b = g.create_node(&[], vec![]);
        let e = g.create_edge(a, b, knows, vec![]).unwrap();
        g.flush();

        let out = g.traverse_out(a, &[knows], ReadView::reader(u64::MAX, u64::MAX));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, e);
        assert_eq!(out[0].dst, b);

        let inc = g.traverse_in(b, &[knows], ReadView::reader(u64::MAX, u64::MAX));
        assert_eq!(inc.len(), 1);
        assert_eq!(inc[0].src, a);

        g.check_invariants().unwrap();
    }

    #[test]
    fn test_writer_sees_own_staged_edge() {
        let g = Graph::new("t");
        let knows = g.rel_type_id_or_create("KNOWS");
        let a = g.create_node(&[], vec![]);
        let b = g.create_node(&[], vec![]);
        g.create_edge(a, b, knows, vec![]).unwrap();

        // Reader view: nothing materialised yet.
        assert!(g.traverse_out(a, &[knows], ReadView::reader(0, 0)).is_empty());
        // Writer view: staged entry visible.
        assert_eq!(g.traverse_out(a, &[knows], writer()).len(), 1);
    }

    #[test]
    fn test_multigraph_keeps_entry_until_last_edge() {
        let g = Graph::new("t");
        let r = g.rel_type_id_or_create("R");
        let a = g.create_node(&[], vec![]);
        let b = g.create_node(&[], vec![]);
        let e1 = g.create_edge(a, b, r, vec![]).unwrap();
        let e2 = g.create_edge(a, b, r, vec![]).unwrap();
        g.flush();
        assert_eq!(g.relation_matrix_nvals(r), 1);

        assert!(g.delete_edge(e1));
        g.flush();
        assert_eq!(g.relation_matrix_nvals(r), 1);
        assert_eq!(g.adjacency_nvals(), 1);

        assert!(g.delete_edge(e2));
        g.flush();
        assert_eq!(g.relation_matrix_nvals(r), 0);
        assert_eq!(g.adjacency_nvals(), 0);
        assert_eq!(g.hexastore_key_count(), 0);
    }

    #[test]
    fn test_delete_node_removes_incident_edges() {
        let g = Graph::new("t");
        let r = g.rel_type_id_or_create("R");
        let a = g.create_node(&[], vec![]);
        let b = g.create_node(&[], vec![]);
        let c = g.create_node(&[], vec![]);
        g.create_edge(a, b, r, vec![]).unwrap();
        g.create_edge(c, b, r, vec![]).unwrap();
        g.flush();

        let deleted = g.delete_node(b).unwrap();
        assert_eq!(deleted, 2);
        g.flush();

        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.relation_matrix_nvals(r), 0);
        assert_eq!(g.adjacency_nvals(), 0);
        assert!(g.hexastore_key_count() == 0);
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_rollback_restores_pre_query_state() {
        let g = Graph::new("t");
        let person = g.label_id_or_create("Person");
        let r = g.rel_type_id_or_create("R");
        let age = g.attr_id_or_create("age");

        let a = g.create_node(&[person], vec![(age, Value::Int(1))]);
        let b = g.create_node(&[person], vec![]);
        let e = g.create_edge(a, b, r, vec![]).unwrap();
        g.flush();

        // A query mutates then aborts.
        let c = g.create_node(&[person], vec![]);
        g.create_edge(a, c, r, vec![]).unwrap();
        g.set_node_property(a, age, Value::Int(99)).unwrap();
        g.delete_edge(e);
        g.delete_node(b);
        g.rollback();

        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        assert!(g.node(c).is_none());
        assert_eq!(g.node_property(a, age), Value::Int(1));
        assert!(g.edge(e).is_some());
        assert!(!g.has_pending());
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_flush_is_idempotent() {
        let g = Graph::new("t");
        let l = g.label_id_or_create("L");
        g.create_node(&[l], vec![]);
        g.flush();
        let nvals = g.total_matrix_nvals();
        g.flush();
        assert_eq!(g.total_matrix_nvals(), nvals);
        assert!(!g.has_pending());
    }
}
