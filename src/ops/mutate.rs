//! Mutation operators.
//!
//! All graph mutation defers matrix updates to the pending buffers;
//! entity-store changes are journaled for rollback. Statistics
//! accumulate on the query context and become durable with the flush.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cypher::ast::Expr;
use crate::graph::Graph;
use crate::model::{EdgeId, NodeId, Value};
use crate::query_ctx::QueryCtx;
use crate::record::Record;
use crate::{Error, Result};

use super::{eval, BoxOp, OpState, Operator};

// ============================================================================
// Creation specs (resolved by the planner)
// ============================================================================

#[derive(Clone)]
pub struct NodeCreateSpec {
    pub slot: usize,
    /// Already bound by an earlier clause: reuse, don't create.
    pub bound: bool,
    pub labels: Vec<String>,
    pub props: Vec<(String, Expr)>,
}

#[derive(Clone)]
pub struct EdgeCreateSpec {
    pub slot: Option<usize>,
    pub src_slot: usize,
    pub dst_slot: usize,
    pub rel_type: String,
    pub props: Vec<(String, Expr)>,
}

#[derive(Clone, Default)]
pub struct CreateSpec {
    pub nodes: Vec<NodeCreateSpec>,
    pub edges: Vec<EdgeCreateSpec>,
}

/// Materialise a creation spec against a record: allocate entities,
/// fill property bags from evaluated expressions, bind the new handles
/// into the record.
pub fn apply_create(
    graph: &Arc<Graph>,
    ctx: &mut QueryCtx,
    record: &mut Record,
    spec: &CreateSpec,
) -> Result<()> {
    for node in &spec.nodes {
        if node.bound {
            continue;
        }
        let labels: Vec<_> = node
            .labels
            .iter()
            .map(|name| graph.label_id_or_create(name))
            .collect();
        let mut props = Vec::new();
        for (key, expr) in &node.props {
            let v = eval(graph, ctx, expr, record)?;
            // Storing null is "property not set".
            if v.is_null() {
                continue;
            }
            props.push((graph.attr_id_or_create(key), v));
        }
        ctx.stats.nodes_created += 1;
        ctx.stats.labels_added += labels.len() as u64;
        ctx.stats.properties_set += props.len() as u64;
        let id = graph.create_node(&labels, props);
        let created = graph
            .node(id)
            .ok_or_else(|| Error::Internal("created node not found".into()))?;
        record.set_node(node.slot, created);
    }

    for edge in &spec.edges {
        let src = record
            .get_node(edge.src_slot)
            .ok_or_else(|| Error::SchemaError("edge endpoint unbound in CREATE".into()))?
            .id;
        let dst = record
            .get_node(edge.dst_slot)
            .ok_or_else(|| Error::SchemaError("edge endpoint unbound in CREATE".into()))?
            .id;
        let rel_type = graph.rel_type_id_or_create(&edge.rel_type);
        let mut props = Vec::new();
        for (key, expr) in &edge.props {
            let v = eval(graph, ctx, expr, record)?;
            if v.is_null() {
                continue;
            }
            props.push((graph.attr_id_or_create(key), v));
        }
        ctx.stats.relationships_created += 1;
        ctx.stats.properties_set += props.len() as u64;
        let id = graph.create_edge(src, dst, rel_type, props)?;
        if let Some(slot) = edge.slot {
            let created = graph
                .edge(id)
                .ok_or_else(|| Error::Internal("created edge not found".into()))?;
            record.set_edge(slot, created);
        }
    }
    Ok(())
}

/// Per input record, allocate the pattern's nodes and edges.
pub struct Create {
    graph: Arc<Graph>,
    child: BoxOp,
    spec: CreateSpec,
    state: OpState,
}

impl Create {
    pub fn new(graph: Arc<Graph>, child: BoxOp, spec: CreateSpec) -> Self {
        Self { graph, child, spec, state: OpState::Uninit }
    }
}

impl Operator for Create {
    fn name(&self) -> &'static str {
        "Create"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        let Some(mut record) = self.child.consume(ctx)? else {
            self.state = OpState::Exhausted;
            return Ok(None);
        };
        apply_create(&self.graph, ctx, &mut record, &self.spec)?;
        Ok(Some(record))
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Create::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.spec.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

// ============================================================================
// Update (SET / REMOVE)
// ============================================================================

#[derive(Clone)]
pub enum UpdateItem {
    SetProp { slot: usize, key: String, value: Expr },
    /// `SET n = {map}` / `SET n += {map}`.
    SetAllProps { slot: usize, value: Expr, merge: bool },
    AddLabel { slot: usize, label: String },
    RemoveProp { slot: usize, key: String },
    RemoveLabel { slot: usize, label: String },
}

/// Apply update items to the entities a record binds.
pub fn apply_updates(
    graph: &Arc<Graph>,
    ctx: &mut QueryCtx,
    record: &Record,
    items: &[UpdateItem],
) -> Result<()> {
    use crate::record::Entry;

    for item in items {
        match item {
            UpdateItem::SetProp { slot, key, value } => {
                let v = eval(graph, ctx, value, record)?;
                let attr = graph.attr_id_or_create(key);
                match record.entry(*slot) {
                    Entry::Node(n) => {
                        if v.is_null() {
                            graph.remove_node_property(n.id, attr)?;
                        } else {
                            graph.set_node_property(n.id, attr, v)?;
                        }
                        ctx.stats.properties_set += 1;
                    }
                    Entry::Edge(e) => {
                        if v.is_null() {
                            graph.remove_edge_property(e.id, attr)?;
                        } else {
                            graph.set_edge_property(e.id, attr, v)?;
                        }
                        ctx.stats.properties_set += 1;
                    }
                    Entry::Unset => {}
                    other => {
                        return Err(Error::TypeError {
                            expected: "Node or Relationship".into(),
                            got: format!("{other:?}"),
                        })
                    }
                }
            }

            UpdateItem::SetAllProps { slot, value, merge } => {
                let v = eval(graph, ctx, value, record)?;
                let Value::Map(map) = v else {
                    return Err(Error::TypeError {
                        expected: "Map".into(),
                        got: v.type_name().into(),
                    });
                };
                let Entry::Node(n) = record.entry(*slot) else {
                    return Err(Error::TypeError {
                        expected: "Node".into(),
                        got: "non-node".into(),
                    });
                };
                if !merge {
                    for (attr, _) in graph.node_properties(n.id) {
                        graph.remove_node_property(n.id, attr)?;
                    }
                }
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    let v = map[key].clone();
                    if v.is_null() {
                        continue;
                    }
                    let attr = graph.attr_id_or_create(key);
                    graph.set_node_property(n.id, attr, v)?;
                    ctx.stats.properties_set += 1;
                }
            }

            UpdateItem::AddLabel { slot, label } => {
                if let Entry::Node(n) = record.entry(*slot) {
                    let id = graph.label_id_or_create(label);
                    if graph.add_node_label(n.id, id)? {
                        ctx.stats.labels_added += 1;
                    }
                }
            }

            UpdateItem::RemoveProp { slot, key } => {
                let Some(attr) = graph.attr_id(key) else {
                    continue;
                };
                match record.entry(*slot) {
                    Entry::Node(n) => {
                        if graph.remove_node_property(n.id, attr)? {
                            ctx.stats.properties_set += 1;
                        }
                    }
                    Entry::Edge(e) => {
                        if graph.remove_edge_property(e.id, attr)? {
                            ctx.stats.properties_set += 1;
                        }
                    }
                    _ => {}
                }
            }

            UpdateItem::RemoveLabel { slot, label } => {
                if let Entry::Node(n) = record.entry(*slot) {
                    if let Some(id) = graph.label_id(label) {
                        if graph.remove_node_label(n.id, id)? {
                            ctx.stats.labels_removed += 1;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Applies property and label updates to each record's entities.
pub struct Update {
    graph: Arc<Graph>,
    child: BoxOp,
    items: Vec<UpdateItem>,
    state: OpState,
}

impl Update {
    pub fn new(graph: Arc<Graph>, child: BoxOp, items: Vec<UpdateItem>) -> Self {
        Self { graph, child, items, state: OpState::Uninit }
    }
}

impl Operator for Update {
    fn name(&self) -> &'static str {
        "Update"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        let Some(record) = self.child.consume(ctx)? else {
            self.state = OpState::Exhausted;
            return Ok(None);
        };
        apply_updates(&self.graph, ctx, &record, &self.items)?;
        Ok(Some(record))
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Update::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.items.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

// ============================================================================
// Delete
// ============================================================================

/// Collects entities to delete across the whole stream, deduplicates by
/// id, forwards every record, and performs the deletions when the child
/// exhausts — so no record produced by this query observes a tombstone
/// it caused mid-stream.
pub struct Delete {
    graph: Arc<Graph>,
    child: BoxOp,
    slots: Vec<usize>,
    detach: bool,
    nodes: BTreeSet<NodeId>,
    edges: BTreeSet<EdgeId>,
    deleted: bool,
    state: OpState,
}

impl Delete {
    pub fn new(graph: Arc<Graph>, child: BoxOp, slots: Vec<usize>, detach: bool) -> Self {
        Self {
            graph,
            child,
            slots,
            detach,
            nodes: BTreeSet::new(),
            edges: BTreeSet::new(),
            deleted: false,
            state: OpState::Uninit,
        }
    }

    fn perform_deletions(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;

        // Edges first so node deletion sees an accurate incident set.
        for &edge in &self.edges {
            if self.graph.delete_edge(edge) {
                ctx.stats.relationships_deleted += 1;
            }
        }
        for &node in &self.nodes {
            if !self.detach {
                let has_edges = !self
                    .graph
                    .traverse_out(node, &self.graph.all_rel_type_ids(), ctx.read_view())
                    .is_empty()
                    || !self
                        .graph
                        .traverse_in(node, &self.graph.all_rel_type_ids(), ctx.read_view())
                        .is_empty();
                if has_edges {
                    return Err(Error::RuntimeError(format!(
                        "cannot delete node {node}: it still has relationships"
                    )));
                }
            }
            if let Some(edges_deleted) = self.graph.delete_node(node) {
                ctx.stats.nodes_deleted += 1;
                ctx.stats.relationships_deleted += edges_deleted;
            }
        }
        Ok(())
    }
}

impl Operator for Delete {
    fn name(&self) -> &'static str {
        "Delete"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.nodes.clear();
        self.edges.clear();
        self.deleted = false;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        use crate::record::Entry;

        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        match self.child.consume(ctx)? {
            Some(record) => {
                for &slot in &self.slots {
                    match record.entry(slot) {
                        Entry::Node(n) => {
                            self.nodes.insert(n.id);
                        }
                        Entry::Edge(e) => {
                            self.edges.insert(e.id);
                        }
                        Entry::Unset => {}
                        Entry::Scalar(Value::Null) => {}
                        other => {
                            return Err(Error::TypeError {
                                expected: "Node or Relationship".into(),
                                got: format!("{other:?}"),
                            })
                        }
                    }
                }
                Ok(Some(record))
            }
            None => {
                self.perform_deletions(ctx)?;
                self.state = OpState::Exhausted;
                Ok(None)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.nodes.clear();
        self.edges.clear();
        self.deleted = false;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Delete::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.slots.clone(),
            self.detach,
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

// ============================================================================
// Merge
// ============================================================================

/// Upsert: run the embedded match; on any row, apply the on-match
/// updates and emit each row merged with the input; on none, create the
/// pattern and apply the on-create updates.
pub struct Merge {
    graph: Arc<Graph>,
    child: BoxOp,
    matcher: BoxOp,
    create_spec: CreateSpec,
    on_create: Vec<UpdateItem>,
    on_match: Vec<UpdateItem>,
    buffered: Vec<Record>,
    state: OpState,
}

impl Merge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Graph>,
        child: BoxOp,
        matcher: BoxOp,
        create_spec: CreateSpec,
        on_create: Vec<UpdateItem>,
        on_match: Vec<UpdateItem>,
    ) -> Self {
        Self {
            graph,
            child,
            matcher,
            create_spec,
            on_create,
            on_match,
            buffered: Vec::new(),
            state: OpState::Uninit,
        }
    }
}

impl Operator for Merge {
    fn name(&self) -> &'static str {
        "Merge"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.matcher.init(ctx)?;
        self.buffered.clear();
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        loop {
            if let Some(record) = self.buffered.pop() {
                return Ok(Some(record));
            }

            let Some(input) = self.child.consume(ctx)? else {
                self.state = OpState::Exhausted;
                return Ok(None);
            };

            // Replay the match subtree for this input row.
            self.matcher.reset()?;
            let mut matched = Vec::new();
            while let Some(row) = self.matcher.consume(ctx)? {
                matched.push(row);
            }

            if matched.is_empty() {
                let mut record = input;
                apply_create(&self.graph, ctx, &mut record, &self.create_spec)?;
                apply_updates(&self.graph, ctx, &record, &self.on_create)?;
                self.buffered.push(record);
            } else {
                for mut row in matched.into_iter().rev() {
                    row.merge(&input);
                    apply_updates(&self.graph, ctx, &row, &self.on_match)?;
                    self.buffered.push(row);
                }
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.matcher.reset()?;
        self.buffered.clear();
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Merge::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.matcher.clone_op(),
            self.create_spec.clone(),
            self.on_create.clone(),
            self.on_match.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref(), self.matcher.as_ref()]
    }
}
