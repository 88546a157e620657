//! Traversal operators, backed by the relation matrices.
//!
//! One-hop traversal pulls the destination vector `R_tᵀ · e_src` out of
//! the algebra and recovers edge identity from the hexastore; the
//! variable-length form walks matrix powers hop by hop, pruning nodes
//! already on the path. Destinations come out in ascending node id.

use std::sync::Arc;

use crate::cypher::ast::PatternDirection;
use crate::graph::Graph;
use crate::model::{Edge, RelTypeId, Value};
use crate::query_ctx::QueryCtx;
use crate::record::Record;
use crate::{Error, Result};

use super::{BoxOp, OpState, Operator};

fn resolve_types(graph: &Graph, names: &[String]) -> Vec<RelTypeId> {
    if names.is_empty() {
        return graph.all_rel_type_ids();
    }
    names
        .iter()
        .filter_map(|name| graph.rel_type_id(name))
        .collect()
}

fn hops(
    graph: &Graph,
    ctx: &QueryCtx,
    src: crate::model::NodeId,
    types: &[RelTypeId],
    direction: PatternDirection,
) -> Vec<Edge> {
    let view = ctx.read_view();
    match direction {
        PatternDirection::Right => graph.traverse_out(src, types, view),
        PatternDirection::Left => graph.traverse_in(src, types, view),
        PatternDirection::Both => {
            let mut out = graph.traverse_out(src, types, view);
            for e in graph.traverse_in(src, types, view) {
                // A self-loop appears in both sweeps.
                if !(e.src == src && e.dst == src) {
                    out.push(e);
                }
            }
            out
        }
    }
}

/// Expand from a bound source: one output record per reachable
/// (edge, destination).
pub struct ConditionalTraverse {
    graph: Arc<Graph>,
    child: BoxOp,
    src_slot: usize,
    dst_slot: usize,
    edge_slot: Option<usize>,
    rel_types: Vec<String>,
    direction: PatternDirection,
    current: Option<(Record, Vec<Edge>, usize)>,
    state: OpState,
}

impl ConditionalTraverse {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Graph>,
        child: BoxOp,
        src_slot: usize,
        dst_slot: usize,
        edge_slot: Option<usize>,
        rel_types: Vec<String>,
        direction: PatternDirection,
    ) -> Self {
        Self {
            graph,
            child,
            src_slot,
            dst_slot,
            edge_slot,
            rel_types,
            direction,
            current: None,
            state: OpState::Uninit,
        }
    }

    fn emit(
        graph: &Graph,
        direction: PatternDirection,
        src_slot: usize,
        dst_slot: usize,
        edge_slot: Option<usize>,
        record: &Record,
        edge: Edge,
    ) -> Result<Option<Record>> {
        let other = match direction {
            PatternDirection::Right => edge.dst,
            PatternDirection::Left => edge.src,
            PatternDirection::Both => {
                let src = record
                    .get_node(src_slot)
                    .ok_or_else(|| Error::Internal("traverse source unbound".into()))?
                    .id;
                edge.other_node(src).unwrap_or(edge.dst)
            }
        };
        let Some(dst_node) = graph.node(other) else {
            return Ok(None);
        };
        let mut out = record.clone();
        out.set_node(dst_slot, dst_node);
        if let Some(slot) = edge_slot {
            out.set_edge(slot, edge);
        }
        Ok(Some(out))
    }
}

impl Operator for ConditionalTraverse {
    fn name(&self) -> &'static str {
        "ConditionalTraverse"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.current = None;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        loop {
            if let Some((record, edges, cursor)) = self.current.as_mut() {
                while *cursor < edges.len() {
                    let edge = edges[*cursor];
                    *cursor += 1;
                    if let Some(out) = Self::emit(
                        &self.graph,
                        self.direction,
                        self.src_slot,
                        self.dst_slot,
                        self.edge_slot,
                        record,
                        edge,
                    )? {
                        return Ok(Some(out));
                    }
                }
                self.current = None;
            }

            let Some(record) = self.child.consume(ctx)? else {
                self.state = OpState::Exhausted;
                return Ok(None);
            };
            let Some(src) = record.get_node(self.src_slot).map(|n| n.id) else {
                // Unbound source (e.g. null from an upstream row).
                continue;
            };
            let types = resolve_types(&self.graph, &self.rel_types);
            let edges = hops(&self.graph, ctx, src, &types, self.direction);
            ctx.burble(|| {
                format!("ConditionalTraverse from {src}: {} edges", edges.len())
            });
            self.current = Some((record, edges, 0));
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.current = None;
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(ConditionalTraverse::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.src_slot,
            self.dst_slot,
            self.edge_slot,
            self.rel_types.clone(),
            self.direction,
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

/// Both endpoints already bound: test `R_t[src, dst]` directly.
pub struct ExpandInto {
    graph: Arc<Graph>,
    child: BoxOp,
    src_slot: usize,
    dst_slot: usize,
    edge_slot: Option<usize>,
    rel_types: Vec<String>,
    direction: PatternDirection,
    current: Option<(Record, Vec<Edge>, usize)>,
    state: OpState,
}

impl ExpandInto {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Graph>,
        child: BoxOp,
        src_slot: usize,
        dst_slot: usize,
        edge_slot: Option<usize>,
        rel_types: Vec<String>,
        direction: PatternDirection,
    ) -> Self {
        Self {
            graph,
            child,
            src_slot,
            dst_slot,
            edge_slot,
            rel_types,
            direction,
            current: None,
            state: OpState::Uninit,
        }
    }
}

impl Operator for ExpandInto {
    fn name(&self) -> &'static str {
        "ExpandInto"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.current = None;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        loop {
            if let Some((record, edges, cursor)) = self.current.as_mut() {
                if *cursor < edges.len() {
                    let edge = edges[*cursor];
                    *cursor += 1;
                    let mut out = record.clone();
                    if let Some(slot) = self.edge_slot {
                        out.set_edge(slot, edge);
                    }
                    return Ok(Some(out));
                }
                self.current = None;
            }

            let Some(record) = self.child.consume(ctx)? else {
                self.state = OpState::Exhausted;
                return Ok(None);
            };
            let (Some(src), Some(dst)) = (
                record.get_node(self.src_slot).map(|n| n.id),
                record.get_node(self.dst_slot).map(|n| n.id),
            ) else {
                continue;
            };
            let types = resolve_types(&self.graph, &self.rel_types);
            let view = ctx.read_view();
            let edges = match self.direction {
                PatternDirection::Right => {
                    self.graph.edges_between(src, dst, &types, view)
                }
                PatternDirection::Left => {
                    self.graph.edges_between(dst, src, &types, view)
                }
                PatternDirection::Both => {
                    let mut out = self.graph.edges_between(src, dst, &types, view);
                    if src != dst {
                        out.extend(self.graph.edges_between(dst, src, &types, view));
                    }
                    out
                }
            };
            self.current = Some((record, edges, 0));
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.current = None;
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(ExpandInto::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.src_slot,
            self.dst_slot,
            self.edge_slot,
            self.rel_types.clone(),
            self.direction,
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

/// Variable-length expansion `*min..max`: walks hop by hop, pruning
/// nodes already on the partial path, emitting each qualifying path's
/// destination and edge list.
pub struct VarLenTraverse {
    graph: Arc<Graph>,
    child: BoxOp,
    src_slot: usize,
    dst_slot: usize,
    edge_list_slot: Option<usize>,
    rel_types: Vec<String>,
    direction: PatternDirection,
    min: usize,
    max: usize,
    /// Pending (destination node, edges walked) results for the
    /// current input record.
    buffered: Vec<(Record, Vec<Edge>, crate::model::NodeId)>,
    state: OpState,
}

/// Hard ceiling on unbounded expansions.
const MAX_VAR_LEN_DEPTH: usize = 32;

impl VarLenTraverse {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Graph>,
        child: BoxOp,
        src_slot: usize,
        dst_slot: usize,
        edge_list_slot: Option<usize>,
        rel_types: Vec<String>,
        direction: PatternDirection,
        min: Option<usize>,
        max: Option<usize>,
    ) -> Self {
        Self {
            graph,
            child,
            src_slot,
            dst_slot,
            edge_list_slot,
            rel_types,
            direction,
            min: min.unwrap_or(1),
            max: max.unwrap_or(MAX_VAR_LEN_DEPTH).min(MAX_VAR_LEN_DEPTH),
            buffered: Vec::new(),
            state: OpState::Uninit,
        }
    }

    fn expand(&self, ctx: &QueryCtx, record: &Record) -> Vec<(Record, Vec<Edge>, crate::model::NodeId)> {
        let Some(src) = record.get_node(self.src_slot).map(|n| n.id) else {
            return Vec::new();
        };
        let types = resolve_types(&self.graph, &self.rel_types);
        let mut results = Vec::new();

        // The closed interval includes k = 0: the zero-hop path ends
        // where it starts, with no edges walked.
        if self.min == 0 {
            results.push((record.clone(), Vec::new(), src));
        }

        // Frontier of partial paths: (tip, nodes-on-path, edges walked).
        let mut frontier: Vec<(crate::model::NodeId, Vec<crate::model::NodeId>, Vec<Edge>)> =
            vec![(src, vec![src], Vec::new())];

        for depth in 1..=self.max {
            let mut next = Vec::new();
            for (tip, visited, walked) in &frontier {
                for edge in hops(&self.graph, ctx, *tip, &types, self.direction) {
                    let other = edge.other_node(*tip).unwrap_or(edge.dst);
                    // Prune nodes already on this path.
                    if visited.contains(&other) {
                        continue;
                    }
                    let mut edges = walked.clone();
                    edges.push(edge);
                    if depth >= self.min {
                        results.push((record.clone(), edges.clone(), other));
                    }
                    if depth < self.max {
                        let mut nodes = visited.clone();
                        nodes.push(other);
                        next.push((other, nodes, edges));
                    }
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }
        // Emit in discovery order; reverse so pop() preserves it.
        results.reverse();
        results
    }
}

impl Operator for VarLenTraverse {
    fn name(&self) -> &'static str {
        "VarLenTraverse"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.buffered.clear();
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        loop {
            if let Some((record, edges, dst)) = self.buffered.pop() {
                let Some(dst_node) = self.graph.node(dst) else {
                    continue;
                };
                let mut out = record;
                out.set_node(self.dst_slot, dst_node);
                if let Some(slot) = self.edge_list_slot {
                    out.set(
                        slot,
                        Value::List(edges.into_iter().map(Value::Edge).collect()),
                    );
                }
                return Ok(Some(out));
            }

            let Some(record) = self.child.consume(ctx)? else {
                self.state = OpState::Exhausted;
                return Ok(None);
            };
            self.buffered = self.expand(ctx, &record);
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.buffered.clear();
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(VarLenTraverse::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.src_slot,
            self.dst_slot,
            self.edge_list_slot,
            self.rel_types.clone(),
            self.direction,
            Some(self.min),
            Some(self.max),
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}
