//! Scan operators: the leaves that pull entities out of the store and
//! the label matrices.

use std::sync::Arc;

use crate::cypher::ast::Expr;
use crate::graph::Graph;
use crate::model::{AttrId, EdgeId, NodeId, Value};
use crate::query_ctx::QueryCtx;
use crate::record::{AliasMap, Record};
use crate::Result;

use super::{eval, BoxOp, OpState, Operator};

/// Emits one record per alive node, ascending id.
pub struct AllNodeScan {
    graph: Arc<Graph>,
    mapping: Arc<AliasMap>,
    slot: usize,
    ids: Vec<NodeId>,
    cursor: usize,
    state: OpState,
}

impl AllNodeScan {
    pub fn new(graph: Arc<Graph>, mapping: Arc<AliasMap>, slot: usize) -> Self {
        Self {
            graph,
            mapping,
            slot,
            ids: Vec::new(),
            cursor: 0,
            state: OpState::Uninit,
        }
    }
}

impl Operator for AllNodeScan {
    fn name(&self) -> &'static str {
        "AllNodeScan"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        let horizon = ctx.read_view().node_horizon;
        self.ids = self.graph.all_node_ids();
        self.ids.retain(|id| id.0 < horizon);
        self.cursor = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        while self.cursor < self.ids.len() {
            let id = self.ids[self.cursor];
            self.cursor += 1;
            // Skip slots tombstoned after init.
            if let Some(node) = self.graph.node(id) {
                let mut record = Record::new(self.mapping.clone());
                record.set_node(self.slot, node);
                return Ok(Some(record));
            }
        }
        self.state = OpState::Exhausted;
        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        self.cursor = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(AllNodeScan::new(
            self.graph.clone(),
            self.mapping.clone(),
            self.slot,
        ))
    }
}

/// Emits one record per node on the diagonal of `L_k`.
pub struct LabelScan {
    graph: Arc<Graph>,
    mapping: Arc<AliasMap>,
    slot: usize,
    label: String,
    ids: Vec<NodeId>,
    cursor: usize,
    state: OpState,
}

impl LabelScan {
    pub fn new(
        graph: Arc<Graph>,
        mapping: Arc<AliasMap>,
        slot: usize,
        label: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            mapping,
            slot,
            label: label.into(),
            ids: Vec::new(),
            cursor: 0,
            state: OpState::Uninit,
        }
    }
}

impl Operator for LabelScan {
    fn name(&self) -> &'static str {
        "LabelScan"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.ids = match self.graph.label_id(&self.label) {
            Some(label) => self.graph.label_node_ids(label, ctx.read_view()),
            // Unknown label: empty scan, not an error.
            None => Vec::new(),
        };
        self.cursor = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        while self.cursor < self.ids.len() {
            let id = self.ids[self.cursor];
            self.cursor += 1;
            if let Some(node) = self.graph.node(id) {
                ctx.burble(|| format!("LabelScan hit node {id}"));
                let mut record = Record::new(self.mapping.clone());
                record.set_node(self.slot, node);
                return Ok(Some(record));
            }
        }
        self.state = OpState::Exhausted;
        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        self.cursor = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(LabelScan::new(
            self.graph.clone(),
            self.mapping.clone(),
            self.slot,
            self.label.clone(),
        ))
    }
}

/// Emits one record per alive edge, ascending id.
pub struct AllEdgeScan {
    graph: Arc<Graph>,
    mapping: Arc<AliasMap>,
    slot: usize,
    ids: Vec<EdgeId>,
    cursor: usize,
    state: OpState,
}

impl AllEdgeScan {
    pub fn new(graph: Arc<Graph>, mapping: Arc<AliasMap>, slot: usize) -> Self {
        Self {
            graph,
            mapping,
            slot,
            ids: Vec::new(),
            cursor: 0,
            state: OpState::Uninit,
        }
    }
}

impl Operator for AllEdgeScan {
    fn name(&self) -> &'static str {
        "AllEdgeScan"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        let horizon = ctx.read_view().edge_horizon;
        self.ids = self.graph.all_edge_ids();
        self.ids.retain(|id| id.0 < horizon);
        self.cursor = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        while self.cursor < self.ids.len() {
            let id = self.ids[self.cursor];
            self.cursor += 1;
            if let Some(edge) = self.graph.edge(id) {
                let mut record = Record::new(self.mapping.clone());
                record.set_edge(self.slot, edge);
                return Ok(Some(record));
            }
        }
        self.state = OpState::Exhausted;
        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        self.cursor = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(AllEdgeScan::new(
            self.graph.clone(),
            self.mapping.clone(),
            self.slot,
        ))
    }
}

/// Label scan narrowed by a property range over a registered index.
/// The store has no secondary B-tree; the scan walks the label
/// diagonal and filters by the bound attribute, which keeps the
/// operator contract while indices stay declarative.
pub struct IndexScan {
    graph: Arc<Graph>,
    mapping: Arc<AliasMap>,
    slot: usize,
    label: String,
    attr: String,
    lower: Option<(Expr, bool)>,
    upper: Option<(Expr, bool)>,
    ids: Vec<NodeId>,
    cursor: usize,
    resolved: Option<AttrId>,
    bounds: Option<(Option<(Value, bool)>, Option<(Value, bool)>)>,
    state: OpState,
}

impl IndexScan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Graph>,
        mapping: Arc<AliasMap>,
        slot: usize,
        label: impl Into<String>,
        attr: impl Into<String>,
        lower: Option<(Expr, bool)>,
        upper: Option<(Expr, bool)>,
    ) -> Self {
        Self {
            graph,
            mapping,
            slot,
            label: label.into(),
            attr: attr.into(),
            lower,
            upper,
            ids: Vec::new(),
            cursor: 0,
            resolved: None,
            bounds: None,
            state: OpState::Uninit,
        }
    }

    fn in_range(&self, v: &Value) -> bool {
        let Some((lower, upper)) = &self.bounds else {
            return true;
        };
        if let Some((bound, inclusive)) = lower {
            match v.compare(bound) {
                Some(std::cmp::Ordering::Greater) => {}
                Some(std::cmp::Ordering::Equal) if *inclusive => {}
                _ => return false,
            }
        }
        if let Some((bound, inclusive)) = upper {
            match v.compare(bound) {
                Some(std::cmp::Ordering::Less) => {}
                Some(std::cmp::Ordering::Equal) if *inclusive => {}
                _ => return false,
            }
        }
        true
    }
}

impl Operator for IndexScan {
    fn name(&self) -> &'static str {
        "IndexScan"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.ids = match self.graph.label_id(&self.label) {
            Some(label) => self.graph.label_node_ids(label, ctx.read_view()),
            None => Vec::new(),
        };
        self.resolved = self.graph.attr_id(&self.attr);
        let empty = Record::new(self.mapping.clone());
        let resolve = |spec: &Option<(Expr, bool)>| -> Result<Option<(Value, bool)>> {
            match spec {
                Some((expr, inclusive)) => {
                    Ok(Some((eval(&self.graph, ctx, expr, &empty)?, *inclusive)))
                }
                None => Ok(None),
            }
        };
        let lower = resolve(&self.lower)?;
        let upper = resolve(&self.upper)?;
        self.bounds = Some((lower, upper));
        self.cursor = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        let Some(attr) = self.resolved else {
            self.state = OpState::Exhausted;
            return Ok(None);
        };
        while self.cursor < self.ids.len() {
            let id = self.ids[self.cursor];
            self.cursor += 1;
            let Some(node) = self.graph.node(id) else {
                continue;
            };
            let v = self.graph.node_property(id, attr);
            if v.is_null() || !self.in_range(&v) {
                continue;
            }
            let mut record = Record::new(self.mapping.clone());
            record.set_node(self.slot, node);
            return Ok(Some(record));
        }
        self.state = OpState::Exhausted;
        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        self.cursor = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(IndexScan::new(
            self.graph.clone(),
            self.mapping.clone(),
            self.slot,
            self.label.clone(),
            self.attr.clone(),
            self.lower.clone(),
            self.upper.clone(),
        ))
    }
}
