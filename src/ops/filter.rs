//! Record-stream transforms: filter, project, unwind.

use std::sync::Arc;

use crate::cypher::ast::Expr;
use crate::graph::Graph;
use crate::model::Value;
use crate::query_ctx::QueryCtx;
use crate::record::Record;
use crate::Result;

use super::{eval, BoxOp, OpState, Operator};

/// Forwards records whose predicate evaluates to boolean true; null and
/// non-boolean results drop the record.
pub struct Filter {
    graph: Arc<Graph>,
    child: BoxOp,
    predicate: Expr,
    state: OpState,
}

impl Filter {
    pub fn new(graph: Arc<Graph>, child: BoxOp, predicate: Expr) -> Self {
        Self { graph, child, predicate, state: OpState::Uninit }
    }
}

impl Operator for Filter {
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        self.state = OpState::Producing;
        loop {
            ctx.check_cancelled()?;
            let Some(record) = self.child.consume(ctx)? else {
                self.state = OpState::Exhausted;
                return Ok(None);
            };
            if eval(&self.graph, ctx, &self.predicate, &record)? == Value::Bool(true) {
                return Ok(Some(record));
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Filter::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.predicate.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

/// Evaluates projection items into their output slots. Input entries
/// are carried through so later ORDER BY expressions can still reach
/// the variables they reference.
pub struct Project {
    graph: Arc<Graph>,
    child: BoxOp,
    items: Vec<(Expr, usize)>,
    state: OpState,
}

impl Project {
    pub fn new(graph: Arc<Graph>, child: BoxOp, items: Vec<(Expr, usize)>) -> Self {
        Self { graph, child, items, state: OpState::Uninit }
    }
}

impl Operator for Project {
    fn name(&self) -> &'static str {
        "Project"
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
        let mut out = record.clone();
        for (expr, slot) in &self.items {
            let v = eval(&self.graph, ctx, expr, &record)?;
            out.set(*slot, v);
        }
        Ok(Some(out))
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Project::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.items.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

/// Expands a list expression into one record per element. Null unwinds
/// to zero rows; a non-list value unwinds to itself.
pub struct Unwind {
    graph: Arc<Graph>,
    child: BoxOp,
    expr: Expr,
    slot: usize,
    current: Option<(Record, Vec<Value>, usize)>,
    state: OpState,
}

impl Unwind {
    pub fn new(graph: Arc<Graph>, child: BoxOp, expr: Expr, slot: usize) -> Self {
        Self {
            graph,
            child,
            expr,
            slot,
            current: None,
            state: OpState::Uninit,
        }
    }
}

impl Operator for Unwind {
    fn name(&self) -> &'static str {
        "Unwind"
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
            if let Some((record, items, cursor)) = self.current.as_mut() {
                if *cursor < items.len() {
                    let v = items[*cursor].clone();
                    *cursor += 1;
                    let mut out = record.clone();
                    out.set(self.slot, v);
                    return Ok(Some(out));
                }
                self.current = None;
            }

            let Some(record) = self.child.consume(ctx)? else {
                self.state = OpState::Exhausted;
                return Ok(None);
            };
            let items = match eval(&self.graph, ctx, &self.expr, &record)? {
                Value::List(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            self.current = Some((record, items, 0));
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.current = None;
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Unwind::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.expr.clone(),
            self.slot,
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::ast::Literal;
    use crate::ops::ArgumentOp;
    use crate::record::AliasMap;

    #[test]
    fn test_unwind_list() {
        let graph = Arc::new(Graph::new("f"));
        let mut mapping = AliasMap::new();
        let slot = mapping.reserve("x");
        let mapping = Arc::new(mapping);

        let list = Expr::List(vec![
            Expr::Literal(Literal::Int(1)),
            Expr::Literal(Literal::Int(2)),
        ]);
        let mut op = Unwind::new(
            graph,
            Box::new(ArgumentOp::new(mapping)),
            list,
            slot,
        );
        let mut ctx = QueryCtx::new();
        op.init(&mut ctx).unwrap();
        let mut vals = Vec::new();
        while let Some(r) = op.consume(&mut ctx).unwrap() {
            vals.push(r.get(slot));
        }
        assert_eq!(vals, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_unwind_null_is_empty() {
        let graph = Arc::new(Graph::new("f"));
        let mut mapping = AliasMap::new();
        let slot = mapping.reserve("x");
        let mapping = Arc::new(mapping);

        let mut op = Unwind::new(
            graph,
            Box::new(ArgumentOp::new(mapping)),
            Expr::Literal(Literal::Null),
            slot,
        );
        let mut ctx = QueryCtx::new();
        op.init(&mut ctx).unwrap();
        assert!(op.consume(&mut ctx).unwrap().is_none());
    }
}
