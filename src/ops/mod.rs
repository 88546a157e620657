//! # Execution Operators
//!
//! Pull-based operator tree. The root calls [`Operator::consume`] until
//! it yields `None`; each operator pulls from its children as needed. A
//! record returned by `consume` is owned by the caller. Errors
//! propagate with `?` to the plan root, which records them on the query
//! context — no operator recovers or retries.

pub mod aggregate;
pub mod call;
pub mod filter;
pub mod join;
pub mod mutate;
pub mod results;
pub mod scan;
pub mod sort;
pub mod traverse;

use std::sync::Arc;

use crate::expr::Evaluator;
use crate::graph::Graph;
use crate::model::Value;
use crate::query_ctx::QueryCtx;
use crate::record::Record;
use crate::Result;

/// Lifecycle of an operator. `Freed` is the Rust drop; `Error` is the
/// propagated `Err` — both exist only as transitions here, not as
/// stored states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpState {
    #[default]
    Uninit,
    Init,
    Producing,
    Exhausted,
}

/// The operator contract.
pub trait Operator: Send {
    fn name(&self) -> &'static str;

    /// One-time setup before the first `consume`.
    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()>;

    /// Produce the next record, or `None` when exhausted.
    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>>;

    /// Return to the post-`init` state so the subtree can be replayed.
    fn reset(&mut self) -> Result<()>;

    /// Clone the operator's configuration (not its runtime state) into
    /// a fresh `Uninit` instance.
    fn clone_op(&self) -> BoxOp;

    /// Child operators, for plan rendering.
    fn children(&self) -> Vec<&dyn Operator> {
        Vec::new()
    }
}

pub type BoxOp = Box<dyn Operator>;

/// Render an operator tree, one operator per line, children indented.
pub fn render_plan(op: &dyn Operator, depth: usize, out: &mut Vec<String>) {
    out.push(format!("{}{}", "    ".repeat(depth), op.name()));
    for child in op.children() {
        render_plan(child, depth + 1, out);
    }
}

/// Evaluate an expression against a record in this query's context.
pub fn eval(
    graph: &Arc<Graph>,
    ctx: &QueryCtx,
    expr: &crate::cypher::ast::Expr,
    record: &Record,
) -> Result<Value> {
    Evaluator::new(graph, &ctx.params).evaluate(expr, record)
}

/// Source operator producing exactly one empty record; seeds pipelines
/// that start from nothing (`CREATE`, `UNWIND`, `RETURN 1`).
pub struct ArgumentOp {
    mapping: Arc<crate::record::AliasMap>,
    state: OpState,
}

impl ArgumentOp {
    pub fn new(mapping: Arc<crate::record::AliasMap>) -> Self {
        Self { mapping, state: OpState::Uninit }
    }
}

impl Operator for ArgumentOp {
    fn name(&self) -> &'static str {
        "Argument"
    }

    fn init(&mut self, _ctx: &mut QueryCtx) -> Result<()> {
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        match self.state {
            OpState::Init => {
                self.state = OpState::Exhausted;
                Ok(Some(Record::new(self.mapping.clone())))
            }
            _ => Ok(None),
        }
    }

    fn reset(&mut self) -> Result<()> {
        if self.state != OpState::Uninit {
            self.state = OpState::Init;
        }
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(ArgumentOp::new(self.mapping.clone()))
    }
}
