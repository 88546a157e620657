//! Terminal operator: drains the plan into a result set.

use crate::query_ctx::QueryCtx;
use crate::record::Record;
use crate::resultset::ResultSet;
use crate::Result;

use super::{BoxOp, OpState, Operator};

/// Root of every plan. Pulls records from its child until exhaustion or
/// the result-set row cap, streaming them into the result set.
pub struct Results {
    child: BoxOp,
    state: OpState,
}

impl Results {
    pub fn new(child: BoxOp) -> Self {
        Self { child, state: OpState::Uninit }
    }

    /// Drive the whole plan to completion.
    pub fn run(&mut self, ctx: &mut QueryCtx, resultset: &mut ResultSet) -> Result<()> {
        self.init(ctx)?;
        while let Some(record) = self.consume(ctx)? {
            if !resultset.add_record(record) {
                break;
            }
        }
        Ok(())
    }
}

impl Operator for Results {
    fn name(&self) -> &'static str {
        "Results"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        match self.child.consume(ctx)? {
            Some(r) => Ok(Some(r)),
            None => {
                self.state = OpState::Exhausted;
                Ok(None)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Results::new(self.child.clone_op()))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}
