//! Join and combinator operators.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::cypher::ast::Expr;
use crate::graph::Graph;
use crate::model::Value;
use crate::query_ctx::QueryCtx;
use crate::record::{AliasMap, Record};
use crate::Result;

use super::{eval, BoxOp, OpState, Operator};

/// Nested-loop product over any number of branches. The rightmost
/// branch advances fastest; exhausted branches reset and the next one
/// to the left advances.
pub struct CartesianProduct {
    mapping: Arc<AliasMap>,
    children: Vec<BoxOp>,
    current: Vec<Option<Record>>,
    primed: bool,
    state: OpState,
}

impl CartesianProduct {
    pub fn new(mapping: Arc<AliasMap>, children: Vec<BoxOp>) -> Self {
        let n = children.len();
        Self {
            mapping,
            children,
            current: (0..n).map(|_| None).collect(),
            primed: false,
            state: OpState::Uninit,
        }
    }

    fn merged(&self) -> Record {
        let mut out = Record::new(self.mapping.clone());
        for rec in self.current.iter().flatten() {
            out.merge(rec);
        }
        out
    }
}

impl Operator for CartesianProduct {
    fn name(&self) -> &'static str {
        "CartesianProduct"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        for child in &mut self.children {
            child.init(ctx)?;
        }
        self.current.iter_mut().for_each(|c| *c = None);
        self.primed = false;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;

        if !self.primed {
            for idx in 0..self.children.len() {
                match self.children[idx].consume(ctx)? {
                    Some(r) => self.current[idx] = Some(r),
                    None => {
                        self.state = OpState::Exhausted;
                        return Ok(None);
                    }
                }
            }
            self.primed = true;
            return Ok(Some(self.merged()));
        }

        // Odometer advance from the rightmost branch.
        let mut idx = self.children.len();
        loop {
            if idx == 0 {
                self.state = OpState::Exhausted;
                return Ok(None);
            }
            idx -= 1;
            match self.children[idx].consume(ctx)? {
                Some(r) => {
                    self.current[idx] = Some(r);
                    // Restart everything to the right.
                    for right in idx + 1..self.children.len() {
                        self.children[right].reset()?;
                        match self.children[right].consume(ctx)? {
                            Some(r) => self.current[right] = Some(r),
                            None => {
                                self.state = OpState::Exhausted;
                                return Ok(None);
                            }
                        }
                    }
                    return Ok(Some(self.merged()));
                }
                None => continue,
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.reset()?;
        }
        self.current.iter_mut().for_each(|c| *c = None);
        self.primed = false;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(CartesianProduct::new(
            self.mapping.clone(),
            self.children.iter().map(|c| c.clone_op()).collect(),
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }
}

/// Equi-join on evaluated key expressions. Eager left build: the left
/// branch is drained, each row augmented with its join key at the
/// reserved pivot slot, and the cache sorted by key; right rows then
/// binary-search the matching run. Null keys never match.
pub struct ValueHashJoin {
    graph: Arc<Graph>,
    left: BoxOp,
    right: BoxOp,
    lhs_expr: Expr,
    rhs_expr: Expr,
    pivot_slot: usize,
    cache: Vec<Record>,
    built: bool,
    rhs_rec: Option<Record>,
    intersect_at: usize,
    intersections: usize,
    state: OpState,
}

impl ValueHashJoin {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Graph>,
        left: BoxOp,
        right: BoxOp,
        lhs_expr: Expr,
        rhs_expr: Expr,
        pivot_slot: usize,
    ) -> Self {
        Self {
            graph,
            left,
            right,
            lhs_expr,
            rhs_expr,
            pivot_slot,
            cache: Vec::new(),
            built: false,
            rhs_rec: None,
            intersect_at: 0,
            intersections: 0,
            state: OpState::Uninit,
        }
    }

    fn build(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        while let Some(mut record) = self.left.consume(ctx)? {
            ctx.check_cancelled()?;
            let key = eval(&self.graph, ctx, &self.lhs_expr, &record)?;
            if key.is_null() {
                continue;
            }
            record.set(self.pivot_slot, key);
            self.cache.push(record);
        }
        let pivot = self.pivot_slot;
        self.cache
            .sort_by(|a, b| a.get(pivot).total_cmp(&b.get(pivot)));
        self.built = true;
        Ok(())
    }

    /// Leftmost cache index whose pivot equals `key`, if any.
    fn search_leftmost(&self, key: &Value) -> Option<usize> {
        let pos = self
            .cache
            .partition_point(|r| r.get(self.pivot_slot).total_cmp(key) == Ordering::Less);
        (pos < self.cache.len() && self.cache[pos].get(self.pivot_slot).total_eq(key))
            .then_some(pos)
    }

    /// Exclusive right bound of the matching run starting at `from`.
    fn search_rightmost(&self, key: &Value, from: usize) -> usize {
        from + self.cache[from..]
            .partition_point(|r| r.get(self.pivot_slot).total_cmp(key) != Ordering::Greater)
    }
}

impl Operator for ValueHashJoin {
    fn name(&self) -> &'static str {
        "ValueHashJoin"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.left.init(ctx)?;
        self.right.init(ctx)?;
        self.cache.clear();
        self.built = false;
        self.rhs_rec = None;
        self.intersections = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        if !self.built {
            self.build(ctx)?;
        }

        loop {
            if self.intersections > 0 {
                let idx = self.intersect_at;
                self.intersect_at += 1;
                self.intersections -= 1;
                let mut out = self.cache[idx].clone();
                if let Some(rhs) = &self.rhs_rec {
                    out.merge(rhs);
                }
                return Ok(Some(out));
            }

            self.rhs_rec = None;
            let Some(rhs) = self.right.consume(ctx)? else {
                self.state = OpState::Exhausted;
                return Ok(None);
            };
            let key = eval(&self.graph, ctx, &self.rhs_expr, &rhs)?;
            if key.is_null() {
                continue;
            }
            let Some(left) = self.search_leftmost(&key) else {
                continue;
            };
            let right = self.search_rightmost(&key, left);
            self.intersect_at = left;
            self.intersections = right - left;
            self.rhs_rec = Some(rhs);
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.left.reset()?;
        self.right.reset()?;
        self.cache.clear();
        self.built = false;
        self.rhs_rec = None;
        self.intersections = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(ValueHashJoin::new(
            self.graph.clone(),
            self.left.clone_op(),
            self.right.clone_op(),
            self.lhs_expr.clone(),
            self.rhs_expr.clone(),
            self.pivot_slot,
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }
}

/// Concatenates branches in order. Deduplication, when requested, is a
/// distinct operator layered on top by the planner.
pub struct UnionOp {
    children: Vec<BoxOp>,
    active: usize,
    state: OpState,
}

impl UnionOp {
    pub fn new(children: Vec<BoxOp>) -> Self {
        Self { children, active: 0, state: OpState::Uninit }
    }
}

impl Operator for UnionOp {
    fn name(&self) -> &'static str {
        "Union"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        for child in &mut self.children {
            child.init(ctx)?;
        }
        self.active = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        while self.active < self.children.len() {
            if let Some(r) = self.children[self.active].consume(ctx)? {
                return Ok(Some(r));
            }
            self.active += 1;
        }
        self.state = OpState::Exhausted;
        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.reset()?;
        }
        self.active = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(UnionOp::new(
            self.children.iter().map(|c| c.clone_op()).collect(),
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::ast::Literal;
    use crate::ops::filter::Unwind;
    use crate::ops::ArgumentOp;

    fn unwinder(
        graph: &Arc<Graph>,
        mapping: &Arc<AliasMap>,
        alias: &str,
        vals: &[i64],
    ) -> BoxOp {
        let slot = mapping.get(alias).unwrap();
        let list = Expr::List(
            vals.iter()
                .map(|&v| Expr::Literal(Literal::Int(v)))
                .collect(),
        );
        Box::new(Unwind::new(
            graph.clone(),
            Box::new(ArgumentOp::new(mapping.clone())),
            list,
            slot,
        ))
    }

    fn mapping_of(aliases: &[&str]) -> Arc<AliasMap> {
        let mut m = AliasMap::new();
        for a in aliases {
            m.reserve(a);
        }
        Arc::new(m)
    }

    #[test]
    fn test_cartesian_product_order() {
        let graph = Arc::new(Graph::new("join"));
        let mapping = mapping_of(&["a", "b"]);
        let left = unwinder(&graph, &mapping, "a", &[1, 2]);
        let right = unwinder(&graph, &mapping, "b", &[10, 20]);
        let mut op = CartesianProduct::new(mapping.clone(), vec![left, right]);

        let mut ctx = QueryCtx::new();
        op.init(&mut ctx).unwrap();
        let a = mapping.get("a").unwrap();
        let b = mapping.get("b").unwrap();
        let mut rows = Vec::new();
        while let Some(r) = op.consume(&mut ctx).unwrap() {
            rows.push((r.get(a), r.get(b)));
        }
        assert_eq!(rows, vec![
            (Value::Int(1), Value::Int(10)),
            (Value::Int(1), Value::Int(20)),
            (Value::Int(2), Value::Int(10)),
            (Value::Int(2), Value::Int(20)),
        ]);
    }

    #[test]
    fn test_value_hash_join_matches_runs() {
        let graph = Arc::new(Graph::new("join"));
        let mapping = mapping_of(&["a", "b", "@pivot"]);
        let left = unwinder(&graph, &mapping, "a", &[1, 2, 2, 3]);
        let right = unwinder(&graph, &mapping, "b", &[2, 3, 4]);
        let pivot = mapping.get("@pivot").unwrap();

        let mut op = ValueHashJoin::new(
            graph,
            left,
            right,
            Expr::Variable("a".into()),
            Expr::Variable("b".into()),
            pivot,
        );
        let mut ctx = QueryCtx::new();
        op.init(&mut ctx).unwrap();

        let a = mapping.get("a").unwrap();
        let b = mapping.get("b").unwrap();
        let mut rows = Vec::new();
        while let Some(r) = op.consume(&mut ctx).unwrap() {
            rows.push((r.get(a), r.get(b)));
        }
        // b=2 matches the two a=2 rows, b=3 matches a=3, b=4 nothing.
        assert_eq!(rows, vec![
            (Value::Int(2), Value::Int(2)),
            (Value::Int(2), Value::Int(2)),
            (Value::Int(3), Value::Int(3)),
        ]);
    }

    #[test]
    fn test_value_hash_join_skips_null_keys() {
        let graph = Arc::new(Graph::new("join"));
        let mapping = mapping_of(&["a", "b", "@pivot"]);
        let left: BoxOp = Box::new(Unwind::new(
            graph.clone(),
            Box::new(ArgumentOp::new(mapping.clone())),
            Expr::List(vec![
                Expr::Literal(Literal::Null),
                Expr::Literal(Literal::Int(1)),
            ]),
            mapping.get("a").unwrap(),
        ));
        let right = unwinder(&graph, &mapping, "b", &[1]);
        let pivot = mapping.get("@pivot").unwrap();

        let mut op = ValueHashJoin::new(
            graph,
            left,
            right,
            Expr::Variable("a".into()),
            Expr::Variable("b".into()),
            pivot,
        );
        let mut ctx = QueryCtx::new();
        op.init(&mut ctx).unwrap();
        let mut n = 0;
        while op.consume(&mut ctx).unwrap().is_some() {
            n += 1;
        }
        assert_eq!(n, 1);
    }

    #[test]
    fn test_union_concatenates() {
        let graph = Arc::new(Graph::new("join"));
        let mapping = mapping_of(&["x"]);
        let a = unwinder(&graph, &mapping, "x", &[1, 2]);
        let b = unwinder(&graph, &mapping, "x", &[3]);
        let mut op = UnionOp::new(vec![a, b]);
        let mut ctx = QueryCtx::new();
        op.init(&mut ctx).unwrap();
        let x = mapping.get("x").unwrap();
        let mut rows = Vec::new();
        while let Some(r) = op.consume(&mut ctx).unwrap() {
            rows.push(r.get(x));
        }
        assert_eq!(rows, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }
}
