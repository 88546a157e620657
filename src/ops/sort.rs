//! Ordering operators: sort (with fold-in skip/limit), skip, limit,
//! and distinct.

use std::cmp::Ordering;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::cypher::ast::Expr;
use crate::graph::Graph;
use crate::model::Value;
use crate::query_ctx::QueryCtx;
use crate::record::Record;
use crate::Result;

use super::{eval, BoxOp, OpState, Operator};

#[derive(Clone)]
pub struct SortItem {
    pub expr: Expr,
    pub ascending: bool,
}

/// Compare two key tuples under the sort directions. The total order
/// ranks null highest, so ascending runs put nulls last and descending
/// runs put them first without a special case.
fn compare_keys(a: &[Value], b: &[Value], items: &[SortItem]) -> Ordering {
    for (idx, item) in items.iter().enumerate() {
        let ord = a[idx].total_cmp(&b[idx]);
        let ord = if item.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sorts the child stream. With a limit, keeps a bounded buffer of the
/// best `skip + limit` rows instead of materialising everything; ties
/// keep input order.
pub struct Sort {
    graph: Arc<Graph>,
    child: BoxOp,
    items: Vec<SortItem>,
    skip: usize,
    limit: Option<usize>,
    /// (keys, arrival sequence, record), kept sorted in the bounded
    /// path.
    buffer: Vec<(Vec<Value>, u64, Record)>,
    emitted: usize,
    state: OpState,
}

impl Sort {
    pub fn new(
        graph: Arc<Graph>,
        child: BoxOp,
        items: Vec<SortItem>,
        skip: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            graph,
            child,
            items,
            skip,
            limit,
            buffer: Vec::new(),
            emitted: 0,
            state: OpState::Uninit,
        }
    }

    fn cap(&self) -> Option<usize> {
        self.limit.map(|l| self.skip + l)
    }

    fn accumulate(&mut self, keys: Vec<Value>, seq: u64, record: Record) {
        match self.cap() {
            Some(cap) => {
                // Bounded: keep the buffer sorted, evict the worst.
                let pos = self
                    .buffer
                    .partition_point(|(k, s, _)| {
                        match compare_keys(k, &keys, &self.items) {
                            Ordering::Less => true,
                            Ordering::Equal => *s < seq,
                            Ordering::Greater => false,
                        }
                    });
                if pos >= cap {
                    return;
                }
                self.buffer.insert(pos, (keys, seq, record));
                self.buffer.truncate(cap);
            }
            None => self.buffer.push((keys, seq, record)),
        }
    }

    fn drain_child(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        let mut seq = 0u64;
        while let Some(record) = self.child.consume(ctx)? {
            ctx.check_cancelled()?;
            let keys = self
                .items
                .iter()
                .map(|item| eval(&self.graph, ctx, &item.expr, &record))
                .collect::<Result<Vec<Value>>>()?;
            self.accumulate(keys, seq, record);
            seq += 1;
        }
        if self.cap().is_none() {
            // Stable sort keeps input order on ties.
            let items = self.items.clone();
            self.buffer
                .sort_by(|(ka, _, _), (kb, _, _)| compare_keys(ka, kb, &items));
        }
        Ok(())
    }
}

impl Operator for Sort {
    fn name(&self) -> &'static str {
        "Sort"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.buffer.clear();
        self.emitted = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        if self.state == OpState::Init {
            self.drain_child(ctx)?;
            self.state = OpState::Producing;
        }

        loop {
            if self.emitted >= self.buffer.len() {
                self.state = OpState::Exhausted;
                return Ok(None);
            }
            if let Some(limit) = self.limit {
                if self.emitted >= self.skip + limit {
                    self.state = OpState::Exhausted;
                    return Ok(None);
                }
            }
            let idx = self.emitted;
            self.emitted += 1;
            if idx < self.skip {
                continue;
            }
            return Ok(Some(self.buffer[idx].2.clone()));
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.buffer.clear();
        self.emitted = 0;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Sort::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.items.clone(),
            self.skip,
            self.limit,
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

/// Drops the first `n` records.
pub struct SkipOp {
    child: BoxOp,
    n: usize,
    dropped: usize,
}

impl SkipOp {
    pub fn new(child: BoxOp, n: usize) -> Self {
        Self { child, n, dropped: 0 }
    }
}

impl Operator for SkipOp {
    fn name(&self) -> &'static str {
        "Skip"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.dropped = 0;
        self.child.init(ctx)
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        while self.dropped < self.n {
            ctx.check_cancelled()?;
            if self.child.consume(ctx)?.is_none() {
                return Ok(None);
            }
            self.dropped += 1;
        }
        self.child.consume(ctx)
    }

    fn reset(&mut self) -> Result<()> {
        self.dropped = 0;
        self.child.reset()
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(SkipOp::new(self.child.clone_op(), self.n))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

/// Stops after `n` records.
pub struct LimitOp {
    child: BoxOp,
    n: usize,
    produced: usize,
}

impl LimitOp {
    pub fn new(child: BoxOp, n: usize) -> Self {
        Self { child, n, produced: 0 }
    }
}

impl Operator for LimitOp {
    fn name(&self) -> &'static str {
        "Limit"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.produced = 0;
        self.child.init(ctx)
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        if self.produced >= self.n {
            return Ok(None);
        }
        match self.child.consume(ctx)? {
            Some(r) => {
                self.produced += 1;
                Ok(Some(r))
            }
            None => Ok(None),
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.produced = 0;
        self.child.reset()
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(LimitOp::new(self.child.clone_op(), self.n))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

/// Deduplicates on a slot subset: 64-bit hash probe, full value
/// comparison on hash hits.
pub struct Distinct {
    child: BoxOp,
    key_slots: Vec<usize>,
    seen: HashMap<u64, Vec<Vec<Value>>>,
}

impl Distinct {
    pub fn new(child: BoxOp, key_slots: Vec<usize>) -> Self {
        Self { child, key_slots, seen: HashMap::new() }
    }
}

impl Operator for Distinct {
    fn name(&self) -> &'static str {
        "Distinct"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.seen.clear();
        self.child.init(ctx)
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        loop {
            ctx.check_cancelled()?;
            let Some(record) = self.child.consume(ctx)? else {
                return Ok(None);
            };
            let hash = record.hash64_of(&self.key_slots);
            let keys: Vec<Value> =
                self.key_slots.iter().map(|&s| record.get(s)).collect();

            let bucket = self.seen.entry(hash).or_default();
            let dup = bucket
                .iter()
                .any(|k| k.iter().zip(&keys).all(|(a, b)| a.total_eq(b)));
            if dup {
                continue;
            }
            bucket.push(keys);
            return Ok(Some(record));
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.seen.clear();
        self.child.reset()
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Distinct::new(self.child.clone_op(), self.key_slots.clone()))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::ast::Literal;
    use crate::ops::filter::Unwind;
    use crate::ops::ArgumentOp;
    use crate::record::AliasMap;

    fn unwind_ints(vals: &[i64]) -> (Arc<Graph>, Arc<AliasMap>, BoxOp, usize) {
        let graph = Arc::new(Graph::new("sort"));
        let mut mapping = AliasMap::new();
        let x = mapping.reserve("x");
        let mapping = Arc::new(mapping);
        let list = Expr::List(
            vals.iter()
                .map(|&v| Expr::Literal(Literal::Int(v)))
                .collect(),
        );
        let op = Unwind::new(
            graph.clone(),
            Box::new(ArgumentOp::new(mapping.clone())),
            list,
            x,
        );
        (graph, mapping, Box::new(op), x)
    }

    fn collect(op: &mut dyn Operator) -> Vec<Value> {
        let mut ctx = QueryCtx::new();
        op.init(&mut ctx).unwrap();
        let mut out = Vec::new();
        while let Some(r) = op.consume(&mut ctx).unwrap() {
            out.push(r.get(0));
        }
        out
    }

    fn sort_items(ascending: bool) -> Vec<SortItem> {
        vec![SortItem { expr: Expr::Variable("x".into()), ascending }]
    }

    #[test]
    fn test_sort_ascending() {
        let (graph, _, child, _) = unwind_ints(&[3, 1, 2]);
        let mut op = Sort::new(graph, child, sort_items(true), 0, None);
        assert_eq!(
            collect(&mut op),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn test_sort_desc_with_limit() {
        let (graph, _, child, _) = unwind_ints(&[3, 1, 4, 2]);
        let mut op = Sort::new(graph, child, sort_items(false), 0, Some(2));
        assert_eq!(collect(&mut op), vec![Value::Int(4), Value::Int(3)]);
    }

    #[test]
    fn test_sort_skip_folds_into_bound() {
        let (graph, _, child, _) = unwind_ints(&[5, 3, 1, 4, 2]);
        let mut op = Sort::new(graph, child, sort_items(true), 1, Some(2));
        assert_eq!(collect(&mut op), vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_nulls_last_asc_first_desc() {
        let graph = Arc::new(Graph::new("sort"));
        let mut mapping = AliasMap::new();
        let x = mapping.reserve("x");
        let mapping = Arc::new(mapping);
        let list = Expr::List(vec![
            Expr::Literal(Literal::Int(2)),
            Expr::Literal(Literal::Null),
            Expr::Literal(Literal::Int(1)),
        ]);
        let mk = |asc: bool| {
            Sort::new(
                graph.clone(),
                Box::new(Unwind::new(
                    graph.clone(),
                    Box::new(ArgumentOp::new(mapping.clone())),
                    list.clone(),
                    x,
                )),
                sort_items(asc),
                0,
                None,
            )
        };
        let mut asc = mk(true);
        assert_eq!(
            collect(&mut asc),
            vec![Value::Int(1), Value::Int(2), Value::Null]
        );
        let mut desc = mk(false);
        assert_eq!(
            collect(&mut desc),
            vec![Value::Null, Value::Int(2), Value::Int(1)]
        );
    }

    #[test]
    fn test_skip_and_limit() {
        let (_, _, child, _) = unwind_ints(&[1, 2, 3, 4]);
        let mut op = LimitOp::new(Box::new(SkipOp::new(child, 1)), 2);
        assert_eq!(collect(&mut op), vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_distinct() {
        let (_, _, child, x) = unwind_ints(&[1, 2, 1, 3, 2]);
        let mut op = Distinct::new(child, vec![x]);
        assert_eq!(
            collect(&mut op),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }
}
