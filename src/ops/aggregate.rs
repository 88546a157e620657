//! Aggregate operator: hash-grouped accumulators.
//!
//! Buffers the whole child stream, groups rows by the hash of the
//! evaluated key tuple (hash hits verified by value comparison), and
//! emits one record per group once the child is exhausted. Groups come
//! out in first-seen order.

use std::sync::Arc;

use hashbrown::HashMap;
use xxhash_rust::xxh64::Xxh64;

use crate::cypher::ast::Expr;
use crate::graph::Graph;
use crate::model::Value;
use crate::query_ctx::QueryCtx;
use crate::record::{AliasMap, Record};
use crate::{Error, Result};

use super::{eval, BoxOp, OpState, Operator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl AggKind {
    pub fn from_name(name: &str) -> Option<AggKind> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggKind::Count),
            "sum" => Some(AggKind::Sum),
            "avg" => Some(AggKind::Avg),
            "min" => Some(AggKind::Min),
            "max" => Some(AggKind::Max),
            "collect" => Some(AggKind::Collect),
            _ => None,
        }
    }
}

/// One aggregation output: `kind(arg)` into `slot`. `arg == None` is
/// `count(*)`.
#[derive(Clone)]
pub struct AggItem {
    pub kind: AggKind,
    pub arg: Option<Expr>,
    pub distinct: bool,
    pub slot: usize,
}

/// Per-group accumulator.
enum Acc {
    Count(i64),
    Sum { int: i64, float: f64, saw_float: bool, saw_any: bool },
    Avg { sum: f64, n: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Collect(Vec<Value>),
}

impl Acc {
    fn new(kind: AggKind) -> Acc {
        match kind {
            AggKind::Count => Acc::Count(0),
            AggKind::Sum => Acc::Sum { int: 0, float: 0.0, saw_float: false, saw_any: false },
            AggKind::Avg => Acc::Avg { sum: 0.0, n: 0 },
            AggKind::Min => Acc::Min(None),
            AggKind::Max => Acc::Max(None),
            AggKind::Collect => Acc::Collect(Vec::new()),
        }
    }

    fn update(&mut self, v: Value) -> Result<()> {
        match self {
            Acc::Count(n) => *n += 1,
            Acc::Sum { int, float, saw_float, saw_any } => {
                *saw_any = true;
                match v {
                    Value::Int(i) => {
                        *int = int.checked_add(i).ok_or_else(|| {
                            Error::RuntimeError("integer overflow in sum()".into())
                        })?;
                    }
                    Value::Double(f) => {
                        *saw_float = true;
                        *float += f;
                    }
                    other => {
                        return Err(Error::TypeError {
                            expected: "numeric".into(),
                            got: other.type_name().into(),
                        })
                    }
                }
            }
            Acc::Avg { sum, n } => {
                let f = v.as_double().ok_or_else(|| Error::TypeError {
                    expected: "numeric".into(),
                    got: v.type_name().into(),
                })?;
                *sum += f;
                *n += 1;
            }
            Acc::Min(best) => {
                let better = match best {
                    Some(cur) => v.compare(cur) == Some(std::cmp::Ordering::Less),
                    None => true,
                };
                if better {
                    *best = Some(v);
                }
            }
            Acc::Max(best) => {
                let better = match best {
                    Some(cur) => v.compare(cur) == Some(std::cmp::Ordering::Greater),
                    None => true,
                };
                if better {
                    *best = Some(v);
                }
            }
            Acc::Collect(items) => items.push(v),
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Acc::Count(n) => Value::Int(n),
            Acc::Sum { int, float, saw_float, .. } => {
                if saw_float {
                    Value::Double(int as f64 + float)
                } else {
                    Value::Int(int)
                }
            }
            Acc::Avg { sum, n } => {
                if n == 0 {
                    Value::Null
                } else {
                    Value::Double(sum / n as f64)
                }
            }
            Acc::Min(best) | Acc::Max(best) => best.unwrap_or(Value::Null),
            Acc::Collect(items) => Value::List(items),
        }
    }
}

struct Group {
    keys: Vec<Value>,
    accs: Vec<Acc>,
    /// Per-accumulator distinct filter.
    seen: Vec<Vec<Value>>,
}

pub struct Aggregate {
    graph: Arc<Graph>,
    child: BoxOp,
    mapping: Arc<AliasMap>,
    key_items: Vec<(Expr, usize)>,
    agg_items: Vec<AggItem>,
    groups: Vec<Group>,
    index: HashMap<u64, Vec<usize>>,
    state: OpState,
}

impl Aggregate {
    pub fn new(
        graph: Arc<Graph>,
        child: BoxOp,
        mapping: Arc<AliasMap>,
        key_items: Vec<(Expr, usize)>,
        agg_items: Vec<AggItem>,
    ) -> Self {
        Self {
            graph,
            child,
            mapping,
            key_items,
            agg_items,
            groups: Vec::new(),
            index: HashMap::new(),
            state: OpState::Uninit,
        }
    }

    fn group_of(&mut self, keys: Vec<Value>) -> usize {
        let mut h = Xxh64::new(0);
        for k in &keys {
            k.hash_into(&mut h);
        }
        let hash = h.digest();

        if let Some(candidates) = self.index.get(&hash) {
            for &idx in candidates {
                let g = &self.groups[idx];
                if g.keys.len() == keys.len()
                    && g.keys.iter().zip(&keys).all(|(a, b)| a.total_eq(b))
                {
                    return idx;
                }
            }
        }
        let idx = self.groups.len();
        self.groups.push(Group {
            keys,
            accs: self.agg_items.iter().map(|a| Acc::new(a.kind)).collect(),
            seen: vec![Vec::new(); self.agg_items.len()],
        });
        self.index.entry(hash).or_default().push(idx);
        idx
    }

    fn drain_child(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        let items = self.agg_items.clone();
        while let Some(record) = self.child.consume(ctx)? {
            ctx.check_cancelled()?;
            let keys = self
                .key_items
                .iter()
                .map(|(e, _)| eval(&self.graph, ctx, e, &record))
                .collect::<Result<Vec<Value>>>()?;
            let gidx = self.group_of(keys);

            for (aidx, item) in items.iter().enumerate() {
                let val = match &item.arg {
                    Some(expr) => eval(&self.graph, ctx, expr, &record)?,
                    // count(*): every row counts.
                    None => Value::Bool(true),
                };
                // Aggregations skip nulls, count(*) aside.
                if item.arg.is_some() && val.is_null() {
                    continue;
                }
                let group = &mut self.groups[gidx];
                if item.distinct {
                    if group.seen[aidx].iter().any(|s| s.total_eq(&val)) {
                        continue;
                    }
                    group.seen[aidx].push(val.clone());
                }
                group.accs[aidx].update(val)?;
            }
        }

        // Keyless aggregation over empty input yields one default group.
        if self.groups.is_empty() && self.key_items.is_empty() {
            self.groups.push(Group {
                keys: Vec::new(),
                accs: self.agg_items.iter().map(|a| Acc::new(a.kind)).collect(),
                seen: vec![Vec::new(); self.agg_items.len()],
            });
        }
        Ok(())
    }
}

impl Operator for Aggregate {
    fn name(&self) -> &'static str {
        "Aggregate"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.groups.clear();
        self.index.clear();
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        if self.state == OpState::Init {
            self.drain_child(ctx)?;
            // Emit groups in first-seen order by draining from the back.
            self.groups.reverse();
            self.state = OpState::Producing;
        }

        let Some(group) = self.groups.pop() else {
            self.state = OpState::Exhausted;
            return Ok(None);
        };
        let mut record = Record::new(self.mapping.clone());
        for ((_, slot), key) in self.key_items.iter().zip(group.keys) {
            record.set(*slot, key);
        }
        for (item, acc) in self.agg_items.iter().zip(group.accs) {
            record.set(item.slot, acc.finish());
        }
        Ok(Some(record))
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()?;
        self.groups.clear();
        self.index.clear();
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(Aggregate::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.mapping.clone(),
            self.key_items.clone(),
            self.agg_items.clone(),
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
    use crate::ops::filter::Unwind;
    use crate::ops::ArgumentOp;

    fn int_list(vals: &[i64]) -> Expr {
        Expr::List(vals.iter().map(|&v| Expr::Literal(Literal::Int(v))).collect())
    }

    fn setup(vals: &[i64]) -> (Arc<Graph>, Arc<AliasMap>, BoxOp, usize, usize) {
        let graph = Arc::new(Graph::new("agg"));
        let mut mapping = AliasMap::new();
        let x = mapping.reserve("x");
        let out = mapping.reserve("out");
        let mapping = Arc::new(mapping);
        let unwind = Unwind::new(
            graph.clone(),
            Box::new(ArgumentOp::new(mapping.clone())),
            int_list(vals),
            x,
        );
        (graph, mapping, Box::new(unwind), x, out)
    }

    fn run(mut op: Aggregate) -> Vec<Record> {
        let mut ctx = QueryCtx::new();
        op.init(&mut ctx).unwrap();
        let mut out = Vec::new();
        while let Some(r) = op.consume(&mut ctx).unwrap() {
            out.push(r);
        }
        out
    }

    #[test]
    fn test_count_star() {
        let (graph, mapping, child, _, out) = setup(&[5, 5, 7]);
        let op = Aggregate::new(
            graph,
            child,
            mapping,
            vec![],
            vec![AggItem { kind: AggKind::Count, arg: None, distinct: false, slot: out }],
        );
        let rows = run(op);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(out), Value::Int(3));
    }

    #[test]
    fn test_sum_and_avg() {
        let (graph, mapping, child, x, out) = setup(&[1, 2, 3]);
        let op = Aggregate::new(
            graph,
            child,
            mapping,
            vec![],
            vec![AggItem {
                kind: AggKind::Sum,
                arg: Some(Expr::Variable("x".into())),
                distinct: false,
                slot: out,
            }],
        );
        let rows = run(op);
        assert_eq!(rows[0].get(out), Value::Int(6));
        let _ = x;
    }

    #[test]
    fn test_group_by_key() {
        let (graph, mapping, child, x, out) = setup(&[5, 5, 7]);
        let op = Aggregate::new(
            graph,
            child,
            mapping.clone(),
            vec![(Expr::Variable("x".into()), x)],
            vec![AggItem { kind: AggKind::Count, arg: None, distinct: false, slot: out }],
        );
        let rows = run(op);
        assert_eq!(rows.len(), 2);
        let mut got: Vec<(Value, Value)> =
            rows.iter().map(|r| (r.get(x), r.get(out))).collect();
        got.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert_eq!(got, vec![
            (Value::Int(5), Value::Int(2)),
            (Value::Int(7), Value::Int(1)),
        ]);
    }

    #[test]
    fn test_distinct_count() {
        let (graph, mapping, child, x, out) = setup(&[5, 5, 7]);
        let op = Aggregate::new(
            graph,
            child,
            mapping,
            vec![],
            vec![AggItem {
                kind: AggKind::Count,
                arg: Some(Expr::Variable("x".into())),
                distinct: true,
                slot: out,
            }],
        );
        let rows = run(op);
        assert_eq!(rows[0].get(out), Value::Int(2));
        let _ = x;
    }

    #[test]
    fn test_empty_input_defaults() {
        let (graph, mapping, child, x, out) = setup(&[]);
        let op = Aggregate::new(
            graph,
            child,
            mapping,
            vec![],
            vec![AggItem {
                kind: AggKind::Min,
                arg: Some(Expr::Variable("x".into())),
                distinct: false,
                slot: out,
            }],
        );
        let rows = run(op);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(out), Value::Null);
    }
}
