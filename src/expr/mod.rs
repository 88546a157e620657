//! # Expression Evaluation
//!
//! Evaluates an AST expression against a record. Property access and
//! label checks resolve through the graph (records carry entity handles
//! only); errors propagate to the plan root, which records them on the
//! query context — no operator recovers an evaluation error.

pub mod functions;

use hashbrown::HashMap;

use crate::cypher::ast::{BinaryOp, CompOp, Expr, Literal, StringOp, UnaryOp};
use crate::graph::Graph;
use crate::model::Value;
use crate::record::Record;
use crate::{Error, Result};

/// Expression evaluator bound to a graph and the query parameters.
pub struct Evaluator<'a> {
    pub graph: &'a Graph,
    pub params: &'a HashMap<String, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(graph: &'a Graph, params: &'a HashMap<String, Value>) -> Self {
        Self { graph, params }
    }

    pub fn evaluate(&self, expr: &Expr, record: &Record) -> Result<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Double(*f),
                Literal::String(s) => Value::String(s.clone()),
            }),

            Expr::Variable(name) => record
                .idx_of(name)
                .map(|idx| record.get(idx))
                .ok_or_else(|| Error::SchemaError(format!("Unbound variable: {name}"))),

            Expr::Parameter(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::SchemaError(format!("Missing parameter: ${name}"))),

            Expr::Property { expr, key } => {
                let val = self.evaluate(expr, record)?;
                self.property_of(&val, key)
            }

            Expr::FunctionCall { name, args, .. } => {
                functions::call(self, name, args, record)
            }

            Expr::BinaryOp { left, op, right } => {
                let lv = self.evaluate(left, record)?;
                // Short-circuit logic under three-valued semantics.
                match op {
                    BinaryOp::And => {
                        if lv == Value::Bool(false) {
                            return Ok(Value::Bool(false));
                        }
                        let rv = self.evaluate(right, record)?;
                        return Ok(match (lv, rv) {
                            (_, Value::Bool(false)) => Value::Bool(false),
                            (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
                            _ => Value::Null,
                        });
                    }
                    BinaryOp::Or => {
                        if lv == Value::Bool(true) {
                            return Ok(Value::Bool(true));
                        }
                        let rv = self.evaluate(right, record)?;
                        return Ok(match (lv, rv) {
                            (_, Value::Bool(true)) => Value::Bool(true),
                            (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
                            _ => Value::Null,
                        });
                    }
                    _ => {}
                }
                let rv = self.evaluate(right, record)?;
                eval_binary(&lv, *op, &rv)
            }

            Expr::UnaryOp { op, expr } => {
                let val = self.evaluate(expr, record)?;
                match op {
                    UnaryOp::Not => match val {
                        Value::Null => Ok(Value::Null),
                        Value::Bool(b) => Ok(Value::Bool(!b)),
                        other => Err(type_error("Boolean", &other)),
                    },
                    UnaryOp::Negate => match val {
                        Value::Int(i) => i
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| Error::RuntimeError("integer overflow".into())),
                        Value::Double(f) => Ok(Value::Double(-f)),
                        Value::Null => Ok(Value::Null),
                        other => Err(type_error("numeric", &other)),
                    },
                }
            }

            Expr::Comparison { first, rest } => {
                // a < b <= c holds when every adjacent step holds;
                // nulls poison the chain.
                let mut prev = self.evaluate(first, record)?;
                let mut saw_null = false;
                for (op, next) in rest {
                    let cur = self.evaluate(next, record)?;
                    match compare_step(&prev, *op, &cur)? {
                        Value::Bool(false) => return Ok(Value::Bool(false)),
                        Value::Null => saw_null = true,
                        _ => {}
                    }
                    prev = cur;
                }
                Ok(if saw_null { Value::Null } else { Value::Bool(true) })
            }

            Expr::List(items) => {
                let vals = items
                    .iter()
                    .map(|e| self.evaluate(e, record))
                    .collect::<Result<Vec<Value>>>()?;
                Ok(Value::List(vals))
            }

            Expr::MapLiteral(entries) => {
                let mut map = HashMap::new();
                for (k, e) in entries {
                    map.insert(k.clone(), self.evaluate(e, record)?);
                }
                Ok(Value::Map(map))
            }

            Expr::ListComprehension { variable, list, filter, map } => {
                let list_val = self.evaluate(list, record)?;
                let items = match list_val {
                    Value::List(items) => items,
                    Value::Null => return Ok(Value::Null),
                    other => return Err(type_error("List", &other)),
                };
                // The loop variable shadows via a scratch record slot.
                let mut scratch = record.clone();
                let slot = scratch.idx_of(variable);
                let mut out = Vec::new();
                for item in items {
                    let passes = match slot {
                        Some(idx) => {
                            scratch.set(idx, item.clone());
                            match filter {
                                Some(f) => {
                                    self.evaluate(f, &scratch)? == Value::Bool(true)
                                }
                                None => true,
                            }
                        }
                        // No slot reserved: comprehension without free
                        // use of the variable in this plan.
                        None => filter.is_none(),
                    };
                    if !passes {
                        continue;
                    }
                    let mapped = match (map, slot) {
                        (Some(m), Some(_)) => self.evaluate(m, &scratch)?,
                        _ => item,
                    };
                    out.push(mapped);
                }
                Ok(Value::List(out))
            }

            Expr::MapProjection { variable, keys } => {
                let val = record
                    .idx_of(variable)
                    .map(|idx| record.get(idx))
                    .ok_or_else(|| {
                        Error::SchemaError(format!("Unbound variable: {variable}"))
                    })?;
                let mut map = HashMap::new();
                for key in keys {
                    map.insert(key.clone(), self.property_of(&val, key)?);
                }
                Ok(Value::Map(map))
            }

            Expr::Case { operand, whens, else_expr } => {
                if let Some(op) = operand {
                    let op_val = self.evaluate(op, record)?;
                    for (when, then) in whens {
                        if self.evaluate(when, record)?.total_eq(&op_val) {
                            return self.evaluate(then, record);
                        }
                    }
                } else {
                    for (when, then) in whens {
                        if self.evaluate(when, record)? == Value::Bool(true) {
                            return self.evaluate(then, record);
                        }
                    }
                }
                match else_expr {
                    Some(e) => self.evaluate(e, record),
                    None => Ok(Value::Null),
                }
            }

            Expr::In { expr, list } => {
                let item = self.evaluate(expr, record)?;
                let list_val = self.evaluate(list, record)?;
                match list_val {
                    Value::Null => Ok(Value::Null),
                    Value::List(items) => {
                        if item.is_null() {
                            return Ok(Value::Null);
                        }
                        Ok(Value::Bool(items.iter().any(|v| v.total_eq(&item))))
                    }
                    other => Err(type_error("List", &other)),
                }
            }

            Expr::IsNull { expr, negated } => {
                let val = self.evaluate(expr, record)?;
                let is_null = val.is_null();
                Ok(Value::Bool(if *negated { !is_null } else { is_null }))
            }

            Expr::HasLabel { expr, label } => {
                let val = self.evaluate(expr, record)?;
                match val {
                    Value::Node(n) => {
                        let hit = self
                            .graph
                            .label_id(label)
                            .is_some_and(|id| n.has_label(id));
                        Ok(Value::Bool(hit))
                    }
                    Value::Null => Ok(Value::Null),
                    other => Err(type_error("Node", &other)),
                }
            }

            Expr::StringOp { left, op, right } => {
                let lv = self.evaluate(left, record)?;
                let rv = self.evaluate(right, record)?;
                match (&lv, &rv) {
                    (Value::String(a), Value::String(b)) => {
                        let hit = match op {
                            StringOp::StartsWith => a.starts_with(b.as_str()),
                            StringOp::EndsWith => a.ends_with(b.as_str()),
                            StringOp::Contains => a.contains(b.as_str()),
                        };
                        Ok(Value::Bool(hit))
                    }
                    (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                    _ => Err(Error::TypeError {
                        expected: "String".into(),
                        got: format!("{}, {}", lv.type_name(), rv.type_name()),
                    }),
                }
            }

            // RETURN * expands at plan time; reaching it here is a
            // planner fault.
            Expr::Star => Err(Error::PlanError("unexpanded * in expression".into())),
        }
    }

    /// `value.key` — property lookup through the graph for entity
    /// handles, direct lookup for maps, null-propagating.
    pub fn property_of(&self, value: &Value, key: &str) -> Result<Value> {
        match value {
            Value::Node(n) => Ok(self
                .graph
                .attr_id(key)
                .map(|attr| self.graph.node_property(n.id, attr))
                .unwrap_or(Value::Null)),
            Value::Edge(e) => Ok(self
                .graph
                .attr_id(key)
                .map(|attr| self.graph.edge_property(e.id, attr))
                .unwrap_or(Value::Null)),
            Value::Map(m) => Ok(m.get(key).cloned().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Node, Relationship, or Map", other)),
        }
    }
}

pub(crate) fn type_error(expected: &str, got: &Value) -> Error {
    Error::TypeError { expected: expected.into(), got: got.type_name().into() }
}

/// One comparison step with null-propagation; ordering on incompatible
/// non-null types is a type error, equality never is.
fn compare_step(left: &Value, op: CompOp, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    match op {
        CompOp::Eq => Ok(Value::Bool(left.total_eq(right))),
        CompOp::Neq => Ok(Value::Bool(!left.total_eq(right))),
        _ => {
            let Some(ord) = left.compare(right) else {
                return Err(Error::TypeError {
                    expected: "comparable values".into(),
                    got: format!("{}, {}", left.type_name(), right.type_name()),
                });
            };
            let hit = match op {
                CompOp::Lt => ord == std::cmp::Ordering::Less,
                CompOp::Lte => ord != std::cmp::Ordering::Greater,
                CompOp::Gt => ord == std::cmp::Ordering::Greater,
                CompOp::Gte => ord != std::cmp::Ordering::Less,
                CompOp::Eq | CompOp::Neq => unreachable!(),
            };
            Ok(Value::Bool(hit))
        }
    }
}

fn eval_binary(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Add => eval_add(left, right),
        BinaryOp::Sub => eval_arith(left, right, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => eval_arith(left, right, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => {
            match right {
                Value::Int(0) => {
                    return Err(Error::RuntimeError("division by zero".into()))
                }
                Value::Double(f) if *f == 0.0 => {
                    return Err(Error::RuntimeError("division by zero".into()))
                }
                _ => {}
            }
            eval_arith(left, right, i64::checked_div, |a, b| a / b)
        }
        BinaryOp::Mod => {
            if matches!(right, Value::Int(0)) {
                return Err(Error::RuntimeError("division by zero".into()));
            }
            eval_arith(left, right, i64::checked_rem, |a, b| a % b)
        }
        BinaryOp::Pow => {
            let (Some(l), Some(r)) = (left.as_double(), right.as_double()) else {
                return Err(Error::TypeError {
                    expected: "numeric".into(),
                    got: format!("{}, {}", left.type_name(), right.type_name()),
                });
            };
            Ok(Value::Double(l.powf(r)))
        }
        BinaryOp::Xor => match (left.as_bool(), right.as_bool()) {
            (Some(a), Some(b)) => Ok(Value::Bool(a ^ b)),
            _ => Err(Error::TypeError {
                expected: "Boolean".into(),
                got: format!("{}, {}", left.type_name(), right.type_name()),
            }),
        },
        // And/Or short-circuit upstream.
        BinaryOp::And | BinaryOp::Or => {
            match (left.as_bool(), right.as_bool()) {
                (Some(a), Some(b)) => Ok(Value::Bool(match op {
                    BinaryOp::And => a && b,
                    _ => a || b,
                })),
                _ => Ok(Value::Null),
            }
        }
    }
}

fn eval_add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .ok_or_else(|| Error::RuntimeError("integer overflow".into())),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        (Value::Int(a), Value::Double(b)) => Ok(Value::Double(*a as f64 + b)),
        (Value::Double(a), Value::Int(b)) => Ok(Value::Double(a + *b as f64)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::String(a), b) if b.is_numeric() => Ok(Value::String(format!("{a}{b}"))),
        (a, Value::String(b)) if a.is_numeric() => Ok(Value::String(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::List(out))
        }
        (Value::List(a), b) => {
            let mut out = a.clone();
            out.push(b.clone());
            Ok(Value::List(out))
        }
        _ => Err(Error::TypeError {
            expected: "addable values".into(),
            got: format!("{}, {}", left.type_name(), right.type_name()),
        }),
    }
}

fn eval_arith(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or_else(|| Error::RuntimeError("integer overflow".into())),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(float_op(*a, *b))),
        (Value::Int(a), Value::Double(b)) => Ok(Value::Double(float_op(*a as f64, *b))),
        (Value::Double(a), Value::Int(b)) => Ok(Value::Double(float_op(*a, *b as f64))),
        _ => Err(Error::TypeError {
            expected: "numeric".into(),
            got: format!("{}, {}", left.type_name(), right.type_name()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher;
    use crate::cypher::ast::{Clause, Statement};
    use crate::record::AliasMap;
    use std::sync::Arc;

    fn where_expr(query: &str) -> Expr {
        let Statement::Query(q) = cypher::parse(query).unwrap() else {
            panic!("expected query");
        };
        for clause in q.clauses {
            if let Clause::Match { where_clause: Some(e), .. } = clause {
                return e;
            }
        }
        panic!("no WHERE in {query}");
    }

    fn eval_with(expr: &Expr, record: &Record, graph: &Graph) -> Result<Value> {
        let params = HashMap::new();
        Evaluator::new(graph, &params).evaluate(expr, record)
    }

    fn record_with(vals: &[(&str, Value)]) -> Record {
        let mut mapping = AliasMap::new();
        for (name, _) in vals {
            mapping.reserve(name);
        }
        let mut r = Record::new(Arc::new(mapping));
        for (name, v) in vals {
            let idx = r.idx_of(name).unwrap();
            r.set(idx, v.clone());
        }
        r
    }

    #[test]
    fn test_arithmetic() {
        let g = Graph::new("e");
        let r = record_with(&[("x", Value::Int(7))]);
        let e = where_expr("MATCH (n) WHERE x * 2 + 1 = 15 RETURN n");
        assert_eq!(eval_with(&e, &r, &g).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_division_by_zero() {
        let g = Graph::new("e");
        let r = record_with(&[("x", Value::Int(1))]);
        let e = where_expr("MATCH (n) WHERE x / 0 = 1 RETURN n");
        assert!(matches!(eval_with(&e, &r, &g), Err(Error::RuntimeError(_))));
    }

    #[test]
    fn test_integer_overflow() {
        let g = Graph::new("e");
        let r = record_with(&[("x", Value::Int(i64::MAX))]);
        let e = where_expr("MATCH (n) WHERE x + 1 > 0 RETURN n");
        assert!(matches!(eval_with(&e, &r, &g), Err(Error::RuntimeError(_))));
    }

    #[test]
    fn test_null_propagation() {
        let g = Graph::new("e");
        let r = record_with(&[("x", Value::Null)]);
        let e = where_expr("MATCH (n) WHERE x + 1 = 2 RETURN n");
        assert_eq!(eval_with(&e, &r, &g).unwrap(), Value::Null);
    }

    #[test]
    fn test_comparison_chain_holds() {
        let g = Graph::new("e");
        let r = record_with(&[("x", Value::Int(3))]);
        let e = where_expr("MATCH (n) WHERE 1 < x <= 3 RETURN n");
        assert_eq!(eval_with(&e, &r, &g).unwrap(), Value::Bool(true));

        let r = record_with(&[("x", Value::Int(4))]);
        assert_eq!(eval_with(&e, &r, &g).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_incomparable_ordering_is_type_error() {
        let g = Graph::new("e");
        let r = record_with(&[("x", Value::String("a".into()))]);
        let e = where_expr("MATCH (n) WHERE x > 1 RETURN n");
        assert!(matches!(eval_with(&e, &r, &g), Err(Error::TypeError { .. })));
    }

    #[test]
    fn test_three_valued_and() {
        let g = Graph::new("e");
        let r = record_with(&[("x", Value::Null)]);
        // null AND false = false; null AND true = null
        let e = where_expr("MATCH (n) WHERE x = 1 AND false RETURN n");
        assert_eq!(eval_with(&e, &r, &g).unwrap(), Value::Bool(false));
        let e = where_expr("MATCH (n) WHERE x = 1 AND true RETURN n");
        assert_eq!(eval_with(&e, &r, &g).unwrap(), Value::Null);
    }

    #[test]
    fn test_in_list() {
        let g = Graph::new("e");
        let r = record_with(&[("x", Value::Int(2))]);
        let e = where_expr("MATCH (n) WHERE x IN [1, 2, 3] RETURN n");
        assert_eq!(eval_with(&e, &r, &g).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_list_comprehension() {
        let g = Graph::new("e");
        let mut mapping = AliasMap::new();
        mapping.reserve("x");
        let r = Record::new(Arc::new(mapping));
        let Statement::Query(q) =
            cypher::parse("RETURN [x IN [1,2,3] WHERE x > 1 | x * 10] AS v").unwrap()
        else {
            panic!();
        };
        let Clause::Return { items, .. } = &q.clauses[0] else { panic!() };
        let out = eval_with(&items[0].expr, &r, &g).unwrap();
        assert_eq!(out, Value::List(vec![Value::Int(20), Value::Int(30)]));
    }

    #[test]
    fn test_node_property_through_graph() {
        let g = Graph::new("e");
        let person = g.label_id_or_create("Person");
        let name = g.attr_id_or_create("name");
        let id = g.create_node(&[person], vec![(name, Value::from("ada"))]);
        let node = g.node(id).unwrap();

        let r = record_with(&[("n", Value::Node(node))]);
        let e = where_expr("MATCH (m) WHERE n.name = 'ada' RETURN m");
        assert_eq!(eval_with(&e, &r, &g).unwrap(), Value::Bool(true));

        // Unknown attribute reads as null, never errors.
        let e = where_expr("MATCH (m) WHERE n.missing IS NULL RETURN m");
        assert_eq!(eval_with(&e, &r, &g).unwrap(), Value::Bool(true));
    }
}
