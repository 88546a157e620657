//! Built-in scalar functions.
//!
//! Aggregation functions (`count`, `sum`, ...) are recognised here only
//! for the degenerate per-row case; real grouping happens in the
//! aggregate operator.

use crate::cypher::ast::Expr;
use crate::model::Value;
use crate::record::Record;
use crate::{Error, Result};

use super::{type_error, Evaluator};

pub fn call(
    ev: &Evaluator<'_>,
    name: &str,
    args: &[Expr],
    record: &Record,
) -> Result<Value> {
    let lower = name.to_ascii_lowercase();

    let arg = |i: usize| -> Result<Value> {
        let e = args.get(i).ok_or_else(|| {
            Error::RuntimeError(format!("{name}() missing argument {}", i + 1))
        })?;
        ev.evaluate(e, record)
    };

    match lower.as_str() {
        "id" => match arg(0)? {
            Value::Node(n) => Ok(Value::Int(n.id.0 as i64)),
            Value::Edge(e) => Ok(Value::Int(e.id.0 as i64)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Node or Relationship", &other)),
        },

        "labels" => match arg(0)? {
            Value::Node(n) => Ok(Value::List(
                n.labels
                    .iter()
                    .map(|&l| {
                        Value::String(ev.graph.label_name(l).unwrap_or_default())
                    })
                    .collect(),
            )),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Node", &other)),
        },

        "type" => match arg(0)? {
            Value::Edge(e) => Ok(Value::String(
                ev.graph.rel_type_name(e.rel_type).unwrap_or_default(),
            )),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Relationship", &other)),
        },

        "startnode" => match arg(0)? {
            Value::Edge(e) => Ok(ev.graph.node(e.src).map(Value::Node).unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Relationship", &other)),
        },

        "endnode" => match arg(0)? {
            Value::Edge(e) => Ok(ev.graph.node(e.dst).map(Value::Node).unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Relationship", &other)),
        },

        "properties" => match arg(0)? {
            Value::Node(n) => Ok(props_map(ev, ev.graph.node_properties(n.id))),
            Value::Edge(e) => Ok(props_map(ev, ev.graph.edge_properties(e.id))),
            Value::Map(m) => Ok(Value::Map(m)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Node, Relationship, or Map", &other)),
        },

        "keys" => match arg(0)? {
            Value::Node(n) => Ok(keys_list(ev, ev.graph.node_properties(n.id))),
            Value::Edge(e) => Ok(keys_list(ev, ev.graph.edge_properties(e.id))),
            Value::Map(m) => {
                let mut keys: Vec<String> = m.keys().cloned().collect();
                keys.sort();
                Ok(Value::List(keys.into_iter().map(Value::String).collect()))
            }
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Node, Relationship, or Map", &other)),
        },

        "tointeger" | "toint" => match arg(0)? {
            v @ Value::Int(_) => Ok(v),
            Value::Double(f) => Ok(Value::Int(f as i64)),
            Value::String(s) => Ok(s.parse::<i64>().map(Value::Int).unwrap_or(Value::Null)),
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("convertible to Integer", &other)),
        },

        "tofloat" => match arg(0)? {
            v @ Value::Double(_) => Ok(v),
            Value::Int(i) => Ok(Value::Double(i as f64)),
            Value::String(s) => {
                Ok(s.parse::<f64>().map(Value::Double).unwrap_or(Value::Null))
            }
            Value::Null => Ok(Value::Null),
            other => Err(type_error("convertible to Float", &other)),
        },

        "tostring" => match arg(0)? {
            Value::Null => Ok(Value::Null),
            v => Ok(Value::String(v.to_string())),
        },

        "toboolean" => match arg(0)? {
            v @ Value::Bool(_) => Ok(v),
            Value::String(s) => Ok(match s.to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Null,
            }),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("convertible to Boolean", &other)),
        },

        "size" | "length" => match arg(0)? {
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(l) => Ok(Value::Int(l.len() as i64)),
            Value::Path(p) => Ok(Value::Int(p.len() as i64)),
            Value::Map(m) => Ok(Value::Int(m.len() as i64)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("String, List, Map, or Path", &other)),
        },

        "head" => match arg(0)? {
            Value::List(l) => Ok(l.into_iter().next().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("List", &other)),
        },

        "last" => match arg(0)? {
            Value::List(l) => Ok(l.into_iter().next_back().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("List", &other)),
        },

        "tail" => match arg(0)? {
            Value::List(mut l) => {
                if !l.is_empty() {
                    l.remove(0);
                }
                Ok(Value::List(l))
            }
            Value::Null => Ok(Value::Null),
            other => Err(type_error("List", &other)),
        },

        "range" => {
            let start = int_arg(&arg(0)?)?;
            let end = int_arg(&arg(1)?)?;
            let step = if args.len() > 2 { int_arg(&arg(2)?)? } else { 1 };
            if step == 0 {
                return Err(Error::RuntimeError("range() step must not be zero".into()));
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i <= end) || (step < 0 && i >= end) {
                out.push(Value::Int(i));
                i += step;
            }
            Ok(Value::List(out))
        }

        "coalesce" => {
            for e in args {
                let v = ev.evaluate(e, record)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }

        "nodes" => match arg(0)? {
            Value::Path(p) => Ok(Value::List(
                p.nodes.iter().cloned().map(Value::Node).collect(),
            )),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Path", &other)),
        },

        "relationships" | "rels" => match arg(0)? {
            Value::Path(p) => Ok(Value::List(
                p.edges.iter().copied().map(Value::Edge).collect(),
            )),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("Path", &other)),
        },

        "abs" => match arg(0)? {
            Value::Int(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| Error::RuntimeError("integer overflow".into())),
            Value::Double(f) => Ok(Value::Double(f.abs())),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("numeric", &other)),
        },

        "sign" => match arg(0)? {
            Value::Int(i) => Ok(Value::Int(i.signum())),
            Value::Double(f) => Ok(Value::Int(if f > 0.0 {
                1
            } else if f < 0.0 {
                -1
            } else {
                0
            })),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("numeric", &other)),
        },

        "ceil" => float_fn(arg(0)?, f64::ceil),
        "floor" => float_fn(arg(0)?, f64::floor),
        "round" => float_fn(arg(0)?, f64::round),
        "sqrt" => float_fn(arg(0)?, f64::sqrt),

        "tolower" => string_fn(arg(0)?, |s| s.to_lowercase()),
        "toupper" => string_fn(arg(0)?, |s| s.to_uppercase()),
        "trim" => string_fn(arg(0)?, |s| s.trim().to_owned()),
        "reverse" => match arg(0)? {
            Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
            Value::List(mut l) => {
                l.reverse();
                Ok(Value::List(l))
            }
            Value::Null => Ok(Value::Null),
            other => Err(type_error("String or List", &other)),
        },

        // Degenerate per-row aggregation: evaluate the argument.
        "count" => Ok(if args.is_empty() { Value::Int(1) } else { arg(0)? }),
        "sum" | "avg" | "min" | "max" | "collect" => arg(0),

        _ => Err(Error::SchemaError(format!("Unknown function: {name}"))),
    }
}

fn int_arg(v: &Value) -> Result<i64> {
    v.as_int().ok_or_else(|| type_error("Integer", v))
}

fn float_fn(v: Value, f: fn(f64) -> f64) -> Result<Value> {
    match v {
        Value::Int(i) => Ok(Value::Double(f(i as f64))),
        Value::Double(d) => Ok(Value::Double(f(d))),
        Value::Null => Ok(Value::Null),
        other => Err(type_error("numeric", &other)),
    }
}

fn string_fn(v: Value, f: impl FnOnce(&str) -> String) -> Result<Value> {
    match v {
        Value::String(s) => Ok(Value::String(f(&s))),
        Value::Null => Ok(Value::Null),
        other => Err(type_error("String", &other)),
    }
}

fn props_map(ev: &Evaluator<'_>, props: Vec<(crate::model::AttrId, Value)>) -> Value {
    let map = props
        .into_iter()
        .map(|(attr, v)| (ev.graph.attr_name(attr).unwrap_or_default(), v))
        .collect();
    Value::Map(map)
}

fn keys_list(ev: &Evaluator<'_>, props: Vec<(crate::model::AttrId, Value)>) -> Value {
    Value::List(
        props
            .into_iter()
            .map(|(attr, _)| Value::String(ev.graph.attr_name(attr).unwrap_or_default()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::record::AliasMap;
    use hashbrown::HashMap;
    use std::sync::Arc;

    fn eval_fn(name: &str, args: Vec<Expr>) -> Result<Value> {
        let graph = Graph::new("fn");
        let params = HashMap::new();
        let ev = Evaluator::new(&graph, &params);
        let record = Record::new(Arc::new(AliasMap::new()));
        call(&ev, name, &args, &record)
    }

    fn lit(v: i64) -> Expr {
        Expr::Literal(crate::cypher::ast::Literal::Int(v))
    }

    #[test]
    fn test_range() {
        assert_eq!(
            eval_fn("range", vec![lit(1), lit(3)]).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert!(eval_fn("range", vec![lit(1), lit(3), lit(0)]).is_err());
    }

    #[test]
    fn test_coalesce() {
        let null = Expr::Literal(crate::cypher::ast::Literal::Null);
        assert_eq!(
            eval_fn("coalesce", vec![null, lit(5)]).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(
            eval_fn("nope", vec![]),
            Err(Error::SchemaError(_))
        ));
    }

    #[test]
    fn test_case_insensitive_names() {
        let s = Expr::Literal(crate::cypher::ast::Literal::String("ada".into()));
        assert_eq!(
            eval_fn("toUpper", vec![s]).unwrap(),
            Value::String("ADA".into())
        );
    }
}
