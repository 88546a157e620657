//! Wire formatters.
//!
//! Verbose rows tag every value with its type name; compact rows use
//! small integer type codes and push attribute, label, and relationship
//! type names through a per-query string pool. Both produce JSON trees
//! the transport layer can emit directly.

use hashbrown::HashMap;
use serde_json::{json, Value as Json};

use crate::graph::Graph;
use crate::model::{Edge, Node, Value};

/// Compact type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum TypeCode {
    Null = 1,
    String = 2,
    Integer = 3,
    Boolean = 4,
    Double = 5,
    Array = 6,
    Edge = 7,
    Node = 8,
    Path = 9,
    Map = 10,
    Point = 11,
}

/// Per-query string pool: attribute names, labels, and relationship
/// types are sent once in the reply header and referenced by offset.
#[derive(Debug, Default)]
pub struct StringPool {
    strings: Vec<String>,
    offsets: HashMap<String, u64>,
}

impl StringPool {
    /// Intern a string, returning its pool offset.
    pub fn intern(&mut self, s: &str) -> u64 {
        if let Some(&off) = self.offsets.get(s) {
            return off;
        }
        let off = self.strings.len() as u64;
        self.strings.push(s.to_owned());
        self.offsets.insert(s.to_owned(), off);
        off
    }

    pub fn into_strings(self) -> Vec<String> {
        self.strings
    }
}

/// Render a double the way the wire expects: `%.15g` — 15 significant
/// digits, fixed notation while the exponent fits, scientific outside,
/// trailing zeros trimmed.
pub fn double_repr(f: f64) -> String {
    const SIG: i32 = 15;

    if f == 0.0 {
        return "0".to_owned();
    }
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }

    // Decimal exponent of the value after rounding to 15 significant
    // digits; rounding can carry (9.99... -> 1.0e+1), so it must come
    // from the rendered form, not from log10.
    let sci = format!("{:.*e}", (SIG - 1) as usize, f);
    let Some(e_at) = sci.find('e') else {
        return sci;
    };
    let exp: i32 = sci[e_at + 1..].parse().unwrap_or(0);

    if exp < -4 || exp >= SIG {
        let mantissa = trim_fraction(sci[..e_at].to_owned());
        format!("{mantissa}e{exp}")
    } else {
        // Significant digits left of the point consume precision.
        let precision = (SIG - 1 - exp).max(0) as usize;
        trim_fraction(format!("{f:.precision$}"))
    }
}

fn trim_fraction(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

// ============================================================================
// Verbose
// ============================================================================

fn verbose_node(graph: &Graph, n: &Node) -> Json {
    let labels: Vec<Json> = n
        .labels
        .iter()
        .map(|&l| Json::String(graph.label_name(l).unwrap_or_default()))
        .collect();
    let props: serde_json::Map<String, Json> = graph
        .node_properties(n.id)
        .into_iter()
        .map(|(attr, v)| {
            (
                graph.attr_name(attr).unwrap_or_default(),
                verbose_value(graph, &v),
            )
        })
        .collect();
    json!({ "id": n.id.0, "labels": labels, "properties": props })
}

fn verbose_edge(graph: &Graph, e: &Edge) -> Json {
    let props: serde_json::Map<String, Json> = graph
        .edge_properties(e.id)
        .into_iter()
        .map(|(attr, v)| {
            (
                graph.attr_name(attr).unwrap_or_default(),
                verbose_value(graph, &v),
            )
        })
        .collect();
    json!({
        "id": e.id.0,
        "type": graph.rel_type_name(e.rel_type).unwrap_or_default(),
        "src": e.src.0,
        "dst": e.dst.0,
        "properties": props,
    })
}

/// `[type_name, payload]`.
pub fn verbose_value(graph: &Graph, v: &Value) -> Json {
    match v {
        Value::Null => json!(["Null", Json::Null]),
        Value::Bool(b) => json!(["Boolean", b]),
        Value::Int(i) => json!(["Integer", i]),
        Value::Double(f) => json!(["Float", f]),
        Value::String(s) => json!(["String", s]),
        Value::List(items) => {
            let payload: Vec<Json> = items.iter().map(|x| verbose_value(graph, x)).collect();
            json!(["Array", payload])
        }
        Value::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let payload: serde_json::Map<String, Json> = keys
                .into_iter()
                .map(|k| (k.clone(), verbose_value(graph, &map[k])))
                .collect();
            json!(["Map", payload])
        }
        Value::Node(n) => json!(["Node", verbose_node(graph, n)]),
        Value::Edge(e) => json!(["Relationship", verbose_edge(graph, e)]),
        Value::Path(p) => {
            let nodes: Vec<Json> = p.nodes.iter().map(|n| verbose_node(graph, n)).collect();
            let edges: Vec<Json> = p.edges.iter().map(|e| verbose_edge(graph, e)).collect();
            json!(["Path", [nodes, edges]])
        }
        Value::Date(d) => json!(["String", d.to_string()]),
        Value::LocalDateTime(dt) => json!(["String", dt.to_string()]),
        Value::DateTime(dt) => json!(["String", dt.to_rfc3339()]),
        Value::Duration(d) => json!(["String", d.to_string()]),
        Value::Point { srid, x, y } => json!(["Point", [srid, x, y]]),
    }
}

// ============================================================================
// Compact
// ============================================================================

fn compact_props(graph: &Graph, pool: &mut StringPool, props: Vec<(crate::model::AttrId, Value)>) -> Json {
    let rows: Vec<Json> = props
        .into_iter()
        .map(|(attr, v)| {
            let name = graph.attr_name(attr).unwrap_or_default();
            let off = pool.intern(&name);
            json!([off, compact_value(graph, pool, &v)])
        })
        .collect();
    Json::Array(rows)
}

fn compact_node(graph: &Graph, pool: &mut StringPool, n: &Node) -> Json {
    let labels: Vec<Json> = n
        .labels
        .iter()
        .map(|&l| {
            let name = graph.label_name(l).unwrap_or_default();
            Json::from(pool.intern(&name))
        })
        .collect();
    let props = compact_props(graph, pool, graph.node_properties(n.id));
    json!([n.id.0, labels, props])
}

fn compact_edge(graph: &Graph, pool: &mut StringPool, e: &Edge) -> Json {
    let type_off = {
        let name = graph.rel_type_name(e.rel_type).unwrap_or_default();
        pool.intern(&name)
    };
    let props = compact_props(graph, pool, graph.edge_properties(e.id));
    json!([e.id.0, type_off, e.src.0, e.dst.0, props])
}

/// `[type_code, payload]`.
pub fn compact_value(graph: &Graph, pool: &mut StringPool, v: &Value) -> Json {
    match v {
        Value::Null => json!([TypeCode::Null as i64]),
        Value::String(s) => json!([TypeCode::String as i64, s]),
        Value::Int(i) => json!([TypeCode::Integer as i64, i]),
        Value::Bool(b) => json!([TypeCode::Boolean as i64, *b as i64]),
        Value::Double(f) => json!([TypeCode::Double as i64, double_repr(*f)]),
        Value::List(items) => {
            let payload: Vec<Json> = items
                .iter()
                .map(|x| compact_value(graph, pool, x))
                .collect();
            json!([TypeCode::Array as i64, payload])
        }
        Value::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let payload: Vec<Json> = keys
                .into_iter()
                .map(|k| {
                    let off = pool.intern(k);
                    json!([off, compact_value(graph, pool, &map[k])])
                })
                .collect();
            json!([TypeCode::Map as i64, payload])
        }
        Value::Node(n) => json!([TypeCode::Node as i64, compact_node(graph, pool, n)]),
        Value::Edge(e) => json!([TypeCode::Edge as i64, compact_edge(graph, pool, e)]),
        Value::Path(p) => {
            let nodes: Vec<Json> = p
                .nodes
                .iter()
                .map(|n| compact_node(graph, pool, n))
                .collect();
            let edges: Vec<Json> = p
                .edges
                .iter()
                .map(|e| compact_edge(graph, pool, e))
                .collect();
            json!([TypeCode::Path as i64, [nodes, edges]])
        }
        Value::Date(d) => json!([TypeCode::String as i64, d.to_string()]),
        Value::LocalDateTime(dt) => json!([TypeCode::String as i64, dt.to_string()]),
        Value::DateTime(dt) => json!([TypeCode::String as i64, dt.to_rfc3339()]),
        Value::Duration(d) => json!([TypeCode::String as i64, d.to_string()]),
        Value::Point { srid, x, y } => json!([TypeCode::Point as i64, [srid, x, y]]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_repr() {
        assert_eq!(double_repr(0.0), "0");
        assert_eq!(double_repr(2.5), "2.5");
        assert_eq!(double_repr(3.0), "3");
        assert_eq!(double_repr(-1.25), "-1.25");
        assert!(double_repr(1e20).contains('e'));
        assert_eq!(double_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_double_repr_significant_not_fractional_digits() {
        // 15 significant digits, so binary noise beyond them never
        // reaches the wire.
        assert_eq!(double_repr(123.456789), "123.456789");
        assert_eq!(double_repr(1234567890123.45), "1234567890123.45");
        assert_eq!(double_repr(0.1), "0.1");
        assert_eq!(double_repr(-9876543.21), "-9876543.21");
    }

    #[test]
    fn test_double_repr_exponent_window() {
        // The fixed/scientific switchover of %g: below 1e-4 and at or
        // above 1e15 the rendering goes scientific.
        assert_eq!(double_repr(0.0001), "0.0001");
        assert_eq!(double_repr(1e-5), "1e-5");
        assert_eq!(double_repr(1e20), "1e20");
        assert_eq!(double_repr(999999999999999.0), "999999999999999");
        assert_eq!(double_repr(1e15), "1e15");
    }

    #[test]
    fn test_string_pool_dedups() {
        let mut pool = StringPool::default();
        let a = pool.intern("name");
        let b = pool.intern("age");
        let c = pool.intern("name");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.into_strings(), vec!["name", "age"]);
    }

    #[test]
    fn test_compact_scalars() {
        let graph = Graph::new("fmt-test");
        let mut pool = StringPool::default();
        assert_eq!(
            compact_value(&graph, &mut pool, &Value::Int(42)),
            json!([3, 42])
        );
        assert_eq!(
            compact_value(&graph, &mut pool, &Value::Bool(true)),
            json!([4, 1])
        );
        assert_eq!(compact_value(&graph, &mut pool, &Value::Null), json!([1]));
    }
}
