//! Universal scalar value carried through records and expressions.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use super::{Edge, Node, PathValue};

/// ISO-8601 style duration (months, days, seconds, nanoseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoDuration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i32,
}

impl IsoDuration {
    /// Collapse to a nanosecond count for ordering and hashing, with a
    /// 30-day month convention.
    fn as_nanos(&self) -> i128 {
        let days = self.months as i128 * 30 + self.days as i128;
        (days * 86_400 + self.seconds as i128) * 1_000_000_000 + self.nanoseconds as i128
    }
}

impl PartialOrd for IsoDuration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IsoDuration {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_nanos().cmp(&other.as_nanos())
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}M{}DT{}S", self.months, self.days, self.seconds)
    }
}

/// Tagged-union value covering the engine's type system.
///
/// Scalars: Null, Bool, Int, Double, String. Containers: List, Map.
/// Graph references: Node, Edge, Path. Temporal: Date, LocalDateTime,
/// DateTime, Duration. Spatial: Point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),

    Node(Node),
    Edge(Edge),
    Path(Box<PathValue>),

    Date(NaiveDate),
    LocalDateTime(NaiveDateTime),
    DateTime(DateTime<Utc>),
    Duration(IsoDuration),

    Point { srid: i32, x: f64, y: f64 },
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Double(_) => "Float",
            Value::String(_) => "String",
            Value::List(_) => "Array",
            Value::Map(_) => "Map",
            Value::Node(_) => "Node",
            Value::Edge(_) => "Relationship",
            Value::Path(_) => "Path",
            Value::Date(_) => "Date",
            Value::LocalDateTime(_) => "LocalDateTime",
            Value::DateTime(_) => "DateTime",
            Value::Duration(_) => "Duration",
            Value::Point { .. } => "Point",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    /// Truthiness under three-valued logic: null and non-booleans are
    /// not true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Rank used by the total order to compare values of different types.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Map(_) => 0,
        Value::Node(_) => 1,
        Value::Edge(_) => 2,
        Value::List(_) => 3,
        Value::Path(_) => 4,
        Value::String(_) => 5,
        Value::Bool(_) => 6,
        Value::Int(_) | Value::Double(_) => 7,
        Value::Date(_) => 8,
        Value::LocalDateTime(_) => 9,
        Value::DateTime(_) => 10,
        Value::Duration(_) => 11,
        Value::Point { .. } => 12,
        Value::Null => 13,
    }
}

impl Value {
    /// Null-semantics comparison used by predicates: `None` when either
    /// side is null or the types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::LocalDateTime(a), Value::LocalDateTime(b)) => a.partial_cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            (Value::Duration(a), Value::Duration(b)) => a.partial_cmp(b),
            (Value::Node(a), Value::Node(b)) => a.id.partial_cmp(&b.id),
            (Value::Edge(a), Value::Edge(b)) => a.id.partial_cmp(&b.id),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Some(ord),
                    }
                }
                a.len().partial_cmp(&b.len())
            }
            _ => None,
        }
    }

    /// Total order over all values; the sort operator layers its
    /// null-placement rule (last in ASC, first in DESC) on top.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        let (ra, rb) = (type_rank(self), type_rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Double(b)) => (*a as f64).total_cmp(b),
            (Value::Double(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::LocalDateTime(a), Value::LocalDateTime(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Duration(a), Value::Duration(b)) => a.cmp(b),
            (Value::Node(a), Value::Node(b)) => a.id.cmp(&b.id),
            (Value::Edge(a), Value::Edge(b)) => a.id.cmp(&b.id),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.total_cmp(y) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Path(a), Value::Path(b)) => a.len().cmp(&b.len()),
            (Value::Map(a), Value::Map(b)) => {
                let mut ka: Vec<&String> = a.keys().collect();
                let mut kb: Vec<&String> = b.keys().collect();
                ka.sort();
                kb.sort();
                for (x, y) in ka.iter().zip(kb.iter()) {
                    match x.cmp(y) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                    match a[*x].total_cmp(&b[*y]) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                ka.len().cmp(&kb.len())
            }
            (
                Value::Point { srid: sa, x: xa, y: ya },
                Value::Point { srid: sb, x: xb, y: yb },
            ) => sa
                .cmp(sb)
                .then(xa.total_cmp(xb))
                .then(ya.total_cmp(yb)),
            _ => Ordering::Equal,
        }
    }

    /// Equality under the total order; used by distinct and group keys
    /// to resolve hash collisions.
    pub fn total_eq(&self, other: &Value) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

// ============================================================================
// Hashing
// ============================================================================

impl Value {
    /// Feed a canonical encoding of this value into a streaming xxh64
    /// hasher. Int and Double hash identically when numerically equal,
    /// matching the comparison semantics above.
    pub fn hash_into(&self, state: &mut Xxh64) {
        match self {
            Value::Null => state.update(&[0x00]),
            Value::Bool(b) => {
                state.update(&[0x01]);
                state.update(&[*b as u8]);
            }
            Value::Int(i) => {
                state.update(&[0x02]);
                state.update(&(*i as f64).to_bits().to_le_bytes());
            }
            Value::Double(f) => {
                state.update(&[0x02]);
                state.update(&f.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                state.update(&[0x03]);
                state.update(s.as_bytes());
            }
            Value::List(items) => {
                state.update(&[0x04]);
                state.update(&(items.len() as u64).to_le_bytes());
                for v in items {
                    v.hash_into(state);
                }
            }
            Value::Map(map) => {
                state.update(&[0x05]);
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for k in keys {
                    state.update(k.as_bytes());
                    map[k].hash_into(state);
                }
            }
            Value::Node(n) => {
                state.update(&[0x06]);
                state.update(&n.id.0.to_le_bytes());
            }
            Value::Edge(e) => {
                state.update(&[0x07]);
                state.update(&e.id.0.to_le_bytes());
            }
            Value::Path(p) => {
                state.update(&[0x08]);
                for n in &p.nodes {
                    state.update(&n.id.0.to_le_bytes());
                }
                for e in &p.edges {
                    state.update(&e.id.0.to_le_bytes());
                }
            }
            Value::Date(d) => {
                state.update(&[0x09]);
                state.update(d.to_string().as_bytes());
            }
            Value::LocalDateTime(dt) => {
                state.update(&[0x0a]);
                state.update(dt.to_string().as_bytes());
            }
            Value::DateTime(dt) => {
                state.update(&[0x0b]);
                state.update(&dt.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
            }
            Value::Duration(d) => {
                state.update(&[0x0c]);
                state.update(&d.as_nanos().to_le_bytes());
            }
            Value::Point { srid, x, y } => {
                state.update(&[0x0d]);
                state.update(&srid.to_le_bytes());
                state.update(&x.to_bits().to_le_bytes());
                state.update(&y.to_bits().to_le_bytes());
            }
        }
    }

    /// Canonical 64-bit hash of a single value.
    pub fn hash64(&self) -> u64 {
        let mut state = Xxh64::new(0);
        self.hash_into(&mut state);
        state.digest()
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                let mut keys: Vec<&String> = m.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {}", m[*k])?;
                }
                write!(f, "}}")
            }
            Value::Node(n) => write!(f, "({})", n.id),
            Value::Edge(e) => write!(f, "[{}]", e.id),
            Value::Path(p) => write!(f, "<path len={}>", p.len()),
            Value::Date(d) => write!(f, "{d}"),
            Value::LocalDateTime(dt) => write!(f, "{dt}"),
            Value::DateTime(dt) => write!(f, "{dt}"),
            Value::Duration(d) => write!(f, "{d}"),
            Value::Point { srid, x, y } => {
                write!(f, "point({{srid: {srid}, x: {x}, y: {y}}})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("hello"), Value::String("hello".into()));
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(2.5), Value::Double(2.5));
        assert_eq!(Value::from(true), Value::Bool(true));
    }

    #[test]
    fn test_null_comparison() {
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).compare(&Value::Null), None);
    }

    #[test]
    fn test_numeric_comparison() {
        assert_eq!(
            Value::Int(1).compare(&Value::Double(1.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Double(2.0).compare(&Value::Int(2)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_total_order_is_total() {
        let vals = [
            Value::Null,
            Value::Bool(false),
            Value::Int(3),
            Value::Double(1.5),
            Value::String("a".into()),
            Value::List(vec![Value::Int(1)]),
        ];
        for a in &vals {
            for b in &vals {
                // Antisymmetry holds for every pair, nulls included.
                assert_eq!(a.total_cmp(b), b.total_cmp(a).reverse());
            }
        }
    }

    #[test]
    fn test_mixed_numeric_hash_equality() {
        assert_eq!(Value::Int(4).hash64(), Value::Double(4.0).hash64());
        assert_ne!(Value::Int(4).hash64(), Value::Double(4.5).hash64());
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(1).is_truthy());
    }
}
