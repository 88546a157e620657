//! Cypher AST.
//!
//! A statement is a sequence of clauses; the planner walks the sequence
//! and appends operators to a growing pipeline. Expressions are pure
//! data evaluated against a record.

use hashbrown::HashMap;

/// A complete statement.
#[derive(Debug, Clone)]
pub enum Statement {
    Query(Query),
    /// `query UNION [ALL] query ...` — column sets must agree.
    Union { all: bool, queries: Vec<Query> },
    Schema(SchemaCommand),
}

/// A query: ordered clauses ending (usually) in RETURN.
#[derive(Debug, Clone)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone)]
pub enum Clause {
    Match {
        optional: bool,
        patterns: Vec<Pattern>,
        where_clause: Option<Expr>,
    },
    Unwind {
        expr: Expr,
        alias: String,
    },
    With {
        distinct: bool,
        items: Vec<ReturnItem>,
        where_clause: Option<Expr>,
        order_by: Vec<OrderExpr>,
        skip: Option<Expr>,
        limit: Option<Expr>,
    },
    Create {
        patterns: Vec<Pattern>,
    },
    Merge {
        pattern: Pattern,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    },
    Set {
        items: Vec<SetItem>,
    },
    Remove {
        items: Vec<RemoveItem>,
    },
    Delete {
        variables: Vec<String>,
        detach: bool,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        yields: Vec<String>,
    },
    Return {
        distinct: bool,
        items: Vec<ReturnItem>,
        order_by: Vec<OrderExpr>,
        skip: Option<Expr>,
        limit: Option<Expr>,
    },
}

// ============================================================================
// Patterns
// ============================================================================

/// `(a:Person {k: v})-[r:KNOWS*1..3]->(b)`
#[derive(Debug, Clone)]
pub struct Pattern {
    pub elements: Vec<PatternElement>,
}

#[derive(Debug, Clone)]
pub enum PatternElement {
    Node(NodePattern),
    Relationship(RelPattern),
}

#[derive(Debug, Clone)]
pub struct NodePattern {
    pub alias: Option<String>,
    pub labels: Vec<String>,
    pub properties: HashMap<String, Expr>,
}

#[derive(Debug, Clone)]
pub struct RelPattern {
    pub alias: Option<String>,
    pub rel_types: Vec<String>,
    pub direction: PatternDirection,
    pub properties: HashMap<String, Expr>,
    pub var_length: Option<VarLength>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternDirection {
    /// `-[]->`
    Right,
    /// `<-[]-`
    Left,
    /// `-[]-`
    Both,
}

#[derive(Debug, Clone, Copy)]
pub struct VarLength {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

// ============================================================================
// Projections
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReturnItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderExpr {
    pub expr: Expr,
    pub ascending: bool,
}

#[derive(Debug, Clone)]
pub enum SetItem {
    /// `SET n.prop = expr`
    Property { variable: String, key: String, value: Expr },
    /// `SET n = {map}`
    AllProperties { variable: String, value: Expr },
    /// `SET n += {map}`
    MergeProperties { variable: String, value: Expr },
    /// `SET n:Label`
    Label { variable: String, label: String },
}

#[derive(Debug, Clone)]
pub enum RemoveItem {
    Property { variable: String, key: String },
    Label { variable: String, label: String },
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    /// `n`
    Variable(String),
    /// `n.name`
    Property { expr: Box<Expr>, key: String },
    /// `$name`
    Parameter(String),
    /// `count(n)`, `toUpper(s)`; `distinct` for `count(DISTINCT x)`
    FunctionCall { name: String, args: Vec<Expr>, distinct: bool },
    BinaryOp { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    UnaryOp { op: UnaryOp, expr: Box<Expr> },
    /// Chained comparison: `a < b <= c` holds when every step holds.
    Comparison { first: Box<Expr>, rest: Vec<(CompOp, Expr)> },
    List(Vec<Expr>),
    MapLiteral(HashMap<String, Expr>),
    /// `[x IN list WHERE pred | body]`
    ListComprehension {
        variable: String,
        list: Box<Expr>,
        filter: Option<Box<Expr>>,
        map: Option<Box<Expr>>,
    },
    /// `n {.name, .age}`
    MapProjection { variable: String, keys: Vec<String> },
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    /// `x IN list`
    In { expr: Box<Expr>, list: Box<Expr> },
    /// `x IS [NOT] NULL`
    IsNull { expr: Box<Expr>, negated: bool },
    /// `n:Person`
    HasLabel { expr: Box<Expr>, label: String },
    StringOp { left: Box<Expr>, op: StringOp, right: Box<Expr> },
    /// `RETURN *`
    Star,
}

#[derive(Debug, Clone)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    StartsWith,
    EndsWith,
    Contains,
}

/// Schema commands (`CREATE INDEX`, `DROP INDEX`).
#[derive(Debug, Clone)]
pub enum SchemaCommand {
    CreateIndex { label: String, property: String },
    DropIndex { label: String, property: String },
}

impl Expr {
    /// Whether this expression subtree contains an aggregation call.
    /// Decides between the project and aggregate operators.
    pub fn contains_aggregation(&self) -> bool {
        match self {
            Expr::FunctionCall { name, args, .. } => {
                is_aggregation_fn(name) || args.iter().any(Expr::contains_aggregation)
            }
            Expr::Property { expr, .. } => expr.contains_aggregation(),
            Expr::BinaryOp { left, right, .. } => {
                left.contains_aggregation() || right.contains_aggregation()
            }
            Expr::UnaryOp { expr, .. } => expr.contains_aggregation(),
            Expr::Comparison { first, rest } => {
                first.contains_aggregation()
                    || rest.iter().any(|(_, e)| e.contains_aggregation())
            }
            Expr::List(items) => items.iter().any(Expr::contains_aggregation),
            Expr::MapLiteral(map) => map.values().any(Expr::contains_aggregation),
            Expr::ListComprehension { list, filter, map, .. } => {
                list.contains_aggregation()
                    || filter.as_ref().is_some_and(|f| f.contains_aggregation())
                    || map.as_ref().is_some_and(|m| m.contains_aggregation())
            }
            Expr::Case { operand, whens, else_expr } => {
                operand.as_ref().is_some_and(|o| o.contains_aggregation())
                    || whens
                        .iter()
                        .any(|(w, t)| w.contains_aggregation() || t.contains_aggregation())
                    || else_expr.as_ref().is_some_and(|e| e.contains_aggregation())
            }
            Expr::In { expr, list } => {
                expr.contains_aggregation() || list.contains_aggregation()
            }
            Expr::IsNull { expr, .. } => expr.contains_aggregation(),
            Expr::HasLabel { expr, .. } => expr.contains_aggregation(),
            Expr::StringOp { left, right, .. } => {
                left.contains_aggregation() || right.contains_aggregation()
            }
            _ => false,
        }
    }

    /// Variables this expression reads.
    pub fn variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Variable(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Property { expr, .. } => expr.variables(out),
            Expr::FunctionCall { args, .. } => {
                for a in args {
                    a.variables(out);
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                left.variables(out);
                right.variables(out);
            }
            Expr::UnaryOp { expr, .. } => expr.variables(out),
            Expr::Comparison { first, rest } => {
                first.variables(out);
                for (_, e) in rest {
                    e.variables(out);
                }
            }
            Expr::List(items) => {
                for e in items {
                    e.variables(out);
                }
            }
            Expr::MapLiteral(map) => {
                for e in map.values() {
                    e.variables(out);
                }
            }
            Expr::ListComprehension { variable, list, filter, map } => {
                list.variables(out);
                let mut inner = Vec::new();
                if let Some(f) = filter {
                    f.variables(&mut inner);
                }
                if let Some(m) = map {
                    m.variables(&mut inner);
                }
                for v in inner {
                    if v != *variable && !out.contains(&v) {
                        out.push(v);
                    }
                }
            }
            Expr::MapProjection { variable, .. } => {
                if !out.contains(variable) {
                    out.push(variable.clone());
                }
            }
            Expr::Case { operand, whens, else_expr } => {
                if let Some(o) = operand {
                    o.variables(out);
                }
                for (w, t) in whens {
                    w.variables(out);
                    t.variables(out);
                }
                if let Some(e) = else_expr {
                    e.variables(out);
                }
            }
            Expr::In { expr, list } => {
                expr.variables(out);
                list.variables(out);
            }
            Expr::IsNull { expr, .. } => expr.variables(out),
            Expr::HasLabel { expr, .. } => expr.variables(out),
            Expr::StringOp { left, right, .. } => {
                left.variables(out);
                right.variables(out);
            }
            _ => {}
        }
    }
}

/// Names the aggregation functions recognised by the aggregate operator.
pub fn is_aggregation_fn(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "count" | "sum" | "avg" | "min" | "max" | "collect"
    )
}

impl Query {
    /// A query is read-only when no clause mutates the graph.
    pub fn is_read_only(&self) -> bool {
        self.clauses.iter().all(|c| {
            matches!(
                c,
                Clause::Match { .. }
                    | Clause::Unwind { .. }
                    | Clause::With { .. }
                    | Clause::Call { .. }
                    | Clause::Return { .. }
            )
        })
    }
}

impl Statement {
    pub fn is_read_only(&self) -> bool {
        match self {
            Statement::Query(q) => q.is_read_only(),
            Statement::Union { queries, .. } => queries.iter().all(Query::is_read_only),
            Statement::Schema(_) => false,
        }
    }
}
