//! # Execution Plan
//!
//! Turns a parsed statement into an operator tree. Planning runs in
//! three passes:
//!
//! 1. **normalize** — clone the AST, give every unaliased pattern
//!    element a generated alias, expand `*` projections.
//! 2. **collect** — reserve a record slot for every alias the plan can
//!    touch, including internal pivot slots for hash joins. The alias
//!    map is frozen afterwards, so every record in the plan shares one
//!    layout.
//! 3. **build** — walk the clause sequence appending operators to the
//!    growing pipeline.
//!
//! Disconnected patterns combine through a cartesian product unless a
//! WHERE equality spanning exactly two branches lets the planner use a
//! value hash join instead.

use std::sync::Arc;

use hashbrown::HashSet;

use crate::cypher::ast::{
    Clause, Expr, Pattern, PatternDirection, PatternElement, Query, RemoveItem,
    ReturnItem, SetItem, Statement,
};
use crate::graph::Graph;
use crate::ops::aggregate::{AggItem, AggKind, Aggregate};
use crate::ops::call::{procedure_columns, ProcedureCall};
use crate::ops::filter::{Filter, Project, Unwind};
use crate::ops::join::{CartesianProduct, UnionOp, ValueHashJoin};
use crate::ops::mutate::{
    Create, CreateSpec, Delete, EdgeCreateSpec, Merge, NodeCreateSpec, Update,
    UpdateItem,
};
use crate::ops::results::Results;
use crate::ops::scan::{AllNodeScan, IndexScan, LabelScan};
use crate::ops::sort::{Distinct, LimitOp, SkipOp, Sort, SortItem};
use crate::ops::traverse::{ConditionalTraverse, ExpandInto, VarLenTraverse};
use crate::ops::{render_plan, ArgumentOp, BoxOp};
use crate::record::AliasMap;
use crate::{Error, Result};

/// A ready-to-run operator tree plus the record layout it uses.
pub struct ExecutionPlan {
    pub root: Results,
    pub mapping: Arc<AliasMap>,
    /// `(column name, record slot)` for the result set.
    pub columns: Vec<(String, usize)>,
}

impl ExecutionPlan {
    /// Textual operator-tree dump (`EXPLAIN`).
    pub fn render(&self) -> Vec<String> {
        let mut out = Vec::new();
        render_plan(&self.root, 0, &mut out);
        out
    }
}

/// Build a plan for a statement against a graph.
pub fn build(graph: &Arc<Graph>, stmt: &Statement) -> Result<ExecutionPlan> {
    let stmt = normalize(stmt.clone())?;

    match &stmt {
        Statement::Query(q) => {
            let mapping = Arc::new(collect_slots(std::slice::from_ref(q)));
            let mut builder = Builder::new(graph.clone(), mapping.clone(), 0);
            let (stream, columns) = builder.build_query(q)?;
            Ok(ExecutionPlan { root: Results::new(stream), mapping, columns })
        }
        Statement::Union { all, queries } => {
            let mapping = Arc::new(collect_slots(queries));
            let mut branches = Vec::new();
            let mut columns: Option<Vec<(String, usize)>> = None;
            let mut clause_base = 0;
            for q in queries {
                let mut builder =
                    Builder::new(graph.clone(), mapping.clone(), clause_base);
                clause_base += q.clauses.len();
                let (stream, cols) = builder.build_query(q)?;
                match &columns {
                    None => columns = Some(cols),
                    Some(expected) => {
                        let names: Vec<&String> =
                            expected.iter().map(|(n, _)| n).collect();
                        let got: Vec<&String> = cols.iter().map(|(n, _)| n).collect();
                        if names != got {
                            return Err(Error::SemanticError(
                                "UNION branches must return the same columns".into(),
                            ));
                        }
                    }
                }
                branches.push(stream);
            }
            let columns = columns.unwrap_or_default();
            let mut stream: BoxOp = Box::new(UnionOp::new(branches));
            if !*all {
                let key_slots: Vec<usize> = columns.iter().map(|(_, s)| *s).collect();
                stream = Box::new(Distinct::new(stream, key_slots));
            }
            Ok(ExecutionPlan { root: Results::new(stream), mapping, columns })
        }
        Statement::Schema(_) => Err(Error::PlanError(
            "schema commands execute outside the operator pipeline".into(),
        )),
    }
}

// ============================================================================
// Pass 1: normalize
// ============================================================================

fn normalize(stmt: Statement) -> Result<Statement> {
    match stmt {
        Statement::Query(mut q) => {
            let mut counter = 0;
            normalize_query(&mut q, &mut counter)?;
            Ok(Statement::Query(q))
        }
        Statement::Union { all, mut queries } => {
            let mut counter = 0;
            for q in &mut queries {
                normalize_query(q, &mut counter)?;
            }
            Ok(Statement::Union { all, queries })
        }
        schema => Ok(schema),
    }
}

fn normalize_query(q: &mut Query, counter: &mut usize) -> Result<()> {
    let mut bound: Vec<String> = Vec::new();

    let assign = |pattern: &mut Pattern, counter: &mut usize| {
        for element in &mut pattern.elements {
            match element {
                PatternElement::Node(n) if n.alias.is_none() => {
                    n.alias = Some(format!("@anon{counter}"));
                    *counter += 1;
                }
                PatternElement::Relationship(r) if r.alias.is_none() => {
                    r.alias = Some(format!("@anon{counter}"));
                    *counter += 1;
                }
                _ => {}
            }
        }
    };

    for clause in &mut q.clauses {
        match clause {
            Clause::Match { patterns, .. } | Clause::Create { patterns } => {
                for p in patterns.iter_mut() {
                    assign(p, counter);
                    bind_pattern_aliases(p, &mut bound);
                }
            }
            Clause::Merge { pattern, .. } => {
                assign(pattern, counter);
                bind_pattern_aliases(pattern, &mut bound);
            }
            Clause::Unwind { alias, .. } => {
                if !bound.contains(alias) {
                    bound.push(alias.clone());
                }
            }
            Clause::Call { name, yields, .. } => {
                if yields.is_empty() {
                    let cols = procedure_columns(name).ok_or_else(|| {
                        Error::SchemaError(format!("Unknown procedure: {name}"))
                    })?;
                    *yields = cols.iter().map(|c| c.to_string()).collect();
                }
                for y in yields.iter() {
                    if !bound.contains(y) {
                        bound.push(y.clone());
                    }
                }
            }
            Clause::With { items, .. } | Clause::Return { items, .. } => {
                expand_star(items, &bound)?;
                // Projection rebinds the visible alias set.
                let mut next = Vec::new();
                for item in items.iter_mut() {
                    let alias = match &item.alias {
                        Some(a) => a.clone(),
                        None => {
                            let a = expr_label(&item.expr);
                            item.alias = Some(a.clone());
                            a
                        }
                    };
                    next.push(alias);
                }
                if matches!(clause, Clause::With { .. }) {
                    bound = next;
                }
            }
            Clause::Set { .. } | Clause::Remove { .. } | Clause::Delete { .. } => {}
        }
    }
    Ok(())
}

fn bind_pattern_aliases(pattern: &Pattern, bound: &mut Vec<String>) {
    for element in &pattern.elements {
        let alias = match element {
            PatternElement::Node(n) => n.alias.as_deref(),
            PatternElement::Relationship(r) => r.alias.as_deref(),
        };
        if let Some(alias) = alias {
            if !alias.starts_with('@') && !bound.iter().any(|b| b == alias) {
                bound.push(alias.to_owned());
            }
        }
    }
}

fn expand_star(items: &mut Vec<ReturnItem>, bound: &[String]) -> Result<()> {
    if !items.iter().any(|i| matches!(i.expr, Expr::Star)) {
        return Ok(());
    }
    if bound.is_empty() {
        return Err(Error::SemanticError("RETURN * with no bound variables".into()));
    }
    let mut expanded = Vec::new();
    for item in items.drain(..) {
        if matches!(item.expr, Expr::Star) {
            for alias in bound {
                expanded.push(ReturnItem {
                    expr: Expr::Variable(alias.clone()),
                    alias: Some(alias.clone()),
                });
            }
        } else {
            expanded.push(item);
        }
    }
    *items = expanded;
    Ok(())
}

/// Default column label for an unaliased projection item.
fn expr_label(expr: &Expr) -> String {
    match expr {
        Expr::Variable(v) => v.clone(),
        Expr::Property { expr, key } => format!("{}.{key}", expr_label(expr)),
        Expr::Parameter(p) => format!("${p}"),
        Expr::FunctionCall { name, args, .. } => {
            if args.is_empty() {
                format!("{name}(*)")
            } else {
                let inner: Vec<String> = args.iter().map(expr_label).collect();
                format!("{name}({})", inner.join(", "))
            }
        }
        Expr::Literal(lit) => match lit {
            crate::cypher::ast::Literal::Null => "null".into(),
            crate::cypher::ast::Literal::Bool(b) => b.to_string(),
            crate::cypher::ast::Literal::Int(i) => i.to_string(),
            crate::cypher::ast::Literal::Float(f) => f.to_string(),
            crate::cypher::ast::Literal::String(s) => format!("'{s}'"),
        },
        _ => "expression".into(),
    }
}

// ============================================================================
// Pass 2: slot collection
// ============================================================================

fn collect_slots(queries: &[Query]) -> AliasMap {
    let mut mapping = AliasMap::new();
    let mut clause_idx = 0;
    for q in queries {
        for clause in &q.clauses {
            match clause {
                Clause::Match { patterns, where_clause, .. } => {
                    for p in patterns {
                        reserve_pattern(&mut mapping, p);
                    }
                    // One pivot per potential join in this clause.
                    for k in 0..patterns.len() {
                        mapping.reserve(&format!("@pivot{clause_idx}_{k}"));
                    }
                    if let Some(e) = where_clause {
                        reserve_expr_vars(&mut mapping, e);
                    }
                }
                Clause::Create { patterns } => {
                    for p in patterns {
                        reserve_pattern(&mut mapping, p);
                    }
                }
                Clause::Merge { pattern, .. } => reserve_pattern(&mut mapping, pattern),
                Clause::Unwind { expr, alias } => {
                    mapping.reserve(alias);
                    reserve_expr_vars(&mut mapping, expr);
                }
                Clause::Call { args, yields, .. } => {
                    for y in yields {
                        mapping.reserve(y);
                    }
                    for a in args {
                        reserve_expr_vars(&mut mapping, a);
                    }
                }
                Clause::With { items, where_clause, order_by, .. } => {
                    for item in items {
                        if let Some(alias) = &item.alias {
                            mapping.reserve(alias);
                        }
                        reserve_expr_vars(&mut mapping, &item.expr);
                    }
                    if let Some(e) = where_clause {
                        reserve_expr_vars(&mut mapping, e);
                    }
                    for o in order_by {
                        reserve_expr_vars(&mut mapping, &o.expr);
                    }
                }
                Clause::Return { items, order_by, .. } => {
                    for item in items {
                        if let Some(alias) = &item.alias {
                            mapping.reserve(alias);
                        }
                        reserve_expr_vars(&mut mapping, &item.expr);
                    }
                    for o in order_by {
                        reserve_expr_vars(&mut mapping, &o.expr);
                    }
                }
                Clause::Set { items } => {
                    for item in items {
                        match item {
                            SetItem::Property { value, .. }
                            | SetItem::AllProperties { value, .. }
                            | SetItem::MergeProperties { value, .. } => {
                                reserve_expr_vars(&mut mapping, value);
                            }
                            SetItem::Label { .. } => {}
                        }
                    }
                }
                Clause::Remove { .. } | Clause::Delete { .. } => {}
            }
            clause_idx += 1;
        }
    }
    mapping
}

fn reserve_pattern(mapping: &mut AliasMap, pattern: &Pattern) {
    for element in &pattern.elements {
        match element {
            PatternElement::Node(n) => {
                if let Some(a) = &n.alias {
                    mapping.reserve(a);
                }
            }
            PatternElement::Relationship(r) => {
                if let Some(a) = &r.alias {
                    mapping.reserve(a);
                }
            }
        }
    }
}

/// Reserve every variable an expression can touch, including list
/// comprehension loop variables (they need a scratch slot).
fn reserve_expr_vars(mapping: &mut AliasMap, expr: &Expr) {
    let mut vars = Vec::new();
    expr.variables(&mut vars);
    for v in vars {
        mapping.reserve(&v);
    }
    reserve_comprehension_vars(mapping, expr);
}

fn reserve_comprehension_vars(mapping: &mut AliasMap, expr: &Expr) {
    match expr {
        Expr::ListComprehension { variable, list, filter, map } => {
            mapping.reserve(variable);
            reserve_comprehension_vars(mapping, list);
            if let Some(f) = filter {
                reserve_comprehension_vars(mapping, f);
            }
            if let Some(m) = map {
                reserve_comprehension_vars(mapping, m);
            }
        }
        Expr::Property { expr, .. }
        | Expr::UnaryOp { expr, .. }
        | Expr::IsNull { expr, .. }
        | Expr::HasLabel { expr, .. } => reserve_comprehension_vars(mapping, expr),
        Expr::BinaryOp { left, right, .. } | Expr::StringOp { left, right, .. } => {
            reserve_comprehension_vars(mapping, left);
            reserve_comprehension_vars(mapping, right);
        }
        Expr::Comparison { first, rest } => {
            reserve_comprehension_vars(mapping, first);
            for (_, e) in rest {
                reserve_comprehension_vars(mapping, e);
            }
        }
        Expr::FunctionCall { args, .. } => {
            for a in args {
                reserve_comprehension_vars(mapping, a);
            }
        }
        Expr::List(items) => {
            for e in items {
                reserve_comprehension_vars(mapping, e);
            }
        }
        Expr::MapLiteral(entries) => {
            for e in entries.values() {
                reserve_comprehension_vars(mapping, e);
            }
        }
        Expr::In { expr, list } => {
            reserve_comprehension_vars(mapping, expr);
            reserve_comprehension_vars(mapping, list);
        }
        Expr::Case { operand, whens, else_expr } => {
            if let Some(o) = operand {
                reserve_comprehension_vars(mapping, o);
            }
            for (w, t) in whens {
                reserve_comprehension_vars(mapping, w);
                reserve_comprehension_vars(mapping, t);
            }
            if let Some(e) = else_expr {
                reserve_comprehension_vars(mapping, e);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Pass 3: build
// ============================================================================

struct Builder {
    graph: Arc<Graph>,
    mapping: Arc<AliasMap>,
    bound: HashSet<String>,
    clause_idx: usize,
}

impl Builder {
    fn new(graph: Arc<Graph>, mapping: Arc<AliasMap>, clause_base: usize) -> Self {
        Self { graph, mapping, bound: HashSet::new(), clause_idx: clause_base }
    }

    fn slot(&self, alias: &str) -> Result<usize> {
        self.mapping
            .get(alias)
            .ok_or_else(|| Error::SchemaError(format!("Unbound variable: {alias}")))
    }

    fn source(&self, stream: Option<BoxOp>) -> BoxOp {
        stream.unwrap_or_else(|| Box::new(ArgumentOp::new(self.mapping.clone())))
    }

    fn build_query(&mut self, q: &Query) -> Result<(BoxOp, Vec<(String, usize)>)> {
        let mut stream: Option<BoxOp> = None;
        let mut columns = Vec::new();

        for clause in &q.clauses {
            match clause {
                Clause::Match { optional, patterns, where_clause } => {
                    if *optional {
                        return Err(Error::PlanError(
                            "OPTIONAL MATCH is not supported".into(),
                        ));
                    }
                    stream =
                        Some(self.plan_match(stream, patterns, where_clause.as_ref())?);
                }
                Clause::Unwind { expr, alias } => {
                    let slot = self.slot(alias)?;
                    let child = self.source(stream.take());
                    self.bound.insert(alias.clone());
                    stream = Some(Box::new(Unwind::new(
                        self.graph.clone(),
                        child,
                        expr.clone(),
                        slot,
                    )));
                }
                Clause::With { distinct, items, where_clause, order_by, skip, limit } => {
                    let (s, _) = self.plan_projection(
                        stream.take(),
                        items,
                        *distinct,
                        order_by,
                        skip.as_ref(),
                        limit.as_ref(),
                    )?;
                    let mut s = s;
                    if let Some(pred) = where_clause {
                        s = Box::new(Filter::new(self.graph.clone(), s, pred.clone()));
                    }
                    stream = Some(s);
                }
                Clause::Create { patterns } => {
                    let spec = self.create_spec(patterns)?;
                    let child = self.source(stream.take());
                    stream = Some(Box::new(Create::new(self.graph.clone(), child, spec)));
                }
                Clause::Merge { pattern, on_create, on_match } => {
                    stream = Some(self.plan_merge(
                        stream.take(),
                        pattern,
                        on_create,
                        on_match,
                    )?);
                }
                Clause::Set { items } => {
                    let resolved = self.update_items(items)?;
                    let child = self.source(stream.take());
                    stream =
                        Some(Box::new(Update::new(self.graph.clone(), child, resolved)));
                }
                Clause::Remove { items } => {
                    let resolved = self.remove_items(items)?;
                    let child = self.source(stream.take());
                    stream =
                        Some(Box::new(Update::new(self.graph.clone(), child, resolved)));
                }
                Clause::Delete { variables, detach } => {
                    let slots = variables
                        .iter()
                        .map(|v| self.slot(v))
                        .collect::<Result<Vec<usize>>>()?;
                    let child = self.source(stream.take());
                    stream = Some(Box::new(Delete::new(
                        self.graph.clone(),
                        child,
                        slots,
                        *detach,
                    )));
                }
                Clause::Call { name, args, yields } => {
                    let cols = procedure_columns(name).ok_or_else(|| {
                        Error::SchemaError(format!("Unknown procedure: {name}"))
                    })?;
                    let mut mapped = Vec::new();
                    for y in yields {
                        let col = cols.iter().position(|c| c == y).ok_or_else(|| {
                            Error::SchemaError(format!(
                                "Procedure {name} does not yield '{y}'"
                            ))
                        })?;
                        mapped.push((col, self.slot(y)?));
                        self.bound.insert(y.clone());
                    }
                    let child = self.source(stream.take());
                    stream = Some(Box::new(ProcedureCall::new(
                        self.graph.clone(),
                        child,
                        name.clone(),
                        args.clone(),
                        mapped,
                    )));
                }
                Clause::Return { distinct, items, order_by, skip, limit } => {
                    let (s, cols) = self.plan_projection(
                        stream.take(),
                        items,
                        *distinct,
                        order_by,
                        skip.as_ref(),
                        limit.as_ref(),
                    )?;
                    stream = Some(s);
                    columns = cols;
                }
            }
            self.clause_idx += 1;
        }

        Ok((self.source(stream), columns))
    }

    // ========================================================================
    // MATCH
    // ========================================================================

    fn plan_match(
        &mut self,
        stream: Option<BoxOp>,
        patterns: &[Pattern],
        where_clause: Option<&Expr>,
    ) -> Result<BoxOp> {
        // Each branch carries the set of aliases it binds.
        let mut branches: Vec<(BoxOp, HashSet<String>)> = Vec::new();
        if let Some(s) = stream {
            branches.push((s, self.bound.clone()));
        }

        for pattern in patterns {
            let anchor = self.pattern_anchor(pattern);
            let connected = branches
                .iter()
                .position(|(_, aliases)| aliases.contains(&anchor));
            match connected {
                Some(idx) => {
                    let (branch, mut aliases) = branches.remove(idx);
                    let branch = self.plan_pattern(branch, pattern, &mut aliases, false)?;
                    branches.insert(idx, (branch, aliases));
                }
                None => {
                    let mut aliases = HashSet::new();
                    let scan = self.plan_scan(pattern, &mut aliases)?;
                    let branch = self.plan_pattern(scan, pattern, &mut aliases, true)?;
                    branches.push((branch, aliases));
                }
            }
        }

        // Split WHERE into conjuncts; equalities bridging two branches
        // become hash joins, the rest filter the combined stream.
        let mut conjuncts = Vec::new();
        if let Some(pred) = where_clause {
            split_conjuncts(pred, &mut conjuncts);
        }

        let mut join_idx = 0;
        let mut remaining = Vec::new();
        'conjunct: for conjunct in conjuncts {
            if branches.len() > 1 {
                if let Some((lhs, rhs)) = as_equality(&conjunct) {
                    let mut lhs_vars = Vec::new();
                    lhs.variables(&mut lhs_vars);
                    let mut rhs_vars = Vec::new();
                    rhs.variables(&mut rhs_vars);
                    let find = |vars: &[String]| {
                        branches.iter().position(|(_, aliases)| {
                            !vars.is_empty() && vars.iter().all(|v| aliases.contains(v))
                        })
                    };
                    if let (Some(li), Some(ri)) = (find(&lhs_vars), find(&rhs_vars)) {
                        if li != ri {
                            let (a, b) = (li.min(ri), li.max(ri));
                            let (right, right_aliases) = branches.remove(b);
                            let (left, left_aliases) = branches.remove(a);
                            let pivot = self.slot(&format!(
                                "@pivot{}_{join_idx}",
                                self.clause_idx
                            ))?;
                            join_idx += 1;
                            let (lhs_expr, rhs_expr) = if li < ri {
                                (lhs.clone(), rhs.clone())
                            } else {
                                (rhs.clone(), lhs.clone())
                            };
                            let joined: BoxOp = Box::new(ValueHashJoin::new(
                                self.graph.clone(),
                                left,
                                right,
                                lhs_expr,
                                rhs_expr,
                                pivot,
                            ));
                            let mut aliases = left_aliases;
                            aliases.extend(right_aliases);
                            branches.insert(a, (joined, aliases));
                            continue 'conjunct;
                        }
                    }
                }
            }
            remaining.push(conjunct);
        }

        // Whatever stayed disconnected combines by cartesian product.
        let mut combined: BoxOp = if branches.len() == 1 {
            branches.remove(0).0
        } else {
            let children: Vec<BoxOp> = branches.into_iter().map(|(op, _)| op).collect();
            Box::new(CartesianProduct::new(self.mapping.clone(), children))
        };

        for conjunct in remaining {
            combined = Box::new(Filter::new(self.graph.clone(), combined, conjunct));
        }
        Ok(combined)
    }

    /// Alias of the leftmost node, which anchors the pattern walk.
    fn pattern_anchor(&self, pattern: &Pattern) -> String {
        match &pattern.elements[0] {
            PatternElement::Node(n) => n.alias.clone().unwrap_or_default(),
            PatternElement::Relationship(_) => String::new(),
        }
    }

    /// Leaf scan for a pattern's anchor node.
    fn plan_scan(
        &mut self,
        pattern: &Pattern,
        aliases: &mut HashSet<String>,
    ) -> Result<BoxOp> {
        let PatternElement::Node(node) = &pattern.elements[0] else {
            return Err(Error::PlanError("pattern must start with a node".into()));
        };
        let alias = node
            .alias
            .as_deref()
            .ok_or_else(|| Error::Internal("unaliased node after normalize".into()))?;
        let slot = self.slot(alias)?;
        aliases.insert(alias.to_owned());
        self.bound.insert(alias.to_owned());

        let scan: BoxOp = match node.labels.first() {
            Some(label) => {
                // A registered index on an equality-constrained property
                // upgrades the scan.
                let indexed = node.properties.iter().find(|(key, _)| {
                    match (self.graph.label_id(label), self.graph.attr_id(key)) {
                        (Some(l), Some(a)) => self.graph.has_index(l, a),
                        _ => false,
                    }
                });
                match indexed {
                    Some((key, value)) => Box::new(IndexScan::new(
                        self.graph.clone(),
                        self.mapping.clone(),
                        slot,
                        label.clone(),
                        key.clone(),
                        Some((value.clone(), true)),
                        Some((value.clone(), true)),
                    )),
                    None => Box::new(LabelScan::new(
                        self.graph.clone(),
                        self.mapping.clone(),
                        slot,
                        label.clone(),
                    )),
                }
            }
            None => {
                Box::new(AllNodeScan::new(self.graph.clone(), self.mapping.clone(), slot))
            }
        };
        Ok(scan)
    }

    /// Chain traversals and inline filters over an anchored pattern.
    fn plan_pattern(
        &mut self,
        mut stream: BoxOp,
        pattern: &Pattern,
        aliases: &mut HashSet<String>,
        anchored_by_scan: bool,
    ) -> Result<BoxOp> {
        // Inline constraints on the anchor node.
        let PatternElement::Node(anchor) = &pattern.elements[0] else {
            return Err(Error::PlanError("pattern must start with a node".into()));
        };
        let anchor_alias = anchor.alias.clone().unwrap_or_default();
        aliases.insert(anchor_alias.clone());
        self.bound.insert(anchor_alias.clone());
        stream = self.node_constraints(stream, anchor, anchored_by_scan)?;

        let mut prev_alias = anchor_alias;
        let mut idx = 1;
        while idx + 1 < pattern.elements.len() {
            let PatternElement::Relationship(rel) = &pattern.elements[idx] else {
                return Err(Error::PlanError("malformed pattern".into()));
            };
            let PatternElement::Node(node) = &pattern.elements[idx + 1] else {
                return Err(Error::PlanError("malformed pattern".into()));
            };
            let node_alias = node
                .alias
                .clone()
                .ok_or_else(|| Error::Internal("unaliased node after normalize".into()))?;
            let rel_alias = rel.alias.clone();

            let src_slot = self.slot(&prev_alias)?;
            let dst_slot = self.slot(&node_alias)?;
            let edge_slot = match &rel_alias {
                Some(a) => Some(self.slot(a)?),
                None => None,
            };
            let dst_bound = aliases.contains(&node_alias) || self.bound.contains(&node_alias);

            stream = if let Some(vl) = &rel.var_length {
                Box::new(VarLenTraverse::new(
                    self.graph.clone(),
                    stream,
                    src_slot,
                    dst_slot,
                    edge_slot,
                    rel.rel_types.clone(),
                    rel.direction,
                    vl.min,
                    vl.max,
                ))
            } else if dst_bound {
                Box::new(ExpandInto::new(
                    self.graph.clone(),
                    stream,
                    src_slot,
                    dst_slot,
                    edge_slot,
                    rel.rel_types.clone(),
                    rel.direction,
                ))
            } else {
                Box::new(ConditionalTraverse::new(
                    self.graph.clone(),
                    stream,
                    src_slot,
                    dst_slot,
                    edge_slot,
                    rel.rel_types.clone(),
                    rel.direction,
                ))
            };

            // Inline relationship property constraints.
            if let Some(rel_alias) = &rel_alias {
                for (key, value) in sorted_props(&rel.properties) {
                    stream = Box::new(Filter::new(
                        self.graph.clone(),
                        stream,
                        prop_equals(rel_alias, key, value.clone()),
                    ));
                }
            }

            aliases.insert(node_alias.clone());
            if let Some(a) = &rel_alias {
                aliases.insert(a.clone());
                self.bound.insert(a.clone());
            }
            self.bound.insert(node_alias.clone());
            stream = self.node_constraints(stream, node, false)?;

            prev_alias = node_alias;
            idx += 2;
        }

        Ok(stream)
    }

    /// Label and property filters for a pattern node. The anchor's first
    /// label is already honoured by its scan.
    fn node_constraints(
        &mut self,
        mut stream: BoxOp,
        node: &crate::cypher::ast::NodePattern,
        is_scan_anchor: bool,
    ) -> Result<BoxOp> {
        let alias = node
            .alias
            .clone()
            .ok_or_else(|| Error::Internal("unaliased node after normalize".into()))?;
        let skip_labels = usize::from(is_scan_anchor);
        for label in node.labels.iter().skip(skip_labels) {
            stream = Box::new(Filter::new(
                self.graph.clone(),
                stream,
                Expr::HasLabel {
                    expr: Box::new(Expr::Variable(alias.clone())),
                    label: label.clone(),
                },
            ));
        }
        for (key, value) in sorted_props(&node.properties) {
            stream = Box::new(Filter::new(
                self.graph.clone(),
                stream,
                prop_equals(&alias, key, value.clone()),
            ));
        }
        Ok(stream)
    }

    // ========================================================================
    // Projection
    // ========================================================================

    fn plan_projection(
        &mut self,
        stream: Option<BoxOp>,
        items: &[ReturnItem],
        distinct: bool,
        order_by: &[crate::cypher::ast::OrderExpr],
        skip: Option<&Expr>,
        limit: Option<&Expr>,
    ) -> Result<(BoxOp, Vec<(String, usize)>)> {
        let child = self.source(stream);

        let mut columns = Vec::new();
        let mut key_items = Vec::new();
        let mut agg_items = Vec::new();
        let mut has_agg = false;

        for item in items {
            let alias = item
                .alias
                .clone()
                .ok_or_else(|| Error::Internal("unaliased item after normalize".into()))?;
            let slot = self.slot(&alias)?;
            columns.push((alias.clone(), slot));

            if item.expr.contains_aggregation() {
                has_agg = true;
                let Expr::FunctionCall { name, args, distinct: agg_distinct } =
                    &item.expr
                else {
                    return Err(Error::PlanError(
                        "aggregation must be a top-level function call".into(),
                    ));
                };
                let kind = AggKind::from_name(name).ok_or_else(|| {
                    Error::PlanError(format!("{name}() is not an aggregation"))
                })?;
                agg_items.push(AggItem {
                    kind,
                    arg: args.first().cloned(),
                    distinct: *agg_distinct,
                    slot,
                });
            } else {
                key_items.push((item.expr.clone(), slot));
            }
            self.bound.insert(alias);
        }

        let mut stream: BoxOp = if has_agg {
            Box::new(Aggregate::new(
                self.graph.clone(),
                child,
                self.mapping.clone(),
                key_items,
                agg_items,
            ))
        } else {
            Box::new(Project::new(self.graph.clone(), child, key_items))
        };

        if distinct {
            let key_slots: Vec<usize> = columns.iter().map(|(_, s)| *s).collect();
            stream = Box::new(Distinct::new(stream, key_slots));
        }

        let skip_n = match skip {
            Some(e) => Some(const_usize(e, "SKIP")?),
            None => None,
        };
        let limit_n = match limit {
            Some(e) => Some(const_usize(e, "LIMIT")?),
            None => None,
        };

        if !order_by.is_empty() {
            let sort_items: Vec<SortItem> = order_by
                .iter()
                .map(|o| {
                    // Above an aggregate only the projected slots are
                    // populated, so a sort key that names a projection
                    // item is rewritten to its output alias.
                    let expr = if has_agg {
                        let label = expr_label(&o.expr);
                        match columns.iter().find(|(name, _)| *name == label) {
                            Some((name, _)) => Expr::Variable(name.clone()),
                            None => o.expr.clone(),
                        }
                    } else {
                        o.expr.clone()
                    };
                    SortItem { expr, ascending: o.ascending }
                })
                .collect();
            stream = Box::new(Sort::new(
                self.graph.clone(),
                stream,
                sort_items,
                skip_n.unwrap_or(0),
                limit_n,
            ));
        } else {
            if let Some(n) = skip_n {
                stream = Box::new(SkipOp::new(stream, n));
            }
            if let Some(n) = limit_n {
                stream = Box::new(LimitOp::new(stream, n));
            }
        }

        Ok((stream, columns))
    }

    // ========================================================================
    // Mutation specs
    // ========================================================================

    fn create_spec(&mut self, patterns: &[Pattern]) -> Result<CreateSpec> {
        let mut spec = CreateSpec::default();
        for pattern in patterns {
            let mut prev: Option<(String, usize)> = None;
            let mut idx = 0;
            while idx < pattern.elements.len() {
                let PatternElement::Node(node) = &pattern.elements[idx] else {
                    return Err(Error::PlanError("malformed CREATE pattern".into()));
                };
                let alias = node.alias.clone().ok_or_else(|| {
                    Error::Internal("unaliased node after normalize".into())
                })?;
                let slot = self.slot(&alias)?;
                let bound = self.bound.contains(&alias)
                    || spec.nodes.iter().any(|n| n.slot == slot);
                spec.nodes.push(NodeCreateSpec {
                    slot,
                    bound,
                    labels: node.labels.clone(),
                    props: sorted_props(&node.properties)
                        .into_iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                });
                self.bound.insert(alias.clone());

                if idx > 0 {
                    let PatternElement::Relationship(rel) = &pattern.elements[idx - 1]
                    else {
                        return Err(Error::PlanError("malformed CREATE pattern".into()));
                    };
                    if rel.var_length.is_some() {
                        return Err(Error::PlanError(
                            "variable-length relationships cannot be created".into(),
                        ));
                    }
                    let rel_type = rel.rel_types.first().cloned().ok_or_else(|| {
                        Error::SchemaError(
                            "CREATE requires a relationship type".into(),
                        )
                    })?;
                    let (prev_alias, prev_slot) = prev.clone().ok_or_else(|| {
                        Error::PlanError("malformed CREATE pattern".into())
                    })?;
                    let _ = prev_alias;
                    let (src_slot, dst_slot) = match rel.direction {
                        PatternDirection::Left => (slot, prev_slot),
                        // An undirected CREATE defaults to left-to-right.
                        _ => (prev_slot, slot),
                    };
                    let edge_slot = match &rel.alias {
                        Some(a) => {
                            self.bound.insert(a.clone());
                            Some(self.slot(a)?)
                        }
                        None => None,
                    };
                    spec.edges.push(EdgeCreateSpec {
                        slot: edge_slot,
                        src_slot,
                        dst_slot,
                        rel_type,
                        props: sorted_props(&rel.properties)
                            .into_iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    });
                }

                prev = Some((alias, slot));
                idx += 2;
            }
        }
        Ok(spec)
    }

    fn plan_merge(
        &mut self,
        stream: Option<BoxOp>,
        pattern: &Pattern,
        on_create: &[SetItem],
        on_match: &[SetItem],
    ) -> Result<BoxOp> {
        // The embedded matcher is self-contained; patterns referencing
        // outer bindings are beyond this planner.
        let mut vars = Vec::new();
        for element in &pattern.elements {
            if let PatternElement::Node(n) = element {
                if let Some(a) = &n.alias {
                    if self.bound.contains(a) {
                        vars.push(a.clone());
                    }
                }
            }
        }
        if !vars.is_empty() {
            return Err(Error::PlanError(format!(
                "MERGE pattern reuses bound variables: {}",
                vars.join(", ")
            )));
        }

        // The matcher walk binds the pattern aliases; restore the
        // outer binding set before deriving the creation spec, or every
        // node would look pre-bound and creation would be skipped.
        let saved_bound = self.bound.clone();
        let mut matcher_aliases = HashSet::new();
        let scan = self.plan_scan(pattern, &mut matcher_aliases)?;
        let matcher = self.plan_pattern(scan, pattern, &mut matcher_aliases, true)?;
        self.bound = saved_bound;

        let create_spec = self.create_spec(std::slice::from_ref(pattern))?;
        let on_create = self.update_items(on_create)?;
        let on_match = self.update_items(on_match)?;

        let child = self.source(stream);
        Ok(Box::new(Merge::new(
            self.graph.clone(),
            child,
            matcher,
            create_spec,
            on_create,
            on_match,
        )))
    }

    fn update_items(&mut self, items: &[SetItem]) -> Result<Vec<UpdateItem>> {
        items
            .iter()
            .map(|item| {
                Ok(match item {
                    SetItem::Property { variable, key, value } => UpdateItem::SetProp {
                        slot: self.slot(variable)?,
                        key: key.clone(),
                        value: value.clone(),
                    },
                    SetItem::AllProperties { variable, value } => {
                        UpdateItem::SetAllProps {
                            slot: self.slot(variable)?,
                            value: value.clone(),
                            merge: false,
                        }
                    }
                    SetItem::MergeProperties { variable, value } => {
                        UpdateItem::SetAllProps {
                            slot: self.slot(variable)?,
                            value: value.clone(),
                            merge: true,
                        }
                    }
                    SetItem::Label { variable, label } => UpdateItem::AddLabel {
                        slot: self.slot(variable)?,
                        label: label.clone(),
                    },
                })
            })
            .collect()
    }

    fn remove_items(&mut self, items: &[RemoveItem]) -> Result<Vec<UpdateItem>> {
        items
            .iter()
            .map(|item| {
                Ok(match item {
                    RemoveItem::Property { variable, key } => UpdateItem::RemoveProp {
                        slot: self.slot(variable)?,
                        key: key.clone(),
                    },
                    RemoveItem::Label { variable, label } => UpdateItem::RemoveLabel {
                        slot: self.slot(variable)?,
                        label: label.clone(),
                    },
                })
            })
            .collect()
    }
}

// ============================================================================
// Expression helpers
// ============================================================================

fn split_conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::BinaryOp { left, op: crate::cypher::ast::BinaryOp::And, right } => {
            split_conjuncts(left, out);
            split_conjuncts(right, out);
        }
        other => out.push(other.clone()),
    }
}

/// A single-step equality chain: `lhs = rhs`.
fn as_equality(expr: &Expr) -> Option<(&Expr, &Expr)> {
    match expr {
        Expr::Comparison { first, rest }
            if rest.len() == 1 && rest[0].0 == crate::cypher::ast::CompOp::Eq =>
        {
            Some((first, &rest[0].1))
        }
        _ => None,
    }
}

fn prop_equals(alias: &str, key: &str, value: Expr) -> Expr {
    Expr::Comparison {
        first: Box::new(Expr::Property {
            expr: Box::new(Expr::Variable(alias.to_owned())),
            key: key.to_owned(),
        }),
        rest: vec![(crate::cypher::ast::CompOp::Eq, value)],
    }
}

/// Deterministic iteration over pattern property maps.
fn sorted_props(map: &hashbrown::HashMap<String, Expr>) -> Vec<(&String, &Expr)> {
    let mut entries: Vec<(&String, &Expr)> = map.iter().collect();
    entries.sort_by_key(|(k, _)| k.as_str());
    entries
}

/// SKIP and LIMIT take non-negative integer literals or parameters
/// resolved before planning.
fn const_usize(expr: &Expr, what: &str) -> Result<usize> {
    match expr {
        Expr::Literal(crate::cypher::ast::Literal::Int(i)) if *i >= 0 => Ok(*i as usize),
        _ => Err(Error::PlanError(format!(
            "{what} requires a non-negative integer literal"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher;

    fn plan_for(graph: &Arc<Graph>, query: &str) -> Result<ExecutionPlan> {
        let stmt = cypher::parse(query)?;
        build(graph, &stmt)
    }

    fn rendered(graph: &Arc<Graph>, query: &str) -> String {
        plan_for(graph, query).unwrap().render().join("\n")
    }

    #[test]
    fn test_label_scan_plan() {
        let graph = Arc::new(Graph::new("plan"));
        let out = rendered(&graph, "MATCH (n:Person) RETURN n");
        assert!(out.contains("LabelScan"));
        assert!(out.starts_with("Results"));
        assert!(out.contains("Project"));
    }

    #[test]
    fn test_all_node_scan_without_label() {
        let graph = Arc::new(Graph::new("plan"));
        let out = rendered(&graph, "MATCH (n) RETURN n");
        assert!(out.contains("AllNodeScan"));
    }

    #[test]
    fn test_traverse_plan() {
        let graph = Arc::new(Graph::new("plan"));
        let out = rendered(&graph, "MATCH (a:P)-[:R]->(b:P) RETURN a, b");
        assert!(out.contains("ConditionalTraverse"));
    }

    #[test]
    fn test_disconnected_equality_becomes_hash_join() {
        let graph = Arc::new(Graph::new("plan"));
        let out = rendered(
            &graph,
            "MATCH (a:A), (b:B) WHERE a.k = b.k RETURN a.k",
        );
        assert!(out.contains("ValueHashJoin"), "{out}");
        assert!(!out.contains("CartesianProduct"), "{out}");
    }

    #[test]
    fn test_disconnected_without_equality_is_cartesian() {
        let graph = Arc::new(Graph::new("plan"));
        let out = rendered(&graph, "MATCH (a:A), (b:B) RETURN a, b");
        assert!(out.contains("CartesianProduct"), "{out}");
    }

    #[test]
    fn test_aggregation_plan() {
        let graph = Arc::new(Graph::new("plan"));
        let out = rendered(&graph, "MATCH (n) RETURN count(*)");
        assert!(out.contains("Aggregate"));
        assert!(!out.contains("Project"));
    }

    #[test]
    fn test_order_by_folds_skip_limit_into_sort() {
        let graph = Arc::new(Graph::new("plan"));
        let out = rendered(
            &graph,
            "MATCH (n:N) RETURN n.v ORDER BY n.v DESC SKIP 1 LIMIT 2",
        );
        assert!(out.contains("Sort"));
        assert!(!out.contains("Limit"), "{out}");
        assert!(!out.contains("Skip"), "{out}");
    }

    #[test]
    fn test_columns_use_aliases() {
        let graph = Arc::new(Graph::new("plan"));
        let plan = plan_for(&graph, "MATCH (n:P) RETURN n.name AS name, n.age").unwrap();
        let names: Vec<&String> = plan.columns.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["name", "n.age"]);
    }

    #[test]
    fn test_var_len_plan() {
        let graph = Arc::new(Graph::new("plan"));
        let out = rendered(&graph, "MATCH (a)-[:R*1..3]->(b) RETURN b");
        assert!(out.contains("VarLenTraverse"));
    }

    #[test]
    fn test_optional_match_rejected() {
        let graph = Arc::new(Graph::new("plan"));
        assert!(matches!(
            plan_for(&graph, "OPTIONAL MATCH (n) RETURN n"),
            Err(Error::PlanError(_))
        ));
    }

    #[test]
    fn test_unbound_variable_rejected() {
        let graph = Arc::new(Graph::new("plan"));
        assert!(plan_for(&graph, "MATCH (n) DELETE m RETURN n").is_err());
    }

    #[test]
    fn test_union_requires_matching_columns() {
        let graph = Arc::new(Graph::new("plan"));
        assert!(plan_for(&graph, "RETURN 1 AS x UNION RETURN 2 AS y").is_err());
        let plan = plan_for(&graph, "RETURN 1 AS x UNION RETURN 2 AS x").unwrap();
        assert!(plan.render().join("\n").contains("Union"));
    }
}
