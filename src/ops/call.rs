//! Procedure call operator and the built-in procedure registry.

use std::sync::Arc;

use crate::cypher::ast::Expr;
use crate::graph::Graph;
use crate::model::{NodeId, Value};
use crate::query_ctx::QueryCtx;
use crate::record::Record;
use crate::{Error, Result};

use super::{eval, BoxOp, OpState, Operator};

/// Rows yielded by a procedure.
pub struct ProcedureResult {
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<Value>>,
}

/// Column names a procedure yields, for plan-time validation.
pub fn procedure_columns(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "db.labels" => Some(&["label"]),
        "db.relationshipTypes" => Some(&["relationshipType"]),
        "db.propertyKeys" => Some(&["propertyKey"]),
        "algo.shortestPath" => Some(&["cost"]),
        _ => None,
    }
}

/// Invoke a registered procedure.
pub fn invoke(graph: &Graph, name: &str, args: &[Value]) -> Result<ProcedureResult> {
    match name {
        "db.labels" => Ok(ProcedureResult {
            columns: vec!["label"],
            rows: graph
                .label_names()
                .into_iter()
                .map(|l| vec![Value::String(l)])
                .collect(),
        }),
        "db.relationshipTypes" => Ok(ProcedureResult {
            columns: vec!["relationshipType"],
            rows: graph
                .rel_type_names()
                .into_iter()
                .map(|t| vec![Value::String(t)])
                .collect(),
        }),
        "db.propertyKeys" => Ok(ProcedureResult {
            columns: vec!["propertyKey"],
            rows: graph
                .attr_names()
                .into_iter()
                .map(|k| vec![Value::String(k)])
                .collect(),
        }),
        "algo.shortestPath" => {
            let src = args
                .first()
                .and_then(Value::as_int)
                .ok_or_else(|| {
                    Error::TypeError {
                        expected: "source node id".into(),
                        got: "missing or non-integer".into(),
                    }
                })?;
            let dst = args
                .get(1)
                .and_then(Value::as_int)
                .ok_or_else(|| {
                    Error::TypeError {
                        expected: "target node id".into(),
                        got: "missing or non-integer".into(),
                    }
                })?;
            let cost =
                graph.shortest_path_cost(NodeId(src as u64), NodeId(dst as u64));
            // Unreachable targets cost +∞.
            Ok(ProcedureResult {
                columns: vec!["cost"],
                rows: vec![vec![Value::Double(cost)]],
            })
        }
        _ => Err(Error::SchemaError(format!("Unknown procedure: {name}"))),
    }
}

/// `CALL name(args) YIELD cols` — one output record per yielded row.
pub struct ProcedureCall {
    graph: Arc<Graph>,
    child: BoxOp,
    name: String,
    args: Vec<Expr>,
    /// (column index in procedure output, record slot).
    yields: Vec<(usize, usize)>,
    current: Option<(Record, Vec<Vec<Value>>, usize)>,
    state: OpState,
}

impl ProcedureCall {
    pub fn new(
        graph: Arc<Graph>,
        child: BoxOp,
        name: String,
        args: Vec<Expr>,
        yields: Vec<(usize, usize)>,
    ) -> Self {
        Self {
            graph,
            child,
            name,
            args,
            yields,
            current: None,
            state: OpState::Uninit,
        }
    }
}

impl Operator for ProcedureCall {
    fn name(&self) -> &'static str {
        "ProcedureCall"
    }

    fn init(&mut self, ctx: &mut QueryCtx) -> Result<()> {
        self.child.init(ctx)?;
        self.current = None;
        self.state = OpState::Init;
        Ok(())
    }

    fn consume(&mut self, ctx: &mut QueryCtx) -> Result<Option<Record>> {
        ctx.check_cancelled()?;
        self.state = OpState::Producing;
        loop {
            if let Some((record, rows, cursor)) = self.current.as_mut() {
                if *cursor < rows.len() {
                    let row = &rows[*cursor];
                    *cursor += 1;
                    let mut out = record.clone();
                    for &(col, slot) in &self.yields {
                        out.set(slot, row.get(col).cloned().unwrap_or(Value::Null));
                    }
                    return Ok(Some(out));
                }
                self.current = None;
            }

            let Some(record) = self.child.consume(ctx)? else {
                self.state = OpState::Exhausted;
                return Ok(None);
            };
            let args = self
                .args
                .iter()
                .map(|e| eval(&self.graph, ctx, e, &record))
                .collect::<Result<Vec<Value>>>()?;
            let result = invoke(&self.graph, &self.name, &args)?;
            ctx.burble(|| {
                format!("ProcedureCall {} yielded {} rows", self.name, result.rows.len())
            });
            self.current = Some((record, result.rows, 0));
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.current = None;
        self.child.reset()?;
        self.state = OpState::Init;
        Ok(())
    }

    fn clone_op(&self) -> BoxOp {
        Box::new(ProcedureCall::new(
            self.graph.clone(),
            self.child.clone_op(),
            self.name.clone(),
            self.args.clone(),
            self.yields.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn Operator> {
        vec![self.child.as_ref()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_labels() {
        let graph = Graph::new("proc");
        graph.label_id_or_create("Person");
        graph.label_id_or_create("City");
        let out = invoke(&graph, "db.labels", &[]).unwrap();
        assert_eq!(out.columns, vec!["label"]);
        assert_eq!(out.rows.len(), 2);
    }

    #[test]
    fn test_unknown_procedure() {
        let graph = Graph::new("proc");
        assert!(matches!(
            invoke(&graph, "db.nope", &[]),
            Err(Error::SchemaError(_))
        ));
    }

    #[test]
    fn test_shortest_path_unreachable_is_infinite() {
        let graph = Graph::new("proc");
        let r = graph.rel_type_id_or_create("R");
        let a = graph.create_node(&[], vec![]);
        let b = graph.create_node(&[], vec![]);
        let c = graph.create_node(&[], vec![]);
        graph.create_edge(a, b, r, vec![]).unwrap();
        graph.flush();

        let reach = invoke(&graph, "algo.shortestPath", &[Value::Int(0), Value::Int(1)])
            .unwrap();
        assert_eq!(reach.rows[0][0], Value::Double(1.0));

        let unreach =
            invoke(&graph, "algo.shortestPath", &[Value::Int(0), Value::Int(2)]).unwrap();
        assert_eq!(unreach.rows[0][0], Value::Double(f64::INFINITY));
        let _ = c;
    }
}
