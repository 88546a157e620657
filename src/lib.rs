//! # matrixgraph — Property Graphs over Sparse Matrix Algebra
//!
//! A property-graph database whose storage engine is sparse boolean
//! matrix algebra: one diagonal label matrix per label, one relation
//! matrix per relationship type, one adjacency matrix per graph, a
//! hexastore triplet index for edge identity, and a pull-based operator
//! pipeline executing a Cypher subset on top.
//!
//! ## Quick start
//!
//! ```rust
//! use matrixgraph::{Format, Server};
//!
//! # fn example() -> matrixgraph::Result<()> {
//! let server = Server::new();
//! server.execute(
//!     "social",
//!     "CREATE (:Person {name: 'Ada', age: 30})",
//!     Format::None,
//! )?;
//! let reply = server.execute(
//!     "social",
//!     "MATCH (p:Person) RETURN p.name, p.age",
//!     Format::Verbose,
//! )?;
//! assert_eq!(reply.columns, vec!["p.name", "p.age"]);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Concurrency
//!
//! Execution is single-threaded pull per query; a server may run many
//! queries concurrently, each on its own thread. Readers share the
//! per-graph latch; a writer executes under the upgradable mode and
//! upgrades to exclusive only for the commit flush, when every staged
//! matrix update materialises atomically. Cancelled or failed writers
//! roll back — partial writes never escape.

pub mod algebra;
pub mod cypher;
pub mod expr;
pub mod graph;
pub mod hexastore;
pub mod model;
pub mod ops;
pub mod plan;
pub mod query_ctx;
pub mod record;
pub mod resultset;
pub mod store;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::lock_api::RwLockUpgradableReadGuard;
use parking_lot::RwLock;
use tracing::debug;

pub use graph::{Graph, ReadView};
pub use model::{
    AttrId, Edge, EdgeId, LabelId, Node, NodeId, PathValue, RelTypeId, Value,
    INVALID_ID,
};
pub use query_ctx::{LatchMode, QueryCtx};
pub use record::{AliasMap, Record};
pub use resultset::{Format, Reply, ResultSet, ResultSetStats};

use cypher::ast::{SchemaCommand, Statement};
use graph::snapshot::GraphSnapshot;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },

    #[error("Semantic error: {0}")]
    SemanticError(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Entity missing: {0}")]
    EntityMissing(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Concurrent write conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Planning error: {0}")]
    PlanError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the client may safely retry the query as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Query options
// ============================================================================

/// Per-call execution options beyond the output format.
#[derive(Default)]
pub struct QueryOptions {
    pub format: Format,
    pub params: HashMap<String, Value>,
    /// Cancellation flag shared with the caller; flip it to abort
    /// between operator pulls.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Stop accumulating after this many rows.
    pub row_cap: Option<u64>,
    /// Streaming mode: formatted rows go down this channel as
    /// produced; the reply carries only the trailer.
    pub stream: Option<std::sync::mpsc::Sender<serde_json::Value>>,
    /// Record the per-operator kernel trace on the context.
    pub burble: bool,
}

impl QueryOptions {
    pub fn format(format: Format) -> Self {
        Self { format, ..Default::default() }
    }
}

/// How long a writer waits for the upgradable latch before giving up
/// with a retryable conflict.
const WRITER_LATCH_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Server
// ============================================================================

/// Owns all named graphs and exposes the query API. Graphs come into
/// existence on first use.
#[derive(Default)]
pub struct Server {
    graphs: RwLock<HashMap<String, Arc<Graph>>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create a graph by name.
    pub fn graph(&self, name: &str) -> Arc<Graph> {
        if let Some(g) = self.graphs.read().get(name) {
            return g.clone();
        }
        let mut graphs = self.graphs.write();
        graphs
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Graph::new(name)))
            .clone()
    }

    pub fn get_graph(&self, name: &str) -> Option<Arc<Graph>> {
        self.graphs.read().get(name).cloned()
    }

    /// Drop a graph entirely. Returns false if it never existed.
    pub fn delete_graph(&self, name: &str) -> bool {
        self.graphs.write().remove(name).is_some()
    }

    pub fn graph_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.graphs.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ========================================================================
    // Query API
    // ========================================================================

    /// The single entry point: parse, plan, execute, format.
    pub fn execute(&self, graph_name: &str, query: &str, format: Format) -> Result<Reply> {
        self.execute_opts(graph_name, query, QueryOptions::format(format))
    }

    /// Read-only entry point: rejects writing queries without touching
    /// the write latch.
    pub fn read_only(&self, graph_name: &str, query: &str, format: Format) -> Result<Reply> {
        let stmt = cypher::parse(query)?;
        if !stmt.is_read_only() {
            return Err(Error::SemanticError(
                "write query submitted on the read-only endpoint".into(),
            ));
        }
        self.run(graph_name, stmt, QueryOptions::format(format))
    }

    pub fn execute_opts(
        &self,
        graph_name: &str,
        query: &str,
        opts: QueryOptions,
    ) -> Result<Reply> {
        let stmt = cypher::parse(query)?;
        self.run(graph_name, stmt, opts)
    }

    /// Textual operator-tree dump without executing.
    pub fn explain(&self, graph_name: &str, query: &str) -> Result<Vec<String>> {
        let stmt = cypher::parse(query)?;
        if let Statement::Schema(_) = stmt {
            return Ok(vec!["SchemaCommand".into()]);
        }
        let graph = self.graph(graph_name);
        let _latch = graph.latch().read();
        Ok(plan::build(&graph, &stmt)?.render())
    }

    /// Persisted form of a graph, captured under the exclusive latch.
    pub fn checkpoint(&self, graph_name: &str) -> Result<GraphSnapshot> {
        let graph = self
            .get_graph(graph_name)
            .ok_or_else(|| Error::SchemaError(format!("no such graph: {graph_name}")))?;
        let _latch = graph.latch().write();
        Ok(graph.checkpoint())
    }

    /// Rebuild a graph from a snapshot, replacing any existing graph of
    /// that name.
    pub fn restore(&self, graph_name: &str, snapshot: &GraphSnapshot) {
        let graph = Arc::new(Graph::restore(graph_name, snapshot));
        self.graphs.write().insert(graph_name.to_owned(), graph);
    }

    // ========================================================================
    // Execution core
    // ========================================================================

    fn run(&self, graph_name: &str, stmt: Statement, opts: QueryOptions) -> Result<Reply> {
        let graph = self.graph(graph_name);

        if let Statement::Schema(cmd) = &stmt {
            return self.run_schema(&graph, cmd, &opts);
        }

        let mut ctx = QueryCtx::with_params(opts.params.clone());
        if let Some(flag) = opts.cancel.clone() {
            ctx.use_cancel_flag(flag);
        }
        if opts.burble {
            ctx.enable_burble();
        }

        if stmt.is_read_only() {
            let latch = graph.latch().read();
            ctx.set_latch_mode(LatchMode::Read);
            ctx.set_snapshot_horizons(graph.node_count(), graph.edge_size());

            let result = self.pull(&graph, &stmt, &mut ctx, &opts);
            drop(latch);
            result
        } else {
            // Writers execute under the upgradable latch (concurrent
            // with readers, serialised among themselves) and upgrade to
            // exclusive only for the flush.
            let latch = graph
                .latch()
                .try_upgradable_read_for(WRITER_LATCH_TIMEOUT)
                .ok_or_else(|| {
                    Error::ConcurrencyConflict(
                        "timed out waiting for the write latch".into(),
                    )
                })?;
            ctx.set_latch_mode(LatchMode::Write);

            match self.pull(&graph, &stmt, &mut ctx, &opts) {
                Ok(reply) => {
                    let exclusive = RwLockUpgradableReadGuard::upgrade(latch);
                    graph.flush();
                    drop(exclusive);
                    Ok(reply)
                }
                Err(err) => {
                    // Discard staged updates; nothing partial escapes.
                    graph.rollback();
                    drop(latch);
                    debug!(graph = graph_name, error = %err, "write query aborted");
                    Err(err)
                }
            }
        }
    }

    fn pull(
        &self,
        graph: &Arc<Graph>,
        stmt: &Statement,
        ctx: &mut QueryCtx,
        opts: &QueryOptions,
    ) -> Result<Reply> {
        let mut plan = plan::build(graph, stmt)?;
        let format = if plan.columns.is_empty() {
            Format::None
        } else {
            opts.format
        };
        let mut resultset = ResultSet::new(
            graph.clone(),
            format,
            plan.columns.clone(),
            opts.row_cap,
        );
        if let Some(sink) = &opts.stream {
            resultset.stream_to(sink.clone());
        }

        // Operators propagate failures to the root; the root records
        // them on the context and surfaces exactly one error reply.
        if let Err(err) = plan.root.run(ctx, &mut resultset) {
            ctx.set_error(err);
        }
        if let Some(err) = ctx.take_error() {
            return Err(err);
        }
        Ok(resultset.finish(ctx.stats, ctx.elapsed_ms()))
    }

    fn run_schema(
        &self,
        graph: &Arc<Graph>,
        cmd: &SchemaCommand,
        _opts: &QueryOptions,
    ) -> Result<Reply> {
        let mut stats = ResultSetStats::default();
        // Schema changes take the exclusive latch directly.
        let _latch = graph.latch().write();
        match cmd {
            SchemaCommand::CreateIndex { label, property } => {
                let label = graph.label_id_or_create(label);
                let attr = graph.attr_id_or_create(property);
                if graph.add_index(label, attr) {
                    stats.indices_created += 1;
                }
            }
            SchemaCommand::DropIndex { label, property } => {
                let (Some(label), Some(attr)) =
                    (graph.label_id(label), graph.attr_id(property))
                else {
                    return Err(Error::SchemaError(format!(
                        "no such index: {label}({property})"
                    )));
                };
                if !graph.drop_index(label, attr) {
                    return Err(Error::SchemaError(format!(
                        "no such index: {}({})",
                        graph.label_name(label).unwrap_or_default(),
                        graph.attr_name(attr).unwrap_or_default(),
                    )));
                }
            }
        }
        Ok(Reply {
            columns: Vec::new(),
            rows: Vec::new(),
            string_pool: Vec::new(),
            stats,
            execution_time_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_create_on_first_use() {
        let server = Server::new();
        assert!(server.get_graph("g").is_none());
        server.graph("g");
        assert!(server.get_graph("g").is_some());
        assert!(server.delete_graph("g"));
        assert!(!server.delete_graph("g"));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let server = Server::new();
        let err = server
            .read_only("g", "CREATE (n:X)", Format::Verbose)
            .unwrap_err();
        assert!(matches!(err, Error::SemanticError(_)));
    }

    #[test]
    fn test_schema_command_creates_index() {
        let server = Server::new();
        let reply = server
            .execute("g", "CREATE INDEX ON :Person(age)", Format::Verbose)
            .unwrap();
        assert_eq!(reply.stats.indices_created, 1);
        // Idempotent: second create registers nothing new.
        let reply = server
            .execute("g", "CREATE INDEX ON :Person(age)", Format::Verbose)
            .unwrap();
        assert_eq!(reply.stats.indices_created, 0);
    }
}
