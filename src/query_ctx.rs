//! Per-query context: latch mode, error slot, statistics, timing,
//! cancellation, and the optional burble trace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;

use crate::graph::ReadView;
use crate::model::Value;
use crate::resultset::ResultSetStats;
use crate::Error;

/// Which latch the query holds on its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatchMode {
    #[default]
    None,
    Read,
    Write,
}

/// Scoped state for a single query execution.
#[derive(Debug)]
pub struct QueryCtx {
    /// Mutation statistics, committed with the flush.
    pub stats: ResultSetStats,
    /// Query parameters (`$name`).
    pub params: HashMap<String, Value>,
    latch: LatchMode,
    /// Entity ids allocated at or after these points are invisible to a
    /// reading query; set when the latch is acquired.
    node_horizon: u64,
    edge_horizon: u64,
    error: Option<Error>,
    cancelled: Arc<AtomicBool>,
    burble: Option<Vec<String>>,
    started: Instant,
}

impl Default for QueryCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCtx {
    pub fn new() -> Self {
        Self {
            stats: ResultSetStats::default(),
            params: HashMap::new(),
            latch: LatchMode::None,
            node_horizon: u64::MAX,
            edge_horizon: u64::MAX,
            error: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            burble: None,
            started: Instant::now(),
        }
    }

    pub fn with_params(params: HashMap<String, Value>) -> Self {
        Self { params, ..Self::new() }
    }

    // ========================================================================
    // Latch
    // ========================================================================

    pub fn latch_mode(&self) -> LatchMode {
        self.latch
    }

    pub fn set_latch_mode(&mut self, mode: LatchMode) {
        self.latch = mode;
    }

    /// A writing query sees its own staged matrix updates; readers see
    /// only the materialised snapshot.
    pub fn sees_pending(&self) -> bool {
        self.latch == LatchMode::Write
    }

    pub fn set_snapshot_horizons(&mut self, node_horizon: u64, edge_horizon: u64) {
        self.node_horizon = node_horizon;
        self.edge_horizon = edge_horizon;
    }

    /// How graph reads reconcile staged state for this query.
    pub fn read_view(&self) -> ReadView {
        if self.sees_pending() {
            ReadView::writer()
        } else {
            ReadView::reader(self.node_horizon, self.edge_horizon)
        }
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Record the first error; later errors are dropped, matching the
    /// single-error-reply contract.
    pub fn set_error(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Shareable flag a client can flip between `consume` calls.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Adopt an externally owned cancellation flag (e.g. one handed to
    /// the client before the query started).
    pub fn use_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancelled = flag;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Row-granularity check used by operators.
    pub fn check_cancelled(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Burble trace
    // ========================================================================

    pub fn enable_burble(&mut self) {
        if self.burble.is_none() {
            self.burble = Some(Vec::new());
        }
    }

    /// Record a kernel-firing trace line. Off by default.
    pub fn burble(&mut self, msg: impl FnOnce() -> String) {
        if let Some(buf) = self.burble.as_mut() {
            let line = msg();
            tracing::trace!(target: "matrixgraph::burble", "{line}");
            buf.push(line);
        }
    }

    pub fn burble_lines(&self) -> &[String] {
        self.burble.as_deref().unwrap_or(&[])
    }

    // ========================================================================
    // Timing
    // ========================================================================

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let mut ctx = QueryCtx::new();
        ctx.set_error(Error::RuntimeError("first".into()));
        ctx.set_error(Error::RuntimeError("second".into()));
        match ctx.take_error() {
            Some(Error::RuntimeError(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_flag_is_shared() {
        let ctx = QueryCtx::new();
        let handle = ctx.cancel_handle();
        assert!(ctx.check_cancelled().is_ok());
        handle.store(true, Ordering::Relaxed);
        assert!(matches!(ctx.check_cancelled(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_burble_off_by_default() {
        let mut ctx = QueryCtx::new();
        ctx.burble(|| "should not allocate".into());
        assert!(ctx.burble_lines().is_empty());
        ctx.enable_burble();
        ctx.burble(|| "fired".into());
        assert_eq!(ctx.burble_lines().len(), 1);
    }
}
