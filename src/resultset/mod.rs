//! # Result Set
//!
//! Accumulates the records emitted by the plan root, formats them for
//! the wire (verbose or compact), and carries the mutation statistics
//! trailer. Rows live in the same block allocator the entity store
//! uses, so accumulation never reallocates existing rows.

pub mod formatters;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::graph::Graph;
use crate::record::Record;
use crate::store::block::BlockStore;
use formatters::{compact_value, verbose_value, StringPool};

/// Output format of a query reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Verbose,
    Compact,
    /// No rows; statistics only.
    None,
}

/// Mutation statistics accumulated on the query context and committed
/// with the flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSetStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    pub indices_created: u64,
    pub cached_execution: bool,
}

impl ResultSetStats {
    /// True when any counter records a data change.
    pub fn changed(&self) -> bool {
        self.nodes_created != 0
            || self.nodes_deleted != 0
            || self.relationships_created != 0
            || self.relationships_deleted != 0
            || self.properties_set != 0
            || self.labels_added != 0
            || self.labels_removed != 0
            || self.indices_created != 0
    }
}

/// The structured query reply: headers, formatted rows, statistics.
/// Trivially serialisable to any wire transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub columns: Vec<String>,
    pub rows: Vec<Json>,
    /// Compact format only: the per-query string pool the row payloads
    /// index into. Empty in verbose replies.
    pub string_pool: Vec<String>,
    pub stats: ResultSetStats,
    pub execution_time_ms: u64,
}

/// Accumulates and formats result rows.
pub struct ResultSet {
    graph: Arc<Graph>,
    format: Format,
    columns: Vec<String>,
    /// Record slot backing each column.
    column_map: Vec<usize>,
    cells: BlockStore<Record>,
    row_cap: Option<u64>,
    pool: StringPool,
    sink: Option<std::sync::mpsc::Sender<Json>>,
    streamed_rows: u64,
}

impl ResultSet {
    pub fn new(
        graph: Arc<Graph>,
        format: Format,
        columns: Vec<(String, usize)>,
        row_cap: Option<u64>,
    ) -> Self {
        let (names, map) = columns.into_iter().unzip();
        Self {
            graph,
            format,
            columns: names,
            column_map: map,
            cells: BlockStore::new(),
            row_cap,
            pool: StringPool::default(),
            sink: None,
            streamed_rows: 0,
        }
    }

    /// Switch to streaming: each formatted row is sent down the channel
    /// as it is produced instead of buffered.
    pub fn stream_to(&mut self, sink: std::sync::mpsc::Sender<Json>) {
        self.sink = Some(sink);
    }

    pub fn row_count(&self) -> u64 {
        self.cells.len() + self.streamed_rows
    }

    /// Add a record. Returns false once the configured row cap is hit,
    /// which tells the results operator to stop pulling.
    pub fn add_record(&mut self, record: Record) -> bool {
        if let Some(cap) = self.row_cap {
            if self.row_count() >= cap {
                return false;
            }
        }
        if self.format == Format::None {
            self.streamed_rows += 1;
            return true;
        }
        if let Some(sink) = self.sink.clone() {
            let row = self.format_row(&record);
            // A hung-up receiver just drops rows; the trailer still
            // reports the count.
            let _ = sink.send(row);
            self.streamed_rows += 1;
        } else {
            self.cells.push(record);
        }
        true
    }

    fn format_row(&mut self, record: &Record) -> Json {
        let cols: Vec<Json> = self
            .column_map
            .iter()
            .map(|&idx| {
                let v = record.get(idx);
                match self.format {
                    Format::Compact => compact_value(&self.graph, &mut self.pool, &v),
                    _ => verbose_value(&self.graph, &v),
                }
            })
            .collect();
        Json::Array(cols)
    }

    /// Format everything accumulated and build the reply.
    pub fn finish(mut self, stats: ResultSetStats, execution_time_ms: u64) -> Reply {
        let mut rows = Vec::with_capacity(self.cells.len() as usize);
        if self.format != Format::None {
            let records: Vec<Record> = {
                let mut out = Vec::with_capacity(self.cells.len() as usize);
                for (_, r) in self.cells.iter() {
                    out.push(r.clone());
                }
                out
            };
            for r in &records {
                let row = self.format_row(r);
                rows.push(row);
            }
        }
        Reply {
            columns: self.columns,
            rows,
            string_pool: self.pool.into_strings(),
            stats,
            execution_time_ms,
        }
    }
}
