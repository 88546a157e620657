//! Record: the fixed-width, alias-indexed row passed between operators.
//!
//! Every record in a plan shares one [`AliasMap`] by reference, so slot
//! layout is decided once at plan-build time and lookups by alias are a
//! single map probe.

use std::sync::Arc;

use hashbrown::HashMap;
use xxhash_rust::xxh64::Xxh64;

use crate::model::{Edge, Node, Value};

/// Alias → slot-index mapping, built by the planner and shared by every
/// record of the plan.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    slots: HashMap<String, usize>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for the alias, returning its index. Idempotent.
    pub fn reserve(&mut self, alias: &str) -> usize {
        if let Some(&idx) = self.slots.get(alias) {
            return idx;
        }
        let idx = self.slots.len();
        self.slots.insert(alias.to_owned(), idx);
        idx
    }

    pub fn get(&self, alias: &str) -> Option<usize> {
        self.slots.get(alias).copied()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.slots.contains_key(alias)
    }

    /// Number of slots a record of this plan carries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, usize)> {
        self.slots.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

/// One slot of a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Entry {
    #[default]
    Unset,
    Scalar(Value),
    Node(Node),
    Edge(Edge),
}

/// A single row. Cloning deep-copies scalar payloads; Rust ownership
/// makes the clone-then-free discipline safe by construction.
#[derive(Debug, Clone)]
pub struct Record {
    entries: Box<[Entry]>,
    mapping: Arc<AliasMap>,
}

impl Record {
    /// Fresh record sized to the plan's alias map, all slots unset.
    pub fn new(mapping: Arc<AliasMap>) -> Self {
        let entries = vec![Entry::Unset; mapping.len()].into_boxed_slice();
        Self { entries, mapping }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mapping(&self) -> &Arc<AliasMap> {
        &self.mapping
    }

    /// Slot index of an alias, if the plan knows it.
    pub fn idx_of(&self, alias: &str) -> Option<usize> {
        self.mapping.get(alias)
    }

    pub fn entry(&self, idx: usize) -> &Entry {
        &self.entries[idx]
    }

    /// Read a slot as a value. Nodes and edges come back wrapped; unset
    /// slots read as null.
    pub fn get(&self, idx: usize) -> Value {
        match &self.entries[idx] {
            Entry::Unset => Value::Null,
            Entry::Scalar(v) => v.clone(),
            Entry::Node(n) => Value::Node(n.clone()),
            Entry::Edge(e) => Value::Edge(*e),
        }
    }

    pub fn get_by_alias(&self, alias: &str) -> Value {
        self.idx_of(alias).map_or(Value::Null, |idx| self.get(idx))
    }

    pub fn get_node(&self, idx: usize) -> Option<&Node> {
        match &self.entries[idx] {
            Entry::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn get_edge(&self, idx: usize) -> Option<&Edge> {
        match &self.entries[idx] {
            Entry::Edge(e) => Some(e),
            _ => None,
        }
    }

    pub fn set(&mut self, idx: usize, value: Value) {
        self.entries[idx] = match value {
            Value::Node(n) => Entry::Node(n),
            Value::Edge(e) => Entry::Edge(e),
            v => Entry::Scalar(v),
        };
    }

    pub fn set_node(&mut self, idx: usize, node: Node) {
        self.entries[idx] = Entry::Node(node);
    }

    pub fn set_edge(&mut self, idx: usize, edge: Edge) {
        self.entries[idx] = Entry::Edge(edge);
    }

    pub fn unset(&mut self, idx: usize) {
        self.entries[idx] = Entry::Unset;
    }

    /// Copy every set slot of `other` into slots that are unset here.
    pub fn merge(&mut self, other: &Record) {
        debug_assert_eq!(self.len(), other.len());
        for (mine, theirs) in self.entries.iter_mut().zip(other.entries.iter()) {
            if matches!(mine, Entry::Unset) && !matches!(theirs, Entry::Unset) {
                *mine = theirs.clone();
            }
        }
    }

    /// Canonical 64-bit hash over the entries in index order. Unset
    /// slots hash as null, so implicit and explicit nulls collide by
    /// design.
    pub fn hash64(&self) -> u64 {
        let mut state = Xxh64::new(0);
        for idx in 0..self.entries.len() {
            self.get(idx).hash_into(&mut state);
        }
        state.digest()
    }

    /// Hash of a slot subset, used by distinct and group keys.
    pub fn hash64_of(&self, indices: &[usize]) -> u64 {
        let mut state = Xxh64::new(0);
        for &idx in indices {
            self.get(idx).hash_into(&mut state);
        }
        state.digest()
    }
}
