//! Name ↔ dense-id tables for labels, relationship types, and
//! attributes, plus registered secondary indices.
//!
//! Ids are assigned at first use and never reused. The tables are
//! read-mostly: new entries appear only while the exclusive portion of
//! the graph latch is held by the single writer.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::model::{AttrId, LabelId, RelTypeId};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Schema {
    labels: Vec<String>,
    label_ids: HashMap<String, LabelId>,
    rel_types: Vec<String>,
    rel_type_ids: HashMap<String, RelTypeId>,
    attrs: Vec<String>,
    attr_ids: HashMap<String, AttrId>,
    indices: Vec<(LabelId, AttrId)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Labels
    // ========================================================================

    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.label_ids.get(name).copied()
    }

    pub fn label_id_or_create(&mut self, name: &str) -> LabelId {
        if let Some(id) = self.label_id(name) {
            return id;
        }
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(name.to_owned());
        self.label_ids.insert(name.to_owned(), id);
        id
    }

    pub fn label_name(&self, id: LabelId) -> Option<&str> {
        self.labels.get(id.0 as usize).map(String::as_str)
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn label_names(&self) -> &[String] {
        &self.labels
    }

    // ========================================================================
    // Relationship types
    // ========================================================================

    pub fn rel_type_id(&self, name: &str) -> Option<RelTypeId> {
        self.rel_type_ids.get(name).copied()
    }

    pub fn rel_type_id_or_create(&mut self, name: &str) -> RelTypeId {
        if let Some(id) = self.rel_type_id(name) {
            return id;
        }
        let id = RelTypeId(self.rel_types.len() as u32);
        self.rel_types.push(name.to_owned());
        self.rel_type_ids.insert(name.to_owned(), id);
        id
    }

    pub fn rel_type_name(&self, id: RelTypeId) -> Option<&str> {
        self.rel_types.get(id.0 as usize).map(String::as_str)
    }

    pub fn rel_type_count(&self) -> usize {
        self.rel_types.len()
    }

    pub fn rel_type_names(&self) -> &[String] {
        &self.rel_types
    }

    pub fn all_rel_type_ids(&self) -> Vec<RelTypeId> {
        (0..self.rel_types.len() as u32).map(RelTypeId).collect()
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub fn attr_id(&self, name: &str) -> Option<AttrId> {
        self.attr_ids.get(name).copied()
    }

    pub fn attr_id_or_create(&mut self, name: &str) -> AttrId {
        if let Some(id) = self.attr_id(name) {
            return id;
        }
        let id = AttrId(self.attrs.len() as u32);
        self.attrs.push(name.to_owned());
        self.attr_ids.insert(name.to_owned(), id);
        id
    }

    pub fn attr_name(&self, id: AttrId) -> Option<&str> {
        self.attrs.get(id.0 as usize).map(String::as_str)
    }

    pub fn attr_names(&self) -> &[String] {
        &self.attrs
    }

    // ========================================================================
    // Indices
    // ========================================================================

    /// Register a (label, attribute) index. Returns false if already
    /// present.
    pub fn add_index(&mut self, label: LabelId, attr: AttrId) -> bool {
        if self.indices.contains(&(label, attr)) {
            return false;
        }
        self.indices.push((label, attr));
        true
    }

    pub fn drop_index(&mut self, label: LabelId, attr: AttrId) -> bool {
        let before = self.indices.len();
        self.indices.retain(|&pair| pair != (label, attr));
        self.indices.len() != before
    }

    pub fn has_index(&self, label: LabelId, attr: AttrId) -> bool {
        self.indices.contains(&(label, attr))
    }
}
