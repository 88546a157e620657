//! Replayable persisted form of a graph.
//!
//! A snapshot is the entity/property records plus the label and
//! relationship-type dictionaries — enough to rebuild every matrix and
//! the hexastore deterministically, with the same dense ids. Captured
//! under the exclusive latch, so nothing is pending.

use serde::{Deserialize, Serialize};

use crate::model::{AttrId, LabelId, NodeId, RelTypeId, Value};

use super::Graph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: u64,
    pub labels: Vec<u32>,
    pub props: Vec<(u32, Value)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: u64,
    pub src: u64,
    pub dst: u64,
    pub rel_type: u32,
    pub props: Vec<(u32, Value)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub labels: Vec<String>,
    pub rel_types: Vec<String>,
    pub attrs: Vec<String>,
    /// Live nodes in ascending id order.
    pub nodes: Vec<NodeRecord>,
    /// Live edges in ascending id order.
    pub edges: Vec<EdgeRecord>,
}

impl GraphSnapshot {
    pub(super) fn capture(graph: &Graph) -> Self {
        let nodes = graph
            .all_node_ids()
            .into_iter()
            .filter_map(|id| {
                let node = graph.node(id)?;
                Some(NodeRecord {
                    id: id.0,
                    labels: node.labels.iter().map(|l| l.0).collect(),
                    props: graph
                        .node_properties(id)
                        .into_iter()
                        .map(|(a, v)| (a.0, v))
                        .collect(),
                })
            })
            .collect();

        let edges = graph
            .all_edge_ids()
            .into_iter()
            .filter_map(|id| {
                let edge = graph.edge(id)?;
                Some(EdgeRecord {
                    id: id.0,
                    src: edge.src.0,
                    dst: edge.dst.0,
                    rel_type: edge.rel_type.0,
                    props: graph
                        .edge_properties(id)
                        .into_iter()
                        .map(|(a, v)| (a.0, v))
                        .collect(),
                })
            })
            .collect();

        GraphSnapshot {
            labels: graph.label_names(),
            rel_types: graph.rel_type_names(),
            attrs: graph.attr_names(),
            nodes,
            edges,
        }
    }

    pub(super) fn replay(&self, name: impl Into<String>) -> Graph {
        let graph = Graph::new(name);

        // Dictionaries first, in order, so dense ids line up.
        for label in &self.labels {
            graph.label_id_or_create(label);
        }
        for rel in &self.rel_types {
            graph.rel_type_id_or_create(rel);
        }
        for attr in &self.attrs {
            graph.attr_id_or_create(attr);
        }

        // Nodes in id order; tombstoned gaps are burned so ids match.
        let mut next_id = 0u64;
        for rec in &self.nodes {
            while next_id < rec.id {
                let gap = graph.create_node(&[], vec![]);
                graph.delete_node(gap);
                next_id += 1;
            }
            let labels: Vec<LabelId> = rec.labels.iter().map(|&l| LabelId(l)).collect();
            let props: Vec<(AttrId, Value)> = rec
                .props
                .iter()
                .map(|(a, v)| (AttrId(*a), v.clone()))
                .collect();
            graph.create_node(&labels, props);
            next_id += 1;
        }

        let mut next_edge = 0u64;
        for rec in &self.edges {
            while next_edge < rec.id {
                // Burn the gap id with a placeholder between this live
                // edge's endpoints.
                if let Ok(gap) = graph.create_edge(
                    NodeId(rec.src),
                    NodeId(rec.dst),
                    RelTypeId(rec.rel_type),
                    vec![],
                ) {
                    graph.delete_edge(gap);
                }
                next_edge += 1;
            }
            let props: Vec<(AttrId, Value)> = rec
                .props
                .iter()
                .map(|(a, v)| (AttrId(*a), v.clone()))
                .collect();
            let _ = graph.create_edge(
                NodeId(rec.src),
                NodeId(rec.dst),
                RelTypeId(rec.rel_type),
                props,
            );
            next_edge += 1;
        }

        graph.flush();
        graph
    }
}
