//! Property-based tests for the engine's laws and invariants.

use proptest::prelude::*;

use matrixgraph::graph::ReadView;
use matrixgraph::hexastore::{Hexastore, Triplet, TripletPattern};
use matrixgraph::{EdgeId, Format, Graph, NodeId, RelTypeId, Server, Value};

proptest! {
    // Same input multiset, same output ordering, every time.
    #[test]
    fn prop_sort_determinism(values in proptest::collection::vec(-50i64..50, 0..20)) {
        let server = Server::new();
        let list = values
            .iter()
            .map(i64::to_string)
            .collect::<Vec<String>>()
            .join(", ");
        let query = format!("UNWIND [{list}] AS x RETURN x ORDER BY x");

        let run = || {
            server
                .execute("g", &query, Format::Verbose)
                .unwrap()
                .rows
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<String>>()
        };
        let first = run();
        prop_assert_eq!(run(), first.clone());

        let mut expected = values.clone();
        expected.sort_unstable();
        let got: Vec<i64> = server
            .execute("g", &query, Format::Verbose)
            .unwrap()
            .rows
            .iter()
            .map(|r| r[0][1].as_i64().unwrap())
            .collect();
        prop_assert_eq!(got, expected);
    }

    // Create everything, delete everything: the store, the matrices,
    // and the hexastore all end empty.
    #[test]
    fn prop_round_trip_empties_everything(
        node_count in 1usize..12,
        edge_pairs in proptest::collection::vec((0usize..12, 0usize..12), 0..20),
    ) {
        let graph = Graph::new("prop");
        let label = graph.label_id_or_create("N");
        let rel = graph.rel_type_id_or_create("R");

        let nodes: Vec<NodeId> = (0..node_count)
            .map(|_| graph.create_node(&[label], vec![]))
            .collect();
        for (a, b) in &edge_pairs {
            let (src, dst) = (nodes[a % node_count], nodes[b % node_count]);
            graph.create_edge(src, dst, rel, vec![]).unwrap();
        }
        graph.flush();
        graph.check_invariants().unwrap();

        prop_assert_eq!(graph.node_count(), node_count as u64);
        prop_assert_eq!(graph.edge_count(), edge_pairs.len() as u64);
        prop_assert_eq!(
            graph.hexastore_key_count(),
            6 * edge_pairs.len() as u64
        );

        for id in nodes {
            graph.delete_node(id);
        }
        graph.flush();

        prop_assert_eq!(graph.node_count(), 0);
        prop_assert_eq!(graph.edge_count(), 0);
        prop_assert_eq!(graph.total_matrix_nvals(), 0);
        prop_assert_eq!(graph.hexastore_key_count(), 0);
        prop_assert!(!graph.has_pending());
    }

    // Every live edge has exactly six hexastore keys, and every scan
    // pattern agrees with a full filter.
    #[test]
    fn prop_hexastore_symmetry(
        triplets in proptest::collection::btree_set((0u64..8, 0u32..3, 0u64..8), 0..24),
    ) {
        let mut hexa = Hexastore::new();
        let triplets: Vec<Triplet> = triplets
            .into_iter()
            .enumerate()
            .map(|(edge, (s, p, o))| Triplet {
                subject: NodeId(s),
                rel_type: RelTypeId(p),
                edge: EdgeId(edge as u64),
                object: NodeId(o),
            })
            .collect();
        for &t in &triplets {
            hexa.insert_triplet(t);
        }
        prop_assert_eq!(hexa.key_count(), 6 * triplets.len() as u64);

        // Spot-check a bound pattern against brute force.
        for &t in triplets.iter().take(4) {
            let scanned = hexa.scan(TripletPattern {
                subject: Some(t.subject),
                rel_type: Some(t.rel_type),
                object: None,
            });
            let expected: Vec<&Triplet> = triplets
                .iter()
                .filter(|x| x.subject == t.subject && x.rel_type == t.rel_type)
                .collect();
            prop_assert_eq!(scanned.len(), expected.len());
        }

        for &t in &triplets {
            prop_assert!(hexa.delete_triplet(t));
        }
        prop_assert!(hexa.is_empty());
    }

    // Traversal sees exactly the edges the store recorded, in ascending
    // destination order.
    #[test]
    fn prop_traversal_matches_store(
        edge_pairs in proptest::collection::vec((0u64..6, 0u64..6), 1..15),
    ) {
        let graph = Graph::new("prop");
        let rel = graph.rel_type_id_or_create("R");
        for _ in 0..6 {
            graph.create_node(&[], vec![]);
        }
        for &(a, b) in &edge_pairs {
            graph.create_edge(NodeId(a), NodeId(b), rel, vec![]).unwrap();
        }
        graph.flush();

        for src in 0..6u64 {
            let out = graph.traverse_out(NodeId(src), &[rel], ReadView::reader(u64::MAX, u64::MAX));
            let expected = edge_pairs.iter().filter(|&&(a, _)| a == src).count();
            prop_assert_eq!(out.len(), expected);
            let dsts: Vec<u64> = out.iter().map(|e| e.dst.0).collect();
            let mut sorted = dsts.clone();
            sorted.sort_unstable();
            prop_assert_eq!(dsts, sorted);
        }
        graph.check_invariants().unwrap();
    }

    // Value hashing respects comparison equality across Int/Double.
    #[test]
    fn prop_numeric_hash_consistency(v in -1000i64..1000) {
        let int = Value::Int(v);
        let dbl = Value::Double(v as f64);
        prop_assert_eq!(int.hash64(), dbl.hash64());
        prop_assert!(int.total_eq(&dbl));
    }
}
