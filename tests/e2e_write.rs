//! End-to-end write-path tests: SET, REMOVE, DELETE, MERGE, and the
//! commit/rollback discipline.

use pretty_assertions::assert_eq;
use serde_json::json;

use matrixgraph::{Format, Server};

#[test]
fn test_set_property() {
    let server = Server::new();
    server
        .execute("g", "CREATE (:P {name: 'Ada', age: 3})", Format::None)
        .unwrap();

    let reply = server
        .execute(
            "g",
            "MATCH (n:P) WHERE n.name = 'Ada' SET n.age = 4 RETURN n.age",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.stats.properties_set, 1);
    assert_eq!(reply.rows, vec![json!([["Integer", 4]])]);
}

#[test]
fn test_set_null_removes_property() {
    let server = Server::new();
    server.execute("g", "CREATE (:P {v: 1})", Format::None).unwrap();
    server
        .execute("g", "MATCH (n:P) SET n.v = null", Format::None)
        .unwrap();
    let reply = server
        .execute("g", "MATCH (n:P) RETURN n.v", Format::Verbose)
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Null", null]])]);
}

#[test]
fn test_remove_property_and_label() {
    let server = Server::new();
    server
        .execute("g", "CREATE (:A:B {v: 1})", Format::None)
        .unwrap();

    let reply = server
        .execute("g", "MATCH (n:A) REMOVE n.v, n:B RETURN n", Format::Verbose)
        .unwrap();
    assert_eq!(reply.stats.properties_set, 1);
    assert_eq!(reply.stats.labels_removed, 1);

    let b_scan = server
        .execute("g", "MATCH (n:B) RETURN n", Format::Verbose)
        .unwrap();
    assert!(b_scan.rows.is_empty());
}

#[test]
fn test_set_label() {
    let server = Server::new();
    server.execute("g", "CREATE (:A)", Format::None).unwrap();
    let reply = server
        .execute("g", "MATCH (n:A) SET n:Extra RETURN n", Format::None)
        .unwrap();
    assert_eq!(reply.stats.labels_added, 1);

    let scan = server
        .execute("g", "MATCH (n:Extra) RETURN n", Format::Verbose)
        .unwrap();
    assert_eq!(scan.rows.len(), 1);
}

#[test]
fn test_delete_with_read_your_writes() {
    let server = Server::new();
    let reply = server
        .execute(
            "g",
            "CREATE (n:T) WITH n DELETE n RETURN count(*)",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 1]])]);
    assert_eq!(reply.stats.nodes_created, 1);
    assert_eq!(reply.stats.nodes_deleted, 1);

    let scan = server
        .execute("g", "MATCH (n:T) RETURN n", Format::Verbose)
        .unwrap();
    assert!(scan.rows.is_empty());

    let graph = server.get_graph("g").unwrap();
    assert!(!graph.has_pending());
    graph.check_invariants().unwrap();
}

#[test]
fn test_detach_delete_removes_edges() {
    let server = Server::new();
    server
        .execute("g", "CREATE (a:P)-[:R]->(b:P)", Format::None)
        .unwrap();

    // Plain DELETE on a connected node fails and rolls back.
    let err = server.execute(
        "g",
        "MATCH (n:P) DELETE n",
        Format::None,
    );
    assert!(err.is_err());
    let graph = server.get_graph("g").unwrap();
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);

    let reply = server
        .execute("g", "MATCH (n:P) DETACH DELETE n", Format::None)
        .unwrap();
    assert_eq!(reply.stats.nodes_deleted, 2);
    assert_eq!(reply.stats.relationships_deleted, 1);
    assert_eq!(graph.node_count(), 0);
    assert_eq!(graph.edge_count(), 0);
    assert_eq!(graph.hexastore_key_count(), 0);
}

#[test]
fn test_round_trip_law() {
    let server = Server::new();
    for i in 0..5 {
        server
            .execute("g", &format!("CREATE (:N {{i: {i}}})"), Format::None)
            .unwrap();
    }
    server
        .execute(
            "g",
            "MATCH (a:N {i: 0}), (b:N {i: 1}) CREATE (a)-[:R]->(b)",
            Format::None,
        )
        .unwrap();
    server
        .execute(
            "g",
            "MATCH (a:N {i: 1}), (b:N {i: 2}) CREATE (a)-[:R]->(b)",
            Format::None,
        )
        .unwrap();

    let nodes = server
        .execute("g", "MATCH (n) RETURN count(n)", Format::Verbose)
        .unwrap();
    assert_eq!(nodes.rows, vec![json!([["Integer", 5]])]);
    let edges = server
        .execute("g", "MATCH ()-[r]->() RETURN count(r)", Format::Verbose)
        .unwrap();
    assert_eq!(edges.rows, vec![json!([["Integer", 2]])]);

    server
        .execute("g", "MATCH (n) DETACH DELETE n", Format::None)
        .unwrap();

    let graph = server.get_graph("g").unwrap();
    assert_eq!(graph.node_count(), 0);
    assert_eq!(graph.edge_count(), 0);
    assert_eq!(graph.total_matrix_nvals(), 0);
    assert_eq!(graph.hexastore_key_count(), 0);
    assert!(!graph.has_pending());
}

#[test]
fn test_merge_creates_then_matches() {
    let server = Server::new();

    let first = server
        .execute("g", "MERGE (n:P {k: 'x'}) RETURN n.k", Format::Verbose)
        .unwrap();
    assert_eq!(first.stats.nodes_created, 1);
    assert_eq!(first.rows.len(), 1);

    // Idempotence: merging the same pattern again changes nothing.
    let second = server
        .execute("g", "MERGE (n:P {k: 'x'}) RETURN n.k", Format::Verbose)
        .unwrap();
    assert_eq!(second.stats.nodes_created, 0);
    assert_eq!(second.stats.properties_set, 0);
    assert_eq!(second.rows.len(), 1);

    let count = server
        .execute("g", "MATCH (n:P) RETURN count(*)", Format::Verbose)
        .unwrap();
    assert_eq!(count.rows, vec![json!([["Integer", 1]])]);
}

#[test]
fn test_merge_on_create_on_match() {
    let server = Server::new();

    server
        .execute(
            "g",
            "MERGE (n:P {k: 'x'}) ON CREATE SET n.created = 1 ON MATCH SET n.matched = 1",
            Format::None,
        )
        .unwrap();
    let reply = server
        .execute(
            "g",
            "MATCH (n:P) RETURN n.created, n.matched",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 1], ["Null", null]])]);

    server
        .execute(
            "g",
            "MERGE (n:P {k: 'x'}) ON CREATE SET n.created = 2 ON MATCH SET n.matched = 1",
            Format::None,
        )
        .unwrap();
    let reply = server
        .execute(
            "g",
            "MATCH (n:P) RETURN n.created, n.matched",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 1], ["Integer", 1]])]);
}

#[test]
fn test_merge_relationship_pattern() {
    let server = Server::new();
    server
        .execute("g", "MERGE (a:P {n: 'a'})-[:R]->(b:P {n: 'b'})", Format::None)
        .unwrap();
    let again = server
        .execute("g", "MERGE (a:P {n: 'a'})-[:R]->(b:P {n: 'b'})", Format::None)
        .unwrap();
    assert_eq!(again.stats.nodes_created, 0);
    assert_eq!(again.stats.relationships_created, 0);

    let graph = server.get_graph("g").unwrap();
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn test_failed_write_rolls_back() {
    let server = Server::new();
    server.execute("g", "CREATE (:P {v: 1})", Format::None).unwrap();
    let graph = server.get_graph("g").unwrap();
    let nodes_before = graph.node_count();

    // The division by zero aborts after the CREATE already staged.
    let err = server.execute(
        "g",
        "CREATE (:P {v: 2}) WITH 1 AS one RETURN one / 0",
        Format::Verbose,
    );
    assert!(matches!(err, Err(matrixgraph::Error::RuntimeError(_))));

    assert_eq!(graph.node_count(), nodes_before);
    assert!(!graph.has_pending());
    graph.check_invariants().unwrap();
}

#[test]
fn test_create_after_match_per_row() {
    let server = Server::new();
    for i in 0..3 {
        server
            .execute("g", &format!("CREATE (:Src {{i: {i}}})"), Format::None)
            .unwrap();
    }
    let reply = server
        .execute(
            "g",
            "MATCH (s:Src) CREATE (s)-[:MADE]->(:Out {of: s.i})",
            Format::None,
        )
        .unwrap();
    assert_eq!(reply.stats.nodes_created, 3);
    assert_eq!(reply.stats.relationships_created, 3);

    let out = server
        .execute(
            "g",
            "MATCH (:Src)-[:MADE]->(o:Out) RETURN o.of ORDER BY o.of",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(out.rows.len(), 3);
}
