//! End-to-end tests for ordering, joins, formats, cancellation, and the
//! persistence round trip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use matrixgraph::{Error, Format, QueryOptions, Server};

// ============================================================================
// Ordering, skip, limit
// ============================================================================

#[test]
fn test_filter_order_limit() {
    let server = Server::new();
    for v in [3, 1, 2] {
        server
            .execute("g", &format!("CREATE (:N {{v: {v}}})"), Format::None)
            .unwrap();
    }
    let reply = server
        .execute(
            "g",
            "MATCH (n:N) WHERE n.v > 1 RETURN n.v ORDER BY n.v DESC LIMIT 1",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 3]])]);
}

#[test]
fn test_skip_limit_without_order() {
    let server = Server::new();
    let reply = server
        .execute(
            "g",
            "UNWIND [1,2,3,4,5] AS x RETURN x SKIP 1 LIMIT 2",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows.len(), 2);
}

#[test]
fn test_sort_determinism() {
    let server = Server::new();
    for v in [2, 3, 1, 3, 2] {
        server
            .execute("g", &format!("CREATE (:N {{v: {v}}})"), Format::None)
            .unwrap();
    }
    let run = || {
        server
            .execute("g", "MATCH (n:N) RETURN n.v ORDER BY n.v", Format::Verbose)
            .unwrap()
            .rows
    };
    let first = run();
    for _ in 0..3 {
        assert_eq!(run(), first);
    }
}

#[test]
fn test_nulls_order_last_asc_first_desc() {
    let server = Server::new();
    server.execute("g", "CREATE (:N {v: 2})", Format::None).unwrap();
    server.execute("g", "CREATE (:N)", Format::None).unwrap();
    server.execute("g", "CREATE (:N {v: 1})", Format::None).unwrap();

    let asc = server
        .execute("g", "MATCH (n:N) RETURN n.v ORDER BY n.v ASC", Format::Verbose)
        .unwrap();
    assert_eq!(
        asc.rows,
        vec![
            json!([["Integer", 1]]),
            json!([["Integer", 2]]),
            json!([["Null", null]]),
        ]
    );

    let desc = server
        .execute("g", "MATCH (n:N) RETURN n.v ORDER BY n.v DESC", Format::Verbose)
        .unwrap();
    assert_eq!(
        desc.rows,
        vec![
            json!([["Null", null]]),
            json!([["Integer", 2]]),
            json!([["Integer", 1]]),
        ]
    );
}

// ============================================================================
// Joins
// ============================================================================

#[test]
fn test_implicit_value_hash_join() {
    let server = Server::new();
    for q in [
        "CREATE (:A {k: 'x'})",
        "CREATE (:B {k: 'x'})",
        "CREATE (:A {k: 'y'})",
        "CREATE (:B {k: 'z'})",
    ] {
        server.execute("g", q, Format::None).unwrap();
    }

    let reply = server
        .execute(
            "g",
            "MATCH (a:A), (b:B) WHERE a.k = b.k RETURN a.k",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["String", "x"]])]);
}

#[test]
fn test_join_associativity() {
    let server = Server::new();
    for (label, keys) in [("A", vec![1, 2]), ("B", vec![2, 3]), ("C", vec![2])] {
        for k in keys {
            server
                .execute("g", &format!("CREATE (:{label} {{k: {k}}})"), Format::None)
                .unwrap();
        }
    }

    let rows = |query: &str| {
        let mut rows = server
            .execute("g", query, Format::Verbose)
            .unwrap()
            .rows
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<String>>();
        rows.sort();
        rows
    };

    // The same three-way equi-join, associated both ways.
    let left = rows(
        "MATCH (a:A), (b:B), (c:C) WHERE a.k = b.k AND b.k = c.k RETURN a.k, b.k, c.k",
    );
    let right = rows(
        "MATCH (a:A), (b:B), (c:C) WHERE b.k = c.k AND a.k = b.k RETURN a.k, b.k, c.k",
    );
    assert_eq!(left, right);
    assert_eq!(left.len(), 1);
}

#[test]
fn test_cartesian_product_row_count() {
    let server = Server::new();
    for q in ["CREATE (:A)", "CREATE (:A)", "CREATE (:B)"] {
        server.execute("g", q, Format::None).unwrap();
    }
    let reply = server
        .execute("g", "MATCH (a:A), (b:B) RETURN count(*)", Format::Verbose)
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 2]])]);
}

// ============================================================================
// Formats
// ============================================================================

#[test]
fn test_compact_format_scalars() {
    let server = Server::new();
    server
        .execute("g", "CREATE (:P {s: 'hi', i: 7, b: true, f: 2.5})", Format::None)
        .unwrap();
    let reply = server
        .execute(
            "g",
            "MATCH (n:P) RETURN n.s, n.i, n.b, n.f, n.none",
            Format::Compact,
        )
        .unwrap();
    assert_eq!(
        reply.rows[0],
        json!([[2, "hi"], [3, 7], [4, 1], [5, "2.5"], [1]])
    );
}

#[test]
fn test_compact_node_uses_string_pool() {
    let server = Server::new();
    server
        .execute("g", "CREATE (:Person {name: 'Ada'})", Format::None)
        .unwrap();
    let reply = server
        .execute("g", "MATCH (n:Person) RETURN n", Format::Compact)
        .unwrap();

    let row = reply.rows[0].as_array().unwrap();
    let tagged = row[0].as_array().unwrap();
    assert_eq!(tagged[0], json!(8));
    let node = tagged[1].as_array().unwrap();
    // [id, [label offsets], props]
    let label_off = node[1].as_array().unwrap()[0].as_u64().unwrap() as usize;
    assert_eq!(reply.string_pool[label_off], "Person");
    let props = node[2].as_array().unwrap();
    let attr_off = props[0].as_array().unwrap()[0].as_u64().unwrap() as usize;
    assert_eq!(reply.string_pool[attr_off], "name");
}

#[test]
fn test_compact_edge_shape() {
    let server = Server::new();
    server
        .execute("g", "CREATE (:P)-[:KNOWS {w: 1}]->(:P)", Format::None)
        .unwrap();
    let reply = server
        .execute("g", "MATCH ()-[r]->() RETURN r", Format::Compact)
        .unwrap();
    let tagged = reply.rows[0].as_array().unwrap()[0].as_array().unwrap();
    assert_eq!(tagged[0], json!(7));
    let edge = tagged[1].as_array().unwrap();
    // [id, type offset, src, dst, props]
    assert_eq!(edge.len(), 5);
    let type_off = edge[1].as_u64().unwrap() as usize;
    assert_eq!(reply.string_pool[type_off], "KNOWS");
}

#[test]
fn test_streaming_rows() {
    let server = Server::new();
    for v in [1, 2, 3] {
        server
            .execute("g", &format!("CREATE (:N {{v: {v}}})"), Format::None)
            .unwrap();
    }
    let (tx, rx) = std::sync::mpsc::channel();
    let mut opts = QueryOptions::format(Format::Verbose);
    opts.stream = Some(tx);
    let reply = server
        .execute_opts("g", "MATCH (n:N) RETURN n.v", opts)
        .unwrap();
    assert!(reply.rows.is_empty());
    assert_eq!(rx.try_iter().count(), 3);
}

#[test]
fn test_row_cap() {
    let server = Server::new();
    let mut opts = QueryOptions::format(Format::Verbose);
    opts.row_cap = Some(2);
    let reply = server
        .execute_opts("g", "UNWIND [1,2,3,4] AS x RETURN x", opts)
        .unwrap();
    assert_eq!(reply.rows.len(), 2);
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancelled_before_start() {
    let server = Server::new();
    server.execute("g", "CREATE (:N)", Format::None).unwrap();

    let flag = Arc::new(AtomicBool::new(true));
    let mut opts = QueryOptions::format(Format::Verbose);
    opts.cancel = Some(flag);
    let err = server.execute_opts("g", "MATCH (n:N) RETURN n", opts);
    assert!(matches!(err, Err(Error::Cancelled)));
}

#[test]
fn test_cancelled_write_discards_staged_updates() {
    let server = Server::new();
    for i in 0..60 {
        server
            .execute("g", &format!("CREATE (:Seed {{i: {i}}})"), Format::None)
            .unwrap();
    }
    let graph = server.get_graph("g").unwrap();
    let nodes_before = graph.node_count();
    let nvals_before = graph.total_matrix_nvals();

    let server = Arc::new(server);
    let flag = Arc::new(AtomicBool::new(false));
    let handle = {
        let server = server.clone();
        let flag = flag.clone();
        std::thread::spawn(move || {
            let mut opts = QueryOptions::format(Format::None);
            opts.cancel = Some(flag);
            server.execute_opts(
                "g",
                // A long quadratic write: one staged node per pair.
                "MATCH (a:Seed), (b:Seed) CREATE (:Tmp {x: a.i})",
                opts,
            )
        })
    };
    std::thread::sleep(std::time::Duration::from_millis(2));
    flag.store(true, Ordering::Relaxed);
    let result = handle.join().unwrap();

    match result {
        Err(Error::Cancelled) => {
            // Everything staged was discarded.
            assert_eq!(graph.node_count(), nodes_before);
            assert_eq!(graph.total_matrix_nvals(), nvals_before);
            assert!(!graph.has_pending());
            let scan = server
                .execute("g", "MATCH (t:Tmp) RETURN count(*)", Format::Verbose)
                .unwrap();
            assert_eq!(scan.rows, vec![json!([["Integer", 0]])]);
        }
        Ok(reply) => {
            // The query won the race; it must then have fully committed.
            assert_eq!(reply.stats.nodes_created, 3600);
            assert!(!graph.has_pending());
        }
        Err(other) => panic!("unexpected error: {other}"),
    }
    graph.check_invariants().unwrap();
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_readers() {
    let server = Arc::new(Server::new());
    for i in 0..50 {
        server
            .execute("g", &format!("CREATE (:N {{i: {i}}})"), Format::None)
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let server = server.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..10 {
                let reply = server
                    .execute("g", "MATCH (n:N) RETURN count(*)", Format::Verbose)
                    .unwrap();
                assert_eq!(reply.rows, vec![json!([["Integer", 50]])]);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_writers_serialise() {
    let server = Arc::new(Server::new());
    let mut handles = Vec::new();
    for t in 0..4 {
        let server = server.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..10 {
                server
                    .execute(
                        "g",
                        &format!("CREATE (:W {{t: {t}, i: {i}}})"),
                        Format::None,
                    )
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    let reply = server
        .execute("g", "MATCH (n:W) RETURN count(*)", Format::Verbose)
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 40]])]);
    server.get_graph("g").unwrap().check_invariants().unwrap();
}

// ============================================================================
// Persistence round trip
// ============================================================================

#[test]
fn test_checkpoint_restore() {
    let server = Server::new();
    server
        .execute(
            "g",
            "CREATE (a:P {n: 'a'})-[:R {w: 2}]->(b:P {n: 'b'})",
            Format::None,
        )
        .unwrap();

    let snapshot = server.checkpoint("g").unwrap();
    // The snapshot itself serialises.
    let bytes = serde_json::to_vec(&snapshot).unwrap();
    let decoded: matrixgraph::graph::snapshot::GraphSnapshot =
        serde_json::from_slice(&bytes).unwrap();

    let server2 = Server::new();
    server2.restore("g", &decoded);
    let reply = server2
        .execute(
            "g",
            "MATCH (x:P)-[r:R]->(y:P) RETURN x.n, r.w, y.n",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(
        reply.rows,
        vec![json!([["String", "a"], ["Integer", 2], ["String", "b"]])]
    );
    server2.get_graph("g").unwrap().check_invariants().unwrap();
}

// ============================================================================
// Misc expression surface
// ============================================================================

#[test]
fn test_case_expression() {
    let server = Server::new();
    let reply = server
        .execute(
            "g",
            "UNWIND [1, 2, 3] AS x \
             RETURN CASE WHEN x < 2 THEN 'small' ELSE 'big' END AS size_of",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(
        reply.rows,
        vec![
            json!([["String", "small"]]),
            json!([["String", "big"]]),
            json!([["String", "big"]]),
        ]
    );
}

#[test]
fn test_list_comprehension_roundtrip() {
    let server = Server::new();
    let reply = server
        .execute(
            "g",
            "RETURN [x IN range(1, 5) WHERE x % 2 = 1 | x * x] AS squares",
            Format::Verbose,
        )
        .unwrap();
    let tagged = reply.rows[0].as_array().unwrap()[0].as_array().unwrap();
    assert_eq!(tagged[0], json!("Array"));
    assert_eq!(
        tagged[1],
        json!([["Integer", 1], ["Integer", 9], ["Integer", 25]])
    );
}

#[test]
fn test_map_projection() {
    let server = Server::new();
    server
        .execute("g", "CREATE (:P {name: 'Ada', age: 3})", Format::None)
        .unwrap();
    let reply = server
        .execute("g", "MATCH (n:P) RETURN n {.name, .age} AS m", Format::Verbose)
        .unwrap();
    let tagged = reply.rows[0].as_array().unwrap()[0].as_array().unwrap();
    assert_eq!(tagged[0], json!("Map"));
    assert_eq!(tagged[1]["name"], json!(["String", "Ada"]));
    assert_eq!(tagged[1]["age"], json!(["Integer", 3]));
}

#[test]
fn test_string_predicates() {
    let server = Server::new();
    for name in ["Ada", "Alan", "Bob"] {
        server
            .execute("g", &format!("CREATE (:P {{name: '{name}'}})"), Format::None)
            .unwrap();
    }
    let reply = server
        .execute(
            "g",
            "MATCH (n:P) WHERE n.name STARTS WITH 'A' RETURN count(*)",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 2]])]);
}

#[test]
fn test_comparison_chain() {
    let server = Server::new();
    let reply = server
        .execute(
            "g",
            "UNWIND [1, 3, 5, 7] AS x WITH x WHERE 2 < x <= 5 RETURN x ORDER BY x",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(
        reply.rows,
        vec![json!([["Integer", 3]]), json!([["Integer", 5]])]
    );
}

#[test]
fn test_index_scan_used_when_registered() {
    let server = Server::new();
    server
        .execute("g", "CREATE INDEX ON :P(k)", Format::None)
        .unwrap();
    server.execute("g", "CREATE (:P {k: 1})", Format::None).unwrap();
    server.execute("g", "CREATE (:P {k: 2})", Format::None).unwrap();

    let plan = server
        .explain("g", "MATCH (n:P {k: 1}) RETURN n")
        .unwrap()
        .join("\n");
    assert!(plan.contains("IndexScan"), "{plan}");

    let reply = server
        .execute("g", "MATCH (n:P {k: 1}) RETURN n.k", Format::Verbose)
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 1]])]);
}
