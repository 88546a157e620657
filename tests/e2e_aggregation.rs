//! End-to-end aggregation tests.

use pretty_assertions::assert_eq;
use serde_json::json;

use matrixgraph::{Format, Server};

fn people() -> Server {
    let server = Server::new();
    for (name, city, age) in [
        ("Ada", "London", 30),
        ("Bob", "London", 40),
        ("Cy", "Paris", 20),
    ] {
        server
            .execute(
                "g",
                &format!(
                    "CREATE (:Person {{name: '{name}', city: '{city}', age: {age}}})"
                ),
                Format::None,
            )
            .unwrap();
    }
    server
}

#[test]
fn test_count_star() {
    let server = people();
    let reply = server
        .execute("g", "MATCH (n:Person) RETURN count(*)", Format::Verbose)
        .unwrap();
    assert_eq!(reply.columns, vec!["count(*)"]);
    assert_eq!(reply.rows, vec![json!([["Integer", 3]])]);
}

#[test]
fn test_count_on_empty_graph_is_zero() {
    let server = Server::new();
    let reply = server
        .execute("g", "MATCH (n) RETURN count(n)", Format::Verbose)
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 0]])]);
}

#[test]
fn test_group_by_city() {
    let server = people();
    let reply = server
        .execute(
            "g",
            "MATCH (n:Person) RETURN n.city, count(*) ORDER BY n.city",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(
        reply.rows,
        vec![
            json!([["String", "London"], ["Integer", 2]]),
            json!([["String", "Paris"], ["Integer", 1]]),
        ]
    );
}

#[test]
fn test_sum_avg_min_max() {
    let server = people();
    let reply = server
        .execute(
            "g",
            "MATCH (n:Person) RETURN sum(n.age), avg(n.age), min(n.age), max(n.age)",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(
        reply.rows,
        vec![json!([
            ["Integer", 90],
            ["Float", 30.0],
            ["Integer", 20],
            ["Integer", 40],
        ])]
    );
}

#[test]
fn test_collect() {
    let server = people();
    let reply = server
        .execute(
            "g",
            "MATCH (n:Person {city: 'London'}) RETURN collect(n.name)",
            Format::Verbose,
        )
        .unwrap();
    let row = reply.rows[0].as_array().unwrap();
    let tagged = row[0].as_array().unwrap();
    assert_eq!(tagged[0], json!("Array"));
    assert_eq!(tagged[1].as_array().unwrap().len(), 2);
}

#[test]
fn test_count_distinct() {
    let server = people();
    let reply = server
        .execute(
            "g",
            "MATCH (n:Person) RETURN count(DISTINCT n.city)",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 2]])]);
}

#[test]
fn test_aggregation_skips_nulls() {
    let server = people();
    server
        .execute("g", "CREATE (:Person {name: 'NoAge'})", Format::None)
        .unwrap();
    let reply = server
        .execute(
            "g",
            "MATCH (n:Person) RETURN count(n.age), count(*)",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["Integer", 3], ["Integer", 4]])]);
}

#[test]
fn test_return_distinct() {
    let server = people();
    let reply = server
        .execute(
            "g",
            "MATCH (n:Person) RETURN DISTINCT n.city ORDER BY n.city",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(
        reply.rows,
        vec![json!([["String", "London"]]), json!([["String", "Paris"]])]
    );
}

#[test]
fn test_aggregate_through_with() {
    let server = people();
    let reply = server
        .execute(
            "g",
            "MATCH (n:Person) WITH n.city AS city, count(*) AS c WHERE c > 1 RETURN city",
            Format::Verbose,
        )
        .unwrap();
    assert_eq!(reply.rows, vec![json!([["String", "London"]])]);
}
