//! E2E-01: Full ingest-to-query pipeline.
//!
//! Ingests paper records through the online evaluator, then answers
//! k-NN queries built by the query dag against the stored index vectors.

use e2e_tests::{paper, paper_index, papers, two_text_index, TestHarness, TEXT_DIMENSION};
use pretty_assertions::assert_eq;
use vecgraph_service::QueryRequest;
use vecgraph_storage::FieldFilter;
use vecgraph_types::{ComparisonOperator, Value};

/// Three records, limit 2: at most two hits, best first, full-length vectors.
#[test]
fn test_ingest_then_query_with_limit() {
    let harness = TestHarness::new(paper_index());
    assert_eq!(harness.app.ingest(&papers()).unwrap(), 3);

    let results = harness
        .app
        .query(
            &QueryRequest::new("paper")
                .with_input("body", "graph engines")
                .with_limit(2),
        )
        .unwrap();
    assert!(results.len() <= 2);
    assert!(!results.is_empty());
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

    // text plus one number dimension
    let vector = harness.index_vector("paper", "p1");
    assert_eq!(vector.dimension(), TEXT_DIMENSION + 1);
    assert_eq!(harness.app.query_dag().vector_length(), TEXT_DIMENSION + 1);
}

/// Stored fields come back on request and can be filtered on.
#[test]
fn test_query_returns_and_filters_stored_fields() {
    let harness = TestHarness::new(paper_index());
    harness.app.ingest(&papers()).unwrap();

    let results = harness
        .app
        .query(
            &QueryRequest::new("paper")
                .with_input("body", "operating system kernels")
                .with_space_weight("year", 0.0)
                .with_fields_to_return(["title", "year"]),
        )
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].object_id, "p2");
    assert_eq!(results[0].fields.get("title"), Some(&Value::from("Kernels")));
    assert_eq!(results[0].fields.get("year"), Some(&Value::Int(2020)));

    let filtered = harness
        .app
        .query(
            &QueryRequest::new("paper")
                .with_input("body", "operating system kernels")
                .with_filter(FieldFilter::new("year", ComparisonOperator::GreaterThan, Value::Int(2022))),
        )
        .unwrap();
    let ids: Vec<&str> = filtered.iter().map(|r| r.object_id.as_str()).collect();
    assert_eq!(ids, vec!["p3"]);
}

/// Querying with a stored vector finds its owner with a perfect score.
#[test]
fn test_query_with_stored_vector() {
    let harness = TestHarness::new(two_text_index());
    harness.app.ingest(&papers()).unwrap();

    let stored = harness.index_vector("paper", "p1");
    let results = harness
        .app
        .query(&QueryRequest::new("paper").with_vector(stored))
        .unwrap();
    assert_eq!(results[0].object_id, "p1");
    assert!((results[0].score - 1.0).abs() < 1e-4);
}

/// Re-ingesting an entity overwrites it and reuses cached embeddings.
#[test]
fn test_reingest_overwrites_entity() {
    let harness = TestHarness::new(paper_index());
    harness.app.ingest(&papers()).unwrap();
    let embedded = harness.engine.embedded_inputs();

    harness.app.ingest(&papers()).unwrap();
    assert_eq!(harness.engine.embedded_inputs(), embedded);

    harness
        .app
        .ingest(&[paper("p2", "Kernels", "graph engines for vectors", 2010)])
        .unwrap();
    let results = harness
        .app
        .query(&QueryRequest::new("paper").with_input("body", "anything").with_limit(10))
        .unwrap();
    assert_eq!(results.len(), 3);

    let p1 = harness.index_vector("paper", "p1");
    let p2 = harness.index_vector("paper", "p2");
    assert_eq!(p1.values(), p2.values());
}

/// A zero space weight ranks exactly like leaving the space without input.
#[test]
fn test_zero_space_weight_equals_omitted_input() {
    let harness = TestHarness::new(two_text_index());
    harness.app.ingest(&papers()).unwrap();

    let weighted_out = harness
        .app
        .query(
            &QueryRequest::new("paper")
                .with_input("body", "nearest neighbour graph")
                .with_input("title", "Kernels")
                .with_space_weight("title", 0.0),
        )
        .unwrap();
    let omitted = harness
        .app
        .query(&QueryRequest::new("paper").with_input("body", "nearest neighbour graph"))
        .unwrap();

    assert_eq!(weighted_out.len(), omitted.len());
    for (a, b) in weighted_out.iter().zip(&omitted) {
        assert_eq!(a.object_id, b.object_id);
        assert!((a.score - b.score).abs() < 1e-5);
    }
}

/// Number spaces in maximum mode prefer the largest value.
#[test]
fn test_number_space_prefers_recent_papers() {
    let harness = TestHarness::new(paper_index());
    harness.app.ingest(&papers()).unwrap();

    let results = harness
        .app
        .query(
            &QueryRequest::new("paper")
                .with_space_weight("body", 0.0)
                .with_space_weight("year", 1.0),
        )
        .unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.object_id.as_str()).collect();
    assert_eq!(ids, vec!["p3", "p2", "p1"]);
}
