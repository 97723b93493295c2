//! E2E-02: Events moving entity vectors.
//!
//! `like` events pull the liking user's vector towards the liked post;
//! queries made with the user's stored vector follow that move.

use e2e_tests::{like, post, social_index, user, TestHarness};
use pretty_assertions::assert_eq;
use vecgraph_online::{EventRecord, OnlineError};
use vecgraph_service::{QueryRequest, ServiceError};

fn seeded() -> TestHarness {
    let harness = TestHarness::new(social_index());
    harness
        .app
        .ingest(&[
            user("u1", "cooking"),
            post("p1", "cooking pasta at home"),
            post("p2", "rocket engines thrust orbit launch"),
        ])
        .unwrap();
    harness
}

fn post_score(harness: &TestHarness, user_id: &str, post_id: &str) -> f32 {
    let vector = harness.index_vector("user", user_id);
    harness
        .app
        .query(&QueryRequest::new("post").with_vector(vector))
        .unwrap()
        .into_iter()
        .find(|r| r.object_id == post_id)
        .map(|r| r.score)
        .unwrap()
}

/// A like moves the user towards the liked post and keeps the vector unit length.
#[test]
fn test_like_moves_user_towards_post() {
    let harness = seeded();
    let before = post_score(&harness, "u1", "p2");

    let updated = harness.app.ingest_events(&[like("e1", "u1", "p2")]).unwrap();
    assert_eq!(updated, 1);

    let after = post_score(&harness, "u1", "p2");
    assert!(after > before, "score {before} should grow, got {after}");
    assert!((harness.index_vector("user", "u1").norm() - 1.0).abs() < 1e-5);
}

/// The liked post itself is not affected.
#[test]
fn test_affecting_entity_is_unchanged() {
    let harness = seeded();
    let post_before = harness.index_vector("post", "p2");
    harness.app.ingest_events(&[like("e1", "u1", "p2")]).unwrap();
    assert_eq!(harness.index_vector("post", "p2"), post_before);
}

/// Every event of a batch yields an update for the user it references.
#[test]
fn test_event_batch_updates_every_referenced_user() {
    let harness = seeded();
    harness.app.ingest(&[user("u2", "rockets")]).unwrap();
    let u2_before = harness.index_vector("user", "u2");
    let updated = harness
        .app
        .ingest_events(&[
            like("e1", "u1", "p2"),
            like("e2", "u1", "p1"),
            like("e3", "u2", "p2"),
        ])
        .unwrap();
    assert_eq!(updated, 3);
    assert_ne!(harness.index_vector("user", "u2"), u2_before);
}

/// Events of schemas without effects are ignored.
#[test]
fn test_unrelated_events_are_ignored() {
    let harness = seeded();
    let before = harness.index_vector("user", "u1");
    let updated = harness
        .app
        .ingest_events(&[EventRecord::new("view", "v1", 0).with_field("user", "u1")])
        .unwrap();
    assert_eq!(updated, 0);
    assert_eq!(harness.index_vector("user", "u1"), before);
}

/// Liking a post that was never ingested fails and writes nothing.
#[test]
fn test_like_of_unknown_post_fails() {
    let harness = seeded();
    let before = harness.index_vector("user", "u1");
    let err = harness
        .app
        .ingest_events(&[like("e1", "u1", "missing")])
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Online(OnlineError::MissingStoredResult { .. })
    ));
    assert_eq!(harness.index_vector("user", "u1"), before);
}
