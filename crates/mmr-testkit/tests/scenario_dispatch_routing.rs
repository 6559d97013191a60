//! Scenario: Dispatch Routing
//!
//! # Invariant under test
//! Messages are routed by topic. Known topics carrying the wrong `type`,
//! `originalTopic` or `resource` are ignored without touching the ledger.
//! Malformed envelopes and payloads are validation errors raised before
//! any transaction begins.

use mmr_ledger::{ErrorKind, IgnoreReason, Outcome};
use mmr_testkit::{envelope, Harness};
use serde_json::json;

#[tokio::test]
async fn non_registration_challenge_event_is_ignored() {
    let h = Harness::new().await;
    let out = h
        .dispatch(&envelope(
            "challenge.notification.events",
            json!({"type": "CHALLENGE_UPDATED", "data": {"challengeId": 1}}),
        ))
        .await
        .unwrap();
    assert_eq!(out, Outcome::Ignored(IgnoreReason::NotUserRegistration));
}

#[tokio::test]
async fn aggregate_from_other_original_topic_is_ignored() {
    let h = Harness::new().await;
    let out = h
        .dispatch(&envelope(
            "submission.notification.aggregate",
            json!({"originalTopic": "submission.notification.delete", "resource": "review"}),
        ))
        .await
        .unwrap();
    assert_eq!(out, Outcome::Ignored(IgnoreReason::OriginalTopicMismatch));
}

#[tokio::test]
async fn aggregate_for_other_resource_is_ignored() {
    let h = Harness::new().await;
    let out = h
        .dispatch(&envelope(
            "submission.notification.aggregate",
            json!({"originalTopic": "submission.notification.create", "resource": "submission"}),
        ))
        .await
        .unwrap();
    assert_eq!(out, Outcome::Ignored(IgnoreReason::ResourceMismatch));
    assert_eq!(h.submissions.calls(), 0);
}

#[tokio::test]
async fn malformed_envelope_is_a_validation_error() {
    let h = Harness::new().await;
    let err = h
        .dispatch(&json!({"topic": "challenge.notification.events", "payload": {}}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn invalid_registration_ids_are_rejected_without_writes() {
    let h = Harness::new().await;
    let err = h
        .dispatch(&envelope(
            "challenge.notification.events",
            json!({"type": "USER_REGISTRATION", "data": {"challengeId": -3, "userId": 4}}),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.ledger.committed_writes(), 0);
    assert_eq!(h.sequences.reservations(), 0);
}
