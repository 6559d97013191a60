//! Wired-up dispatcher over the in-memory store, plus message builders.

use std::sync::Arc;

use serde_json::{json, Value};

use mmr_ledger::{
    Dispatcher, EngineError, EventProcessor, IdAllocator, Outcome, ProcessorSettings,
    SubmissionRecord, Topics, COMPONENT_STATE_SEQ,
};

use crate::collab::{MemSequences, StaticRatings, StaticSubmissions};
use crate::ledger::{MemLedger, RoundRow};

pub const CHALLENGE_ID: i64 = 30_054_163;
pub const ROUND_ID: i64 = 18_001;
pub const COMPONENT_ID: i64 = 2_001;

pub struct Harness {
    pub ledger: MemLedger,
    pub sequences: Arc<MemSequences>,
    pub submissions: Arc<StaticSubmissions>,
    pub ratings: Arc<StaticRatings>,
    pub dispatcher: Dispatcher<MemLedger>,
}

impl Harness {
    /// Default settings, one rated round of the managed type for
    /// [`CHALLENGE_ID`].
    pub async fn new() -> Self {
        Self::with_settings(ProcessorSettings::default()).await
    }

    pub async fn with_settings(settings: ProcessorSettings) -> Self {
        let ledger = MemLedger::new();
        ledger
            .add_round(RoundRow {
                round_id: ROUND_ID,
                challenge_id: CHALLENGE_ID,
                round_type_id: settings.round_type_id,
                rated_ind: 1,
                component_id: Some(COMPONENT_ID),
            })
            .await;
        Self::build(
            ledger,
            Arc::new(MemSequences::new()),
            Arc::new(StaticSubmissions::new()),
            Arc::new(StaticRatings::new()),
            settings,
        )
    }

    /// A fresh dispatcher (and id allocator) over the same store and
    /// sequences, as after a process restart.
    pub fn restarted(&self) -> Self {
        Self::build(
            self.ledger.clone(),
            self.sequences.clone(),
            self.submissions.clone(),
            self.ratings.clone(),
            self.dispatcher.processor().settings().clone(),
        )
    }

    fn build(
        ledger: MemLedger,
        sequences: Arc<MemSequences>,
        submissions: Arc<StaticSubmissions>,
        ratings: Arc<StaticRatings>,
        settings: ProcessorSettings,
    ) -> Self {
        let ids = Arc::new(IdAllocator::new(COMPONENT_STATE_SEQ, sequences.clone()));
        let processor = EventProcessor::new(
            ledger.clone(),
            ids,
            submissions.clone(),
            ratings.clone(),
            settings,
        );
        Self {
            ledger,
            sequences,
            submissions,
            ratings,
            dispatcher: Dispatcher::new(processor, Topics::default()),
        }
    }

    pub async fn dispatch(&self, message: &Value) -> Result<Outcome, EngineError> {
        self.dispatcher.dispatch(message).await
    }

    /// Register a submission with the lookup, created at a fixed instant.
    pub fn add_submission(&self, id: &str, member_id: i64, legacy_submission_id: i64) {
        self.submissions.insert(SubmissionRecord {
            id: Some(id.to_string()),
            created: Some("2024-01-15T17:00:00.000Z".to_string()),
            challenge_id: Some(CHALLENGE_ID),
            member_id: Some(member_id),
            legacy_submission_id: Some(legacy_submission_id),
        });
    }

    pub async fn register(&self, user_id: i64) -> Result<Outcome, EngineError> {
        self.dispatch(&registration(CHALLENGE_ID, user_id)).await
    }

    /// Registration, one review, and a summation for `coder_id`.
    pub async fn score(&self, coder_id: i64, points: f64) -> Result<(), EngineError> {
        let sid = format!("sub-{coder_id}");
        let legacy = 50_000 + coder_id;
        self.add_submission(&sid, coder_id, legacy);
        self.ledger.set_initial_score(legacy, Some(points)).await;
        self.register(coder_id).await?;
        self.dispatch(&review(&sid, "review-type-1", points)).await?;
        self.dispatch(&review_summation(&sid, points)).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Message builders
// ---------------------------------------------------------------------------

pub fn envelope(topic: &str, payload: Value) -> Value {
    json!({
        "topic": topic,
        "originator": "mmr-testkit",
        "timestamp": "2024-01-15T17:00:00.000Z",
        "mime-type": "application/json",
        "payload": payload
    })
}

pub fn registration(challenge_id: i64, user_id: i64) -> Value {
    envelope(
        "challenge.notification.events",
        json!({
            "type": "USER_REGISTRATION",
            "data": {"challengeId": challenge_id, "userId": user_id}
        }),
    )
}

pub fn review(submission_id: &str, type_id: &str, score: f64) -> Value {
    envelope(
        "submission.notification.aggregate",
        json!({
            "originalTopic": "submission.notification.create",
            "resource": "review",
            "submissionId": submission_id,
            "typeId": type_id,
            "score": score
        }),
    )
}

pub fn review_summation(submission_id: &str, aggregate_score: f64) -> Value {
    envelope(
        "submission.notification.aggregate",
        json!({
            "originalTopic": "submission.notification.create",
            "resource": "reviewSummation",
            "submissionId": submission_id,
            "aggregateScore": aggregate_score
        }),
    )
}

pub fn phase_end(project_id: i64, phase_type_name: &str, state: &str) -> Value {
    envelope(
        "notifications.autopilot.events",
        json!({
            "projectId": project_id,
            "phaseTypeName": phase_type_name,
            "state": state
        }),
    )
}
