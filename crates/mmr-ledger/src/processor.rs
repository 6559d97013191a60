//! Event-to-ledger state transitions.
//!
//! Each handler runs one transition inside one ledger transaction: either
//! every write commits or none does. Collaborator lookups that do not need
//! the ledger happen before the transaction opens.
//!
//! A challenge without a round of the managed type is filtered, not failed:
//! the handler logs it and returns [`Outcome::Ignored`] without writing.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{debug, error, info};

use crate::allocator::IdAllocator;
use crate::collab::{RatingLookup, SubmissionLookup};
use crate::error::EngineError;
use crate::ranking;
use crate::schema::{AggregateScoreEvent, PhaseEndEvent, RegistrationEvent, ReviewEvent};
use crate::store::{LedgerStore, LedgerTxn};
use crate::time;
use crate::types::{
    ComponentState, ComponentStateUpdate, ContestantStage, Flag, ResultKey, ResultRow,
    ResultUpdate, SubmissionHistoryRow, STATUS_PASSED_SYSTEM_TEST,
};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Successful handler result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The transition committed.
    Applied,
    /// Deliberately not applied; nothing was written.
    Ignored(IgnoreReason),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No round of the managed type for this challenge.
    RoundNotFound { challenge_id: i64 },
    /// Review type is on the ignore list.
    ReviewTypeIgnored { type_id: String },
    /// Phase-end event for a phase/state other than the scoring-phase end.
    NotScoringPhaseEnd { phase: String, state: String },
    /// Challenge notification that is not a user registration.
    NotUserRegistration,
    /// Submission aggregate event whose `originalTopic` is not submission create.
    OriginalTopicMismatch,
    /// Submission aggregate event for a resource other than review/summation.
    ResourceMismatch,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::RoundNotFound { challenge_id } => {
                write!(f, "no marathon match round for challenge {challenge_id}")
            }
            IgnoreReason::ReviewTypeIgnored { type_id } => {
                write!(f, "review type {type_id} is ignored")
            }
            IgnoreReason::NotScoringPhaseEnd { phase, state } => {
                write!(f, "phase {phase}/{state} is not the scoring phase end")
            }
            IgnoreReason::NotUserRegistration => f.write_str("not a user registration"),
            IgnoreReason::OriginalTopicMismatch => f.write_str("originalTopic doesn't match"),
            IgnoreReason::ResourceMismatch => f.write_str("resource doesn't match"),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// What a re-delivered phase-end does to contestants that already hold a
/// placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseEndPolicy {
    /// Always rewrite placement and prior rating/volatility.
    #[default]
    Recompute,
    /// Rank everyone, but leave rows with a non-zero placement untouched.
    SkipPlaced,
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub round_type_id: i32,
    pub language_id: i32,
    pub submission_time_zone: Tz,
    pub scoring_phase_name: String,
    pub phase_end_state: String,
    pub ignored_review_type_ids: HashSet<String>,
    pub phase_end_policy: PhaseEndPolicy,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            round_type_id: 13,
            language_id: 9,
            submission_time_zone: chrono_tz::America::New_York,
            scoring_phase_name: "Review".to_string(),
            phase_end_state: "End".to_string(),
            ignored_review_type_ids: HashSet::new(),
            phase_end_policy: PhaseEndPolicy::Recompute,
        }
    }
}

// ---------------------------------------------------------------------------
// EventProcessor
// ---------------------------------------------------------------------------

pub struct EventProcessor<S: LedgerStore> {
    store: S,
    ids: Arc<IdAllocator>,
    submissions: Arc<dyn SubmissionLookup>,
    ratings: Arc<dyn RatingLookup>,
    settings: ProcessorSettings,
}

impl<S: LedgerStore> EventProcessor<S> {
    pub fn new(
        store: S,
        ids: Arc<IdAllocator>,
        submissions: Arc<dyn SubmissionLookup>,
        ratings: Arc<dyn RatingLookup>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            ids,
            submissions,
            ratings,
            settings,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Registration: Unregistered -> Registered
    // -----------------------------------------------------------------------

    pub async fn process_registration(
        &self,
        ev: &RegistrationEvent,
    ) -> Result<Outcome, EngineError> {
        info!(
            challenge_id = ev.challenge_id,
            user_id = ev.user_id,
            "processing marathon match registration"
        );
        let res = match self.store.begin().await {
            Ok(mut tx) => {
                let res = self.register(&mut tx, ev).await;
                finish(tx, res).await
            }
            Err(e) => Err(e.into()),
        };
        log_boundary("registration", &res);
        res
    }

    async fn register(
        &self,
        tx: &mut S::Txn,
        ev: &RegistrationEvent,
    ) -> Result<Outcome, EngineError> {
        let Some(round_id) = self.round_for(tx, ev.challenge_id).await? else {
            return Ok(round_not_found(ev.challenge_id));
        };

        let long_component_state_id = self
            .ids
            .next_id()
            .await
            .map_err(EngineError::Allocator)?;
        debug!(long_component_state_id, "allocated component state id");

        let component_id = tx.component_id(round_id).await?.ok_or_else(|| {
            EngineError::Precondition(format!("no component for round {round_id}"))
        })?;

        tx.insert_component_state(&ComponentState {
            long_component_state_id,
            round_id,
            challenge_id: ev.challenge_id,
            coder_id: ev.user_id,
            component_id,
            status_id: STATUS_PASSED_SYSTEM_TEST,
            submission_number: 0,
            example_submission_number: 0,
            points: None,
        })
        .await?;

        let rated_ind = tx.rated_ind(round_id).await?.ok_or_else(|| {
            EngineError::Precondition(format!("no rated indicator for round {round_id}"))
        })?;

        tx.insert_result(&ResultRow::registered(
            ResultKey {
                round_id,
                challenge_id: ev.challenge_id,
                coder_id: ev.user_id,
            },
            rated_ind,
        ))
        .await?;

        info!(round_id, coder_id = ev.user_id, "registered contestant");
        Ok(Outcome::Applied)
    }

    // -----------------------------------------------------------------------
    // Review: Registered/Submitting -> Submitting
    // -----------------------------------------------------------------------

    pub async fn process_review(&self, ev: &ReviewEvent) -> Result<Outcome, EngineError> {
        info!(submission_id = %ev.submission_id, "processing marathon match review");

        if self.settings.ignored_review_type_ids.contains(&ev.type_id) {
            info!(type_id = %ev.type_id, "review is ignored");
            return Ok(Outcome::Ignored(IgnoreReason::ReviewTypeIgnored {
                type_id: ev.type_id.clone(),
            }));
        }

        let res = self.review(ev).await;
        log_boundary("review", &res);
        res
    }

    async fn review(&self, ev: &ReviewEvent) -> Result<Outcome, EngineError> {
        let sub = self.submissions.submission(&ev.submission_id).await?;
        let created = sub.created.as_deref().ok_or_else(|| {
            EngineError::Precondition(format!(
                "No submission time for submission {}",
                ev.submission_id
            ))
        })?;
        let submit_time = time::epoch_seconds(created, self.settings.submission_time_zone)
            .ok_or_else(|| {
                EngineError::Collaborator(format!(
                    "unparseable submission time {created:?} for submission {}",
                    ev.submission_id
                ))
            })?;
        let member_id = require(sub.member_id, "memberId", &ev.submission_id)?;
        let challenge_id = require(sub.challenge_id, "challengeId", &ev.submission_id)?;

        let mut tx = self.store.begin().await?;
        let res = self
            .record_review(&mut tx, ev, challenge_id, member_id, submit_time)
            .await;
        finish(tx, res).await
    }

    async fn record_review(
        &self,
        tx: &mut S::Txn,
        ev: &ReviewEvent,
        challenge_id: i64,
        member_id: i64,
        submit_time: i64,
    ) -> Result<Outcome, EngineError> {
        let Some(round_id) = self.round_for(tx, challenge_id).await? else {
            return Ok(round_not_found(challenge_id));
        };

        let state = tx.component_state(round_id, member_id).await?;
        let state = match state {
            Some(s) => s,
            None => {
                return Err(EngineError::Precondition(format!(
                    "no component state for round {round_id} coder {member_id} (stage {})",
                    ContestantStage::Unregistered.as_str()
                )))
            }
        };

        let submission_number = state.submission_number + 1;
        tx.insert_submission_history(&SubmissionHistoryRow {
            long_component_state_id: state.long_component_state_id,
            round_id,
            submission_number,
            example: 0,
            open_time: submit_time,
            submit_time,
            submission_points: ev.score,
            language_id: self.settings.language_id,
        })
        .await?;

        let touched = tx
            .update_component_state(
                state.long_component_state_id,
                &ComponentStateUpdate {
                    points: Some(ev.score),
                    submission_number: Some(submission_number),
                },
            )
            .await?;
        if touched == 0 {
            return Err(EngineError::Precondition(format!(
                "component state {} vanished during review",
                state.long_component_state_id
            )));
        }

        info!(round_id, coder_id = member_id, submission_number, "recorded review");
        Ok(Outcome::Applied)
    }

    // -----------------------------------------------------------------------
    // Aggregate score: Submitting -> Scored
    // -----------------------------------------------------------------------

    pub async fn process_aggregate_score(
        &self,
        ev: &AggregateScoreEvent,
    ) -> Result<Outcome, EngineError> {
        info!(submission_id = %ev.submission_id, "processing marathon match review summation");

        let res = self.aggregate(ev).await;
        log_boundary("review summation", &res);
        res
    }

    async fn aggregate(&self, ev: &AggregateScoreEvent) -> Result<Outcome, EngineError> {
        let sub = self.submissions.submission(&ev.submission_id).await?;
        let legacy_submission_id =
            require(sub.legacy_submission_id, "legacySubmissionId", &ev.submission_id)?;
        let member_id = require(sub.member_id, "memberId", &ev.submission_id)?;
        let challenge_id = require(sub.challenge_id, "challengeId", &ev.submission_id)?;

        let mut tx = self.store.begin().await?;
        let res = self
            .record_aggregate(&mut tx, ev, challenge_id, member_id, legacy_submission_id)
            .await;
        finish(tx, res).await
    }

    async fn record_aggregate(
        &self,
        tx: &mut S::Txn,
        ev: &AggregateScoreEvent,
        challenge_id: i64,
        member_id: i64,
        legacy_submission_id: i64,
    ) -> Result<Outcome, EngineError> {
        let Some(round_id) = self.round_for(tx, challenge_id).await? else {
            return Ok(round_not_found(challenge_id));
        };

        let initial_score = tx.initial_score(legacy_submission_id).await?.ok_or_else(|| {
            EngineError::Precondition(format!(
                "no initial score for legacy submission {legacy_submission_id}"
            ))
        })?;

        let key = ResultKey {
            round_id,
            challenge_id,
            coder_id: member_id,
        };
        let current = tx.result_row(&key).await?;
        if ContestantStage::of(None, current.as_ref()) == ContestantStage::Unregistered {
            return Err(EngineError::Precondition(format!(
                "no result row for round {round_id} coder {member_id}"
            )));
        }

        let touched = tx
            .update_result(
                &key,
                &ResultUpdate {
                    system_point_total: Some(ev.aggregate_score),
                    point_total: Some(initial_score),
                    attended: Some(Flag::Y),
                    ..ResultUpdate::default()
                },
            )
            .await?;
        if touched == 0 {
            return Err(EngineError::Precondition(format!(
                "result row for round {round_id} coder {member_id} vanished during update"
            )));
        }

        info!(round_id, coder_id = member_id, "recorded aggregate score");
        Ok(Outcome::Applied)
    }

    // -----------------------------------------------------------------------
    // Phase end: Scored -> Placed (whole round)
    // -----------------------------------------------------------------------

    pub async fn process_phase_end(&self, ev: &PhaseEndEvent) -> Result<Outcome, EngineError> {
        if ev.phase_type_name != self.settings.scoring_phase_name
            || ev.state != self.settings.phase_end_state
        {
            info!(
                phase = %ev.phase_type_name,
                state = %ev.state,
                "ignore this event, only process review end event"
            );
            return Ok(Outcome::Ignored(IgnoreReason::NotScoringPhaseEnd {
                phase: ev.phase_type_name.clone(),
                state: ev.state.clone(),
            }));
        }

        info!(project_id = ev.project_id, "processing marathon match review end");
        let res = match self.store.begin().await {
            Ok(mut tx) => {
                let res = self.place(&mut tx, ev).await;
                finish(tx, res).await
            }
            Err(e) => Err(e.into()),
        };
        log_boundary("review end", &res);
        res
    }

    async fn place(&self, tx: &mut S::Txn, ev: &PhaseEndEvent) -> Result<Outcome, EngineError> {
        let Some(round_id) = self.round_for(tx, ev.project_id).await? else {
            return Ok(round_not_found(ev.project_id));
        };

        let standings = tx.standings(round_id).await?;
        let already_placed: HashMap<i64, i32> = standings
            .iter()
            .map(|s| (s.coder_id, s.placed))
            .collect();

        let ranked = ranking::rank(&standings);
        for r in &ranked {
            if self.settings.phase_end_policy == PhaseEndPolicy::SkipPlaced
                && already_placed.get(&r.coder_id).copied().unwrap_or(0) != 0
            {
                debug!(coder_id = r.coder_id, "already placed, skipping");
                continue;
            }

            let rating = self
                .ratings
                .rating(r.coder_id)
                .await
                .map_err(EngineError::from)?;

            let key = ResultKey {
                round_id,
                challenge_id: ev.project_id,
                coder_id: r.coder_id,
            };
            let touched = tx
                .update_result(
                    &key,
                    &ResultUpdate {
                        placed: Some(r.placement),
                        old_rating: Some(rating.rating),
                        old_vol: Some(rating.vol),
                        ..ResultUpdate::default()
                    },
                )
                .await?;
            if touched == 0 {
                return Err(EngineError::Precondition(format!(
                    "result row for round {round_id} coder {} does not match challenge {}",
                    r.coder_id, ev.project_id
                )));
            }
            debug!(coder_id = r.coder_id, placed = r.placement, "placed contestant");
        }

        info!(round_id, contestants = ranked.len(), "placed round");
        Ok(Outcome::Applied)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn round_for(
        &self,
        tx: &mut S::Txn,
        challenge_id: i64,
    ) -> Result<Option<i64>, EngineError> {
        let round = tx
            .find_round_id(challenge_id, self.settings.round_type_id)
            .await?;
        if round.is_none() {
            info!(
                challenge_id,
                "marathon match doesn't exist for challenge, ignore this event"
            );
        }
        Ok(round)
    }
}

/// Commit on `Ok`, roll back on `Err`. A failed rollback is logged; the
/// original error is what the caller sees.
async fn finish<T: LedgerTxn>(
    tx: T,
    res: Result<Outcome, EngineError>,
) -> Result<Outcome, EngineError> {
    match res {
        Ok(outcome) => {
            tx.commit().await?;
            Ok(outcome)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}

fn round_not_found(challenge_id: i64) -> Outcome {
    Outcome::Ignored(IgnoreReason::RoundNotFound { challenge_id })
}

fn require(v: Option<i64>, field: &str, submission_id: &str) -> Result<i64, EngineError> {
    v.ok_or_else(|| {
        EngineError::Precondition(format!("No {field} for submission {submission_id}"))
    })
}

fn log_boundary(what: &str, res: &Result<Outcome, EngineError>) {
    match res {
        Ok(Outcome::Applied) => info!("completed processing marathon match {what} event"),
        Ok(Outcome::Ignored(reason)) => info!(%reason, "ignored marathon match {what} event"),
        Err(e) => error!(error = %e, kind = e.kind().as_str(), "error in processing marathon match {what} event"),
    }
}
