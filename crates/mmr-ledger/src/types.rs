//! Ledger row types shared by the processor and every store implementation.
//!
//! Column names in the Postgres schema follow the field names here one to one
//! (`long_component_state`, `long_comp_result`, `long_submission`,
//! `id_sequences`).

use serde::{Deserialize, Serialize};

/// Status written to a fresh component state row ("Passed System Test").
pub const STATUS_PASSED_SYSTEM_TEST: i32 = 150;

/// Sequence backing `long_component_state_id`.
pub const COMPONENT_STATE_SEQ: &str = "COMPONENT_STATE_SEQ";

/// Start of the first block when a sequence row does not exist yet.
pub const DEFAULT_BLOCK_START: i64 = 1001;

/// Block size used when a sequence row does not exist yet.
pub const DEFAULT_BLOCK_SIZE: i64 = 100;

// ---------------------------------------------------------------------------
// Flag
// ---------------------------------------------------------------------------

/// Single-character `Y`/`N` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    Y,
    N,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Y => "Y",
            Flag::N => "N",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Y" => Some(Flag::Y),
            "N" => Some(Flag::N),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Flag::Y)
    }
}

// ---------------------------------------------------------------------------
// Component state
// ---------------------------------------------------------------------------

/// Per-(round, coder) progress row. Created once at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub long_component_state_id: i64,
    pub round_id: i64,
    pub challenge_id: i64,
    pub coder_id: i64,
    pub component_id: i64,
    pub status_id: i32,
    /// Only ever increases.
    pub submission_number: i32,
    pub example_submission_number: i32,
    pub points: Option<f64>,
}

/// Fields a review event may change on an existing component state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentStateUpdate {
    pub points: Option<f64>,
    pub submission_number: Option<i32>,
}

// ---------------------------------------------------------------------------
// Result row
// ---------------------------------------------------------------------------

/// Composite key of `long_comp_result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub round_id: i64,
    pub challenge_id: i64,
    pub coder_id: i64,
}

/// Per-(round, coder) standing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub coder_id: i64,
    pub round_id: i64,
    pub challenge_id: i64,
    pub attended: Flag,
    /// 0 = unplaced.
    pub placed: i32,
    pub rated_ind: i32,
    pub advanced: Flag,
    pub system_point_total: Option<f64>,
    pub point_total: Option<f64>,
    pub old_rating: Option<i32>,
    pub old_vol: Option<i32>,
}

impl ResultRow {
    /// Row written at registration: not attended, unplaced, not advanced.
    pub fn registered(key: ResultKey, rated_ind: i32) -> Self {
        Self {
            coder_id: key.coder_id,
            round_id: key.round_id,
            challenge_id: key.challenge_id,
            attended: Flag::N,
            placed: 0,
            rated_ind,
            advanced: Flag::N,
            system_point_total: None,
            point_total: None,
            old_rating: None,
            old_vol: None,
        }
    }

    pub fn key(&self) -> ResultKey {
        ResultKey {
            round_id: self.round_id,
            challenge_id: self.challenge_id,
            coder_id: self.coder_id,
        }
    }
}

/// Partial update of a result row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultUpdate {
    pub system_point_total: Option<f64>,
    pub point_total: Option<f64>,
    pub attended: Option<Flag>,
    pub placed: Option<i32>,
    pub old_rating: Option<i32>,
    pub old_vol: Option<i32>,
}

/// Projection of a result row used by phase-end ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub coder_id: i64,
    pub attended: Flag,
    pub system_point_total: Option<f64>,
    pub placed: i32,
}

impl Standing {
    /// Score used for ranking. Unattended contestants rank as zero regardless
    /// of any stale aggregate total.
    pub fn ranking_points(&self) -> f64 {
        if self.attended.is_set() {
            self.system_point_total.unwrap_or(0.0)
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Submission history
// ---------------------------------------------------------------------------

/// Append-only `long_submission` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionHistoryRow {
    pub long_component_state_id: i64,
    pub round_id: i64,
    pub submission_number: i32,
    pub example: i32,
    /// Epoch seconds.
    pub open_time: i64,
    /// Epoch seconds.
    pub submit_time: i64,
    pub submission_points: f64,
    pub language_id: i32,
}

// ---------------------------------------------------------------------------
// Identifier sequences
// ---------------------------------------------------------------------------

/// A freshly reserved contiguous identifier range `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdBlock {
    pub start: i64,
    pub size: i64,
}

// ---------------------------------------------------------------------------
// Rating
// ---------------------------------------------------------------------------

/// Prior rating/volatility pair recorded at placement time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub rating: i32,
    pub vol: i32,
}

impl Default for Rating {
    fn default() -> Self {
        Self {
            rating: 1200,
            vol: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Contestant stage
// ---------------------------------------------------------------------------

/// Where a contestant sits in the registration -> placement lifecycle.
///
/// Derived from the two rows the ledger keeps per (round, coder); no column
/// stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContestantStage {
    Unregistered,
    Registered,
    Submitting,
    Scored,
    Placed,
}

impl ContestantStage {
    pub fn of(component: Option<&ComponentState>, result: Option<&ResultRow>) -> Self {
        match (component, result) {
            (None, None) => ContestantStage::Unregistered,
            (_, Some(r)) if r.placed > 0 => ContestantStage::Placed,
            (_, Some(r)) if r.attended.is_set() => ContestantStage::Scored,
            (Some(c), _) if c.submission_number > 0 => ContestantStage::Submitting,
            _ => ContestantStage::Registered,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContestantStage::Unregistered => "UNREGISTERED",
            ContestantStage::Registered => "REGISTERED",
            ContestantStage::Submitting => "SUBMITTING",
            ContestantStage::Scored => "SCORED",
            ContestantStage::Placed => "PLACED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(submissions: i32) -> ComponentState {
        ComponentState {
            long_component_state_id: 1001,
            round_id: 7,
            challenge_id: 30_000_001,
            coder_id: 42,
            component_id: 9,
            status_id: STATUS_PASSED_SYSTEM_TEST,
            submission_number: submissions,
            example_submission_number: 0,
            points: None,
        }
    }

    fn result() -> ResultRow {
        ResultRow::registered(
            ResultKey {
                round_id: 7,
                challenge_id: 30_000_001,
                coder_id: 42,
            },
            1,
        )
    }

    #[test]
    fn stage_follows_rows() {
        assert_eq!(ContestantStage::of(None, None), ContestantStage::Unregistered);

        let c = component(0);
        let mut r = result();
        assert_eq!(
            ContestantStage::of(Some(&c), Some(&r)),
            ContestantStage::Registered
        );

        let c = component(2);
        assert_eq!(
            ContestantStage::of(Some(&c), Some(&r)),
            ContestantStage::Submitting
        );

        r.attended = Flag::Y;
        assert_eq!(ContestantStage::of(Some(&c), Some(&r)), ContestantStage::Scored);

        r.placed = 3;
        assert_eq!(ContestantStage::of(Some(&c), Some(&r)), ContestantStage::Placed);
    }

    #[test]
    fn unattended_standing_ranks_as_zero() {
        let s = Standing {
            coder_id: 1,
            attended: Flag::N,
            system_point_total: Some(99.5),
            placed: 0,
        };
        assert_eq!(s.ranking_points(), 0.0);

        let s = Standing {
            attended: Flag::Y,
            ..s
        };
        assert_eq!(s.ranking_points(), 99.5);
    }

    #[test]
    fn flag_parse_roundtrip_and_rejects_garbage() {
        assert_eq!(Flag::parse("Y"), Some(Flag::Y));
        assert_eq!(Flag::parse(" N "), Some(Flag::N));
        assert_eq!(Flag::parse("yes"), None);
        assert_eq!(Flag::Y.as_str(), "Y");
    }

    #[test]
    fn registered_result_row_defaults() {
        let r = result();
        assert_eq!(r.attended, Flag::N);
        assert_eq!(r.advanced, Flag::N);
        assert_eq!(r.placed, 0);
        assert_eq!(r.rated_ind, 1);
    }
}
