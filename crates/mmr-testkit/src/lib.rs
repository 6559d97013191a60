//! In-memory doubles for the reconciliation engine.
//!
//! Scenario tests under `tests/` run the real dispatcher and processor
//! against these; no database or network required.

pub mod collab;
pub mod harness;
pub mod ledger;

pub use collab::{MemSequences, StaticRatings, StaticSubmissions};
pub use harness::{
    envelope, phase_end, registration, review, review_summation, Harness, CHALLENGE_ID,
    COMPONENT_ID, ROUND_ID,
};
pub use ledger::{FailPoint, LedgerState, MemLedger, MemTxn, RoundRow};
