//! mmr-ledger
//!
//! Marathon-match reconciliation engine: turns registration, review,
//! review-summation and phase-end events into ledger writes.
//!
//! Pure logic plus the storage/collaborator traits. Postgres, HTTP and
//! configuration live in sibling crates.

pub mod allocator;
pub mod collab;
pub mod dispatch;
pub mod error;
pub mod processor;
pub mod ranking;
pub mod schema;
pub mod store;
pub mod time;
pub mod types;

pub use allocator::IdAllocator;
pub use collab::{RatingLookup, SubmissionLookup, SubmissionRecord};
pub use dispatch::{route, DispatchOutcome, Dispatcher, Routed, Topics};
pub use error::{EngineError, ErrorKind, LookupError, StoreError};
pub use processor::{EventProcessor, IgnoreReason, Outcome, PhaseEndPolicy, ProcessorSettings};
pub use ranking::{rank, Ranked};
pub use schema::{
    AggregateScoreEvent, MessageEnvelope, PhaseEndEvent, RegistrationEvent, ReviewEvent,
};
pub use store::{LedgerStore, LedgerTxn, SequenceStore};
pub use types::*;
