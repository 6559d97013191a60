//! Canned collaborators: sequences, submissions and ratings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use async_trait::async_trait;

use mmr_ledger::{
    IdBlock, LookupError, Rating, RatingLookup, SequenceStore, StoreError, SubmissionLookup,
    SubmissionRecord, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_START,
};

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// Durable-sequence stand-in. Survives any number of [`IdAllocator`]
/// instances, which is how tests model a process restart.
///
/// [`IdAllocator`]: mmr_ledger::IdAllocator
#[derive(Default)]
pub struct MemSequences {
    /// name -> (next_block_start, block_size)
    rows: StdMutex<HashMap<String, (i64, i64)>>,
    reservations: AtomicU32,
    fail: AtomicBool,
}

impl MemSequences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(name: &str, next_block_start: i64, block_size: i64) -> Self {
        let s = Self::default();
        s.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), (next_block_start, block_size));
        s
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn reservations(&self) -> u32 {
        self.reservations.load(Ordering::SeqCst)
    }

    pub fn next_block_start(&self, name: &str) -> Option<i64> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).get(name).map(|r| r.0)
    }
}

#[async_trait]
impl SequenceStore for MemSequences {
    async fn reserve_block(&self, name: &str) -> Result<IdBlock, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::backend("sequence store unavailable"));
        }
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let row = rows
            .entry(name.to_string())
            .or_insert((DEFAULT_BLOCK_START, DEFAULT_BLOCK_SIZE));
        let block = IdBlock {
            start: row.0,
            size: row.1,
        };
        row.0 += row.1;
        self.reservations.fetch_add(1, Ordering::SeqCst);
        Ok(block)
    }
}

// ---------------------------------------------------------------------------
// Submissions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticSubmissions {
    records: StdMutex<HashMap<String, SubmissionRecord>>,
    calls: AtomicU32,
}

impl StaticSubmissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: SubmissionRecord) {
        let id = record.id.clone().unwrap_or_default();
        self.records.lock().unwrap_or_else(PoisonError::into_inner).insert(id, record);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubmissionLookup for StaticSubmissions {
    async fn submission(&self, submission_id: &str) -> Result<SubmissionRecord, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(submission_id)
            .cloned()
            .ok_or_else(|| {
                LookupError::with_status(
                    404,
                    format!("Submission with ID = {submission_id} is not found"),
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Ratings
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticRatings {
    ratings: StdMutex<HashMap<i64, Rating>>,
    fail: AtomicBool,
}

impl StaticRatings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, coder_id: i64, rating: Rating) {
        self.ratings.lock().unwrap_or_else(PoisonError::into_inner).insert(coder_id, rating);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RatingLookup for StaticRatings {
    async fn rating(&self, coder_id: i64) -> Result<Rating, LookupError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LookupError::new("rating source unavailable"));
        }
        Ok(self
            .ratings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&coder_id)
            .copied()
            .unwrap_or_default())
    }
}
