//! Ledger Store contract.
//!
//! The engine never talks to a database directly. It opens a [`LedgerTxn`]
//! from a [`LedgerStore`], performs every read and write of one transition
//! through it, then commits. Dropping a transaction without committing must
//! discard all of its writes.
//!
//! Required isolation: read-committed or stronger, with row-level write locks
//! held until commit. Unique-key collisions on insert must surface as
//! [`StoreError::Duplicate`].
//!
//! The durable identifier watermark lives behind [`SequenceStore`], outside
//! ledger transactions: a reserved block stays reserved even when the
//! transition that asked for it rolls back.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{
    ComponentState, ComponentStateUpdate, IdBlock, ResultKey, ResultRow, ResultUpdate, Standing,
    SubmissionHistoryRow,
};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Txn: LedgerTxn;

    async fn begin(&self) -> Result<Self::Txn, StoreError>;
}

/// One open unit of work against the ledger.
#[async_trait]
pub trait LedgerTxn: Send {
    /// First round of `round_type_id` owned by `challenge_id`.
    async fn find_round_id(
        &mut self,
        challenge_id: i64,
        round_type_id: i32,
    ) -> Result<Option<i64>, StoreError>;

    async fn component_id(&mut self, round_id: i64) -> Result<Option<i64>, StoreError>;

    async fn rated_ind(&mut self, round_id: i64) -> Result<Option<i32>, StoreError>;

    async fn component_state(
        &mut self,
        round_id: i64,
        coder_id: i64,
    ) -> Result<Option<ComponentState>, StoreError>;

    async fn component_state_by_id(
        &mut self,
        long_component_state_id: i64,
    ) -> Result<Option<ComponentState>, StoreError>;

    async fn insert_component_state(&mut self, row: &ComponentState) -> Result<(), StoreError>;

    /// Returns the number of rows touched (0 or 1).
    async fn update_component_state(
        &mut self,
        long_component_state_id: i64,
        update: &ComponentStateUpdate,
    ) -> Result<u64, StoreError>;

    async fn result_row(&mut self, key: &ResultKey) -> Result<Option<ResultRow>, StoreError>;

    async fn insert_result(&mut self, row: &ResultRow) -> Result<(), StoreError>;

    /// Returns the number of rows touched (0 or 1).
    async fn update_result(
        &mut self,
        key: &ResultKey,
        update: &ResultUpdate,
    ) -> Result<u64, StoreError>;

    async fn standings(&mut self, round_id: i64) -> Result<Vec<Standing>, StoreError>;

    async fn insert_submission_history(
        &mut self,
        row: &SubmissionHistoryRow,
    ) -> Result<(), StoreError>;

    /// Initial score of the submission with this legacy id.
    ///
    /// `Ok(None)` means no such submission; a submission without a recorded
    /// score yields `Ok(Some(0.0))`.
    async fn initial_score(&mut self, legacy_submission_id: i64)
        -> Result<Option<f64>, StoreError>;

    async fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;

    async fn rollback(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

/// Durable block counter behind [`IdAllocator`](crate::IdAllocator).
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Read `next_block_start`/`block_size` for `name` and advance
    /// `next_block_start` by `block_size` in the same round-trip. A missing
    /// row is created with the default starting block.
    async fn reserve_block(&self, name: &str) -> Result<IdBlock, StoreError>;
}

#[async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    type Txn = T::Txn;

    async fn begin(&self) -> Result<Self::Txn, StoreError> {
        (**self).begin().await
    }
}

#[async_trait]
impl<T: SequenceStore + ?Sized> SequenceStore for Arc<T> {
    async fn reserve_block(&self, name: &str) -> Result<IdBlock, StoreError> {
        (**self).reserve_block(name).await
    }
}
