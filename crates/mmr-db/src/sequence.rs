//! Durable block counter for `IdAllocator`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use mmr_ledger::{IdBlock, SequenceStore, StoreError, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_START};

use crate::backend_error;

/// `id_sequences` outside any ledger transaction.
///
/// The allocator refills while the caller holds a ledger transaction, so the
/// pool given here must be separate from the ledger's (see
/// [`crate::connect_side_pool`]). Sharing one pool deadlocks once every
/// connection is held by a transaction waiting on a refill.
#[derive(Clone)]
pub struct PgSequenceStore {
    pool: PgPool,
}

impl PgSequenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SequenceStore for PgSequenceStore {
    /// Read and advance the watermark in one statement. The row lock taken by
    /// the upsert serializes concurrent reservations across processes.
    async fn reserve_block(&self, name: &str) -> Result<IdBlock, StoreError> {
        let row = sqlx::query(
            r#"
            insert into id_sequences (name, next_block_start, block_size)
            values ($1, $2 + $3, $3)
            on conflict (name) do update
              set next_block_start = id_sequences.next_block_start + id_sequences.block_size
            returning next_block_start - block_size as block_start, block_size
            "#,
        )
        .bind(name)
        .bind(DEFAULT_BLOCK_START)
        .bind(DEFAULT_BLOCK_SIZE)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend_error(e, "reserve_block"))?;

        let start: i64 = row
            .try_get("block_start")
            .map_err(|e| backend_error(e, "reserve_block decode"))?;
        let size: i64 = row
            .try_get("block_size")
            .map_err(|e| backend_error(e, "reserve_block decode"))?;

        Ok(IdBlock { start, size })
    }
}
