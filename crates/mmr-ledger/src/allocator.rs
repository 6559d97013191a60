//! Block-allocated identifier generator.
//!
//! One [`IdAllocator`] per sequence name per process. Each instance keeps an
//! in-memory cursor over a block reserved from the durable
//! `id_sequences` row and refills it when the block is exhausted.
//!
//! # Guarantees
//! - No value is ever handed out twice, in this process or any other process
//!   sharing the sequence row: blocks are disjoint because the durable
//!   watermark is advanced in the same round-trip that reads it.
//! - Values are strictly increasing per sequence name.
//! - Ids left in a block when the process exits are lost, never reused.
//!   Gaps after a restart are expected.
//!
//! # Locking
//! The cursor and the refill share a single async mutex, so at most one
//! dispense or refill is in flight; callers await the lock instead of
//! spinning while a refill is outstanding.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::store::SequenceStore;
use crate::types::IdBlock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cursor {
    /// Next id to hand out. Meaningless while `remaining == 0`.
    next: i64,
    /// Ids left in the current block, `next` included.
    remaining: i64,
}

pub struct IdAllocator {
    name: String,
    store: Arc<dyn SequenceStore>,
    cursor: Mutex<Cursor>,
}

impl IdAllocator {
    pub fn new(name: impl Into<String>, store: Arc<dyn SequenceStore>) -> Self {
        Self {
            name: name.into(),
            store,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    /// Hand out the next identifier.
    ///
    /// On refill failure the cursor is left exactly as it was, so a retry
    /// re-attempts the same refill.
    pub async fn next_id(&self) -> Result<i64, StoreError> {
        let mut cursor = self.cursor.lock().await;

        if cursor.remaining <= 0 {
            let block = self.store.reserve_block(&self.name).await?;
            *cursor = Self::cursor_for(&self.name, block)?;
            debug!(
                sequence = %self.name,
                block_start = block.start,
                block_size = block.size,
                "reserved id block"
            );
        }

        let id = cursor.next;
        cursor.next += 1;
        cursor.remaining -= 1;
        debug!(sequence = %self.name, id, remaining = cursor.remaining, "allocated id");
        Ok(id)
    }

    /// Ids still available in memory before the next durable refill.
    pub async fn remaining(&self) -> i64 {
        self.cursor.lock().await.remaining
    }

    fn cursor_for(name: &str, block: IdBlock) -> Result<Cursor, StoreError> {
        if block.size <= 0 {
            return Err(StoreError::backend(format!(
                "sequence {name} has non-positive block size {}",
                block.size
            )));
        }
        Ok(Cursor {
            next: block.start,
            remaining: block.size,
        })
    }
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Hands out fixed-size blocks from a counter; can be told to fail.
    struct CountingStore {
        next_block_start: StdMutex<i64>,
        block_size: i64,
        refills: StdMutex<u32>,
        fail: StdMutex<bool>,
    }

    impl CountingStore {
        fn new(start: i64, size: i64) -> Self {
            Self {
                next_block_start: StdMutex::new(start),
                block_size: size,
                refills: StdMutex::new(0),
                fail: StdMutex::new(false),
            }
        }
    }

    #[async_trait]
    impl SequenceStore for CountingStore {
        async fn reserve_block(&self, _name: &str) -> Result<IdBlock, StoreError> {
            if *self.fail.lock().unwrap() {
                return Err(StoreError::backend("unavailable"));
            }
            let mut next = self.next_block_start.lock().unwrap();
            let block = IdBlock {
                start: *next,
                size: self.block_size,
            };
            *next += self.block_size;
            *self.refills.lock().unwrap() += 1;
            Ok(block)
        }
    }

    #[tokio::test]
    async fn first_call_refills_and_returns_block_start() {
        let store = Arc::new(CountingStore::new(1001, 3));
        let ids = IdAllocator::new("SEQ", store.clone());

        assert_eq!(ids.next_id().await.unwrap(), 1001);
        assert_eq!(ids.next_id().await.unwrap(), 1002);
        assert_eq!(ids.next_id().await.unwrap(), 1003);
        assert_eq!(*store.refills.lock().unwrap(), 1);

        // Block exhausted: exactly one more refill.
        assert_eq!(ids.next_id().await.unwrap(), 1004);
        assert_eq!(*store.refills.lock().unwrap(), 2);
        assert_eq!(ids.remaining().await, 2);
    }

    #[tokio::test]
    async fn failed_refill_leaves_cursor_untouched() {
        let store = Arc::new(CountingStore::new(10, 1));
        let ids = IdAllocator::new("SEQ", store.clone());

        assert_eq!(ids.next_id().await.unwrap(), 10);
        *store.fail.lock().unwrap() = true;
        assert!(ids.next_id().await.is_err());
        assert_eq!(ids.remaining().await, 0);

        *store.fail.lock().unwrap() = false;
        assert_eq!(ids.next_id().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn non_positive_block_size_is_rejected() {
        let store = Arc::new(CountingStore::new(10, 0));
        let ids = IdAllocator::new("SEQ", store);
        assert!(ids.next_id().await.is_err());
    }
}
