// src/core/sequence.rs

//! Sequence Allocator (C2): gap-free, monotonically increasing per-channel
//! message ids, handed out in claimed blocks so a server can mint ids
//! locally between trips to the database.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::core::error::EngineResult;
use crate::core::metrics::SEQUENCE_BLOCKS_ACQUIRED_TOTAL;

/// Source of gap-free, monotonically increasing per-channel message ids.
/// Exists as a trait so the channel pipeline can be exercised in tests
/// against an in-memory implementation instead of a live database.
#[async_trait]
pub trait SequenceSource: Send + Sync {
    async fn ensure_channel(&self, channel_id: &str) -> EngineResult<()>;
    async fn next_id(&self, channel_id: &str) -> EngineResult<i64>;
}

/// An in-memory cursor over a claimed block: the next id to hand out, and
/// the first id past the end of the block (exclusive).
#[derive(Debug, Clone, Copy)]
struct Block {
    next: i64,
    end_exclusive: i64,
}

impl Block {
    fn take(&mut self) -> Option<i64> {
        if self.next < self.end_exclusive {
            let id = self.next;
            self.next += 1;
            Some(id)
        } else {
            None
        }
    }
}

/// Allocates gap-free, monotonic message ids per channel. Holds one claimed
/// block per channel in memory; exhausting a block claims the next one from
/// the database under a per-channel lock held across the claim so two
/// concurrent callers never observe the same id.
pub struct SequenceAllocator {
    pool: PgPool,
    block_size: i64,
    blocks: Mutex<HashMap<String, Block>>,
}

impl SequenceAllocator {
    pub fn new(pool: PgPool, block_size: i64) -> Self {
        Self {
            pool,
            block_size,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    async fn claim_block(&self, channel_id: &str) -> EngineResult<Block> {
        let mut tx = self.pool.begin().await?;
        let row: (i64,) = sqlx::query_as(
            "SELECT next_id FROM d_sequence WHERE channel_id = $1 FOR UPDATE",
        )
        .bind(channel_id)
        .fetch_one(&mut *tx)
        .await?;
        let start = row.0;
        let end_exclusive = start + self.block_size;
        sqlx::query("UPDATE d_sequence SET next_id = $1 WHERE channel_id = $2")
            .bind(end_exclusive)
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        SEQUENCE_BLOCKS_ACQUIRED_TOTAL.inc();
        Ok(Block {
            next: start,
            end_exclusive,
        })
    }
}

#[async_trait]
impl SequenceSource for SequenceAllocator {
    /// Ensures a sequence row exists for `channel_id`. Idempotent.
    async fn ensure_channel(&self, channel_id: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO d_sequence (channel_id, next_id)
            VALUES ($1, 1)
            ON CONFLICT (channel_id) DO NOTHING
            "#,
        )
        .bind(channel_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns the next id for `channel_id`, claiming a fresh block from the
    /// database if the cached block is exhausted or absent.
    async fn next_id(&self, channel_id: &str) -> EngineResult<i64> {
        let mut blocks = self.blocks.lock().await;
        if let Some(block) = blocks.get_mut(channel_id) {
            if let Some(id) = block.take() {
                return Ok(id);
            }
        }
        let block = self.claim_block(channel_id).await?;
        let mut block = block;
        let id = block.take().expect("freshly claimed block is non-empty");
        blocks.insert(channel_id.to_string(), block);
        Ok(id)
    }
}

/// An in-memory `SequenceSource` for tests and non-clustered embeddings that
/// don't want a database round-trip just to mint ids. Not gap-free across
/// restarts the way `SequenceAllocator` is.
#[derive(Default)]
pub struct InMemorySequenceSource {
    counters: Mutex<HashMap<String, i64>>,
}

impl InMemorySequenceSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceSource for InMemorySequenceSource {
    async fn ensure_channel(&self, channel_id: &str) -> EngineResult<()> {
        self.counters.lock().await.entry(channel_id.to_string()).or_insert(1);
        Ok(())
    }

    async fn next_id(&self, channel_id: &str) -> EngineResult<i64> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(channel_id.to_string()).or_insert(1);
        let id = *counter;
        *counter += 1;
        Ok(id)
    }
}
