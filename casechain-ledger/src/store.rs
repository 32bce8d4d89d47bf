//! store.rs
//!
//! The persistence contract used by the consensus components. Every method
//! that mutates more than one collection is atomic with respect to other
//! callers: a failed call leaves the store unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use casechain_common::{Block, PoolEntry, PoolId, Result, TrackedHead, Vote};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ---- finalized chains ----

    /// Last finalized block of a case, if any.
    async fn last_block(&self, case_id: &str) -> Result<Option<Block>>;

    async fn chain_length(&self, case_id: &str) -> Result<u64>;

    /// Blocks with `sequence_number >= from`, ascending.
    async fn blocks_from(&self, case_id: &str, from: u64) -> Result<Vec<Block>>;

    /// Every case with at least one finalized block, sorted.
    async fn case_ids(&self) -> Result<Vec<String>>;

    /// Appends a contiguous run of blocks. Each block must extend the one
    /// before it (sequence number and previous hash); otherwise nothing is
    /// written. Returns the new chain length.
    async fn append_blocks(&self, case_id: &str, blocks: Vec<Block>) -> Result<u64>;

    // ---- pool ----

    /// Stores a new candidate, assigning it a fresh pool id.
    async fn stage_entry(&self, entry: PoolEntry) -> Result<PoolEntry>;

    /// All candidates ordered by case id, then pool id.
    async fn pool_entries(&self) -> Result<Vec<PoolEntry>>;

    async fn pool_entry(&self, id: PoolId) -> Result<Option<PoolEntry>>;

    async fn pool_entries_for_case(&self, case_id: &str) -> Result<Vec<PoolEntry>>;

    /// Overwrites an existing candidate. Unknown ids are an error.
    async fn update_pool_entry(&self, entry: PoolEntry) -> Result<()>;

    /// Deletes a candidate together with its votes.
    async fn remove_pool_entry(&self, id: PoolId) -> Result<Option<PoolEntry>>;

    /// Records a dispatch round, but only while the candidate still has
    /// `expected_hash` (it was not rebased in between).
    async fn mark_dispatched(
        &self,
        id: PoolId,
        expected_hash: &str,
        at: DateTime<Utc>,
        attempt_count: u32,
    ) -> Result<bool>;

    /// Removes the candidate and its votes if it still has `expected_hash`.
    async fn evict_entry(&self, id: PoolId, expected_hash: &str) -> Result<bool>;

    // ---- votes ----

    /// Inserts or replaces the vote of `(pool_id, voter_address)`.
    /// Returns `false` when the pool entry no longer exists.
    async fn upsert_vote(&self, vote: Vote) -> Result<bool>;

    async fn votes_for(&self, id: PoolId) -> Result<Vec<Vote>>;

    async fn clear_votes(&self, id: PoolId) -> Result<()>;

    // ---- finalization ----

    /// Appends `block` and deletes candidate `id` with its votes, as one unit.
    /// Fails if the candidate is gone or the block does not extend the head.
    async fn finalize_entry(&self, id: PoolId, block: Block) -> Result<()>;

    // ---- lightweight client heads ----

    async fn tracked_head(&self, case_id: &str) -> Result<Option<TrackedHead>>;

    async fn tracked_heads(&self) -> Result<Vec<TrackedHead>>;

    async fn put_tracked_head(&self, head: TrackedHead) -> Result<()>;

    // ---- user/case access ----

    /// Returns `true` if the mapping was newly inserted.
    async fn grant_access(&self, username: &str, case_id: &str) -> Result<bool>;

    /// Returns `true` if a mapping was removed.
    async fn revoke_access(&self, username: &str, case_id: &str) -> Result<bool>;

    async fn cases_for_user(&self, username: &str) -> Result<Vec<String>>;
}
