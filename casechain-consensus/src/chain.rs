//! chain.rs
//!
//! Position and integrity of a case chain over the store. The hash itself
//! lives in `casechain_common::crypto::hash`.

use std::sync::Arc;

use casechain_common::{Block, Result};
use casechain_ledger::LedgerStore;

#[derive(Clone)]
pub struct HashChain {
    store: Arc<dyn LedgerStore>,
}

impl HashChain {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Where the next block of `case_id` goes: `(0, "")` for an empty case,
    /// otherwise one past the last block, linked to its hash.
    pub async fn next_position(&self, case_id: &str) -> Result<(u64, String)> {
        Ok(match self.store.last_block(case_id).await? {
            Some(last) => (last.sequence_number + 1, last.hash),
            None => (0, String::new()),
        })
    }

    /// Walks the whole chain from sequence 0, recomputing every hash and link.
    /// An unknown case does not verify.
    pub async fn verify_case(&self, case_id: &str) -> Result<bool> {
        let blocks = self.store.blocks_from(case_id, 0).await?;
        if blocks.is_empty() {
            return Ok(false);
        }
        Ok(verify_blocks(&blocks))
    }
}

/// True iff `blocks` form a valid chain starting at the genesis position.
pub fn verify_blocks(blocks: &[Block]) -> bool {
    let mut previous_hash = "";
    for (seq, block) in blocks.iter().enumerate() {
        if block.sequence_number != seq as u64
            || block.previous_hash != previous_hash
            || !block.is_hash_valid()
        {
            return false;
        }
        previous_hash = &block.hash;
    }
    true
}
