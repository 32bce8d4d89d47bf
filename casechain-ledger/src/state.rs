use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use casechain_common::{Block, CaseChainError, PoolEntry, PoolId, Result, TrackedHead, Vote};

/// Plain in-memory collections behind [`crate::MemoryLedger`].
///
/// All checks happen before any mutation so a rejected call leaves the
/// state untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub chains: BTreeMap<String, Vec<Block>>,
    pub pool: BTreeMap<PoolId, PoolEntry>,
    /// pool id → voter address → vote
    pub votes: BTreeMap<PoolId, HashMap<String, Vote>>,
    pub heads: BTreeMap<String, TrackedHead>,
    /// username → case ids
    pub access: BTreeMap<String, BTreeSet<String>>,
    pub next_pool_id: u64,
}

impl LedgerState {
    pub fn chain(&self, case_id: &str) -> &[Block] {
        self.chains.get(case_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_block(&self, case_id: &str) -> Option<&Block> {
        self.chain(case_id).last()
    }

    pub fn chain_length(&self, case_id: &str) -> u64 {
        self.chain(case_id).len() as u64
    }

    /// Checks that `blocks` extend the current chain without gaps.
    fn check_extends(&self, case_id: &str, blocks: &[Block]) -> Result<()> {
        let mut length = self.chain_length(case_id);
        let mut head = self
            .last_block(case_id)
            .map(|b| b.hash.clone())
            .unwrap_or_default();

        for block in blocks {
            if block.case_id != case_id {
                return Err(CaseChainError::Storage(format!(
                    "block for case {} appended to case {}",
                    block.case_id, case_id
                )));
            }
            if block.sequence_number != length {
                return Err(CaseChainError::Storage(format!(
                    "case {}: expected sequence {}, got {}",
                    case_id, length, block.sequence_number
                )));
            }
            if block.previous_hash != head {
                return Err(CaseChainError::Storage(format!(
                    "case {}: block {} does not link to head",
                    case_id, block.sequence_number
                )));
            }
            length += 1;
            head = block.hash.clone();
        }
        Ok(())
    }

    pub fn append_blocks(&mut self, case_id: &str, blocks: Vec<Block>) -> Result<u64> {
        self.check_extends(case_id, &blocks)?;
        if blocks.is_empty() {
            return Ok(self.chain_length(case_id));
        }
        let chain = self.chains.entry(case_id.to_string()).or_default();
        chain.extend(blocks);
        Ok(chain.len() as u64)
    }

    pub fn stage_entry(&mut self, mut entry: PoolEntry) -> PoolEntry {
        self.next_pool_id += 1;
        entry.id = PoolId(self.next_pool_id);
        self.pool.insert(entry.id, entry.clone());
        entry
    }

    pub fn pool_entries(&self) -> Vec<PoolEntry> {
        let mut entries: Vec<PoolEntry> = self.pool.values().cloned().collect();
        entries.sort_by(|a, b| a.case_id.cmp(&b.case_id).then(a.id.cmp(&b.id)));
        entries
    }

    pub fn update_pool_entry(&mut self, entry: PoolEntry) -> Result<()> {
        match self.pool.get_mut(&entry.id) {
            Some(slot) => {
                *slot = entry;
                Ok(())
            }
            None => Err(CaseChainError::Storage(format!("unknown pool entry {}", entry.id))),
        }
    }

    pub fn remove_pool_entry(&mut self, id: PoolId) -> Option<PoolEntry> {
        self.votes.remove(&id);
        self.pool.remove(&id)
    }

    pub fn mark_dispatched(&mut self, id: PoolId, expected_hash: &str, at: DateTime<Utc>, attempt_count: u32) -> bool {
        match self.pool.get_mut(&id) {
            Some(entry) if entry.hash == expected_hash => {
                entry.dispatch_time = Some(at);
                entry.attempt_count = attempt_count;
                true
            }
            _ => false,
        }
    }

    pub fn evict_entry(&mut self, id: PoolId, expected_hash: &str) -> bool {
        let current = self.pool.get(&id).is_some_and(|e| e.hash == expected_hash);
        current && self.remove_pool_entry(id).is_some()
    }

    pub fn upsert_vote(&mut self, vote: Vote) -> bool {
        if !self.pool.contains_key(&vote.pool_id) {
            return false;
        }
        self.votes
            .entry(vote.pool_id)
            .or_default()
            .insert(vote.voter_address.clone(), vote);
        true
    }

    pub fn votes_for(&self, id: PoolId) -> Vec<Vote> {
        let mut votes: Vec<Vote> = self
            .votes
            .get(&id)
            .map(|by_voter| by_voter.values().cloned().collect())
            .unwrap_or_default();
        votes.sort_by(|a, b| a.voter_address.cmp(&b.voter_address));
        votes
    }

    pub fn finalize_entry(&mut self, id: PoolId, block: Block) -> Result<()> {
        match self.pool.get(&id) {
            None => {
                return Err(CaseChainError::Consensus(format!(
                    "pool entry {} is no longer pending",
                    id
                )))
            }
            Some(entry) if entry.hash != block.hash => {
                return Err(CaseChainError::Consensus(format!(
                    "pool entry {} changed since it was read",
                    id
                )))
            }
            Some(_) => {}
        }
        let case_id = block.case_id.clone();
        self.check_extends(&case_id, std::slice::from_ref(&block))?;

        self.chains.entry(case_id).or_default().push(block);
        self.remove_pool_entry(id);
        Ok(())
    }

    pub fn grant_access(&mut self, username: &str, case_id: &str) -> bool {
        self.access
            .entry(username.to_string())
            .or_default()
            .insert(case_id.to_string())
    }

    pub fn revoke_access(&mut self, username: &str, case_id: &str) -> bool {
        let Some(cases) = self.access.get_mut(username) else {
            return false;
        };
        let removed = cases.remove(case_id);
        if cases.is_empty() {
            self.access.remove(username);
        }
        removed
    }

    pub fn cases_for_user(&self, username: &str) -> Vec<String> {
        self.access
            .get(username)
            .map(|cases| cases.iter().cloned().collect())
            .unwrap_or_default()
    }
}
