use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use casechain_common::{Decision, PoolId, Result, Vote};
use casechain_ledger::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    /// The entry was finalized or evicted already.
    UnknownEntry,
    /// The entry is not in an open dispatch window: never sent, rebased
    /// since, or its window has closed.
    OutsideWindow,
}

/// Records delegate votes, one live vote per `(pool_id, voter)`.
#[derive(Clone)]
pub struct VoteRegistry {
    store: Arc<dyn LedgerStore>,
    window: chrono::Duration,
}

impl VoteRegistry {
    pub fn new(store: Arc<dyn LedgerStore>, window: chrono::Duration) -> Self {
        Self { store, window }
    }

    pub async fn record_vote(
        &self,
        pool_id: PoolId,
        voter_address: &str,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome> {
        let Some(entry) = self.store.pool_entry(pool_id).await? else {
            debug!("dropping vote from {} for unknown pool entry {}", voter_address, pool_id);
            return Ok(VoteOutcome::UnknownEntry);
        };
        if !entry.window_open(now, self.window) {
            debug!("dropping late vote from {} for pool entry {}", voter_address, pool_id);
            return Ok(VoteOutcome::OutsideWindow);
        }

        if !self.store.upsert_vote(Vote::new(pool_id, voter_address, decision, now)).await? {
            return Ok(VoteOutcome::UnknownEntry);
        }
        info!(
            target: "consensus",
            "EVENT:RECEIVE_VOTE pool_id={} voter={} decision={}",
            pool_id, voter_address, decision
        );
        Ok(VoteOutcome::Recorded)
    }
}
