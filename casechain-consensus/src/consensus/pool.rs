use std::sync::Arc;

use tracing::{debug, info};

use casechain_common::{utils::time::now, PoolEntry, Result};
use casechain_ledger::LedgerStore;

use crate::chain::HashChain;

/// Candidates waiting for quorum, positioned against the current case head.
#[derive(Clone)]
pub struct PoolStore {
    store: Arc<dyn LedgerStore>,
    chain: HashChain,
}

impl PoolStore {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let chain = HashChain::new(store.clone());
        Self { store, chain }
    }

    /// Stages a new action on top of the case head, undispatched.
    pub async fn stage(&self, case_id: &str, metadata: &str, log: &str) -> Result<PoolEntry> {
        let (sequence_number, previous_hash) = self.chain.next_position(case_id).await?;
        let entry = PoolEntry::new(case_id, metadata, log, now(), sequence_number, previous_hash);
        let entry = self.store.stage_entry(entry).await?;

        info!(
            target: "consensus",
            "EVENT:STAGE case={} pool_id={} seq={} hash={}",
            entry.case_id, entry.id, entry.sequence_number, entry.hash
        );
        Ok(entry)
    }

    /// Every candidate, ordered by case id.
    pub async fn list_pending(&self) -> Result<Vec<PoolEntry>> {
        self.store.pool_entries().await
    }

    /// Moves every candidate of `case_id` that is not positioned on the
    /// current head onto it: new position and hash, votes cleared, dispatch
    /// state reset. A candidate removed in the meantime is skipped; returns
    /// how many were rebased.
    pub async fn rebase_after_finalize(&self, case_id: &str) -> Result<usize> {
        let (sequence_number, previous_hash) = self.chain.next_position(case_id).await?;
        let stale = self
            .store
            .pool_entries_for_case(case_id)
            .await?
            .into_iter()
            .filter(|e| !e.is_positioned_at(sequence_number, &previous_hash));

        let mut rebased = 0;
        for mut entry in stale {
            entry.rebase(sequence_number, previous_hash.clone());
            let (id, hash) = (entry.id, entry.hash.clone());
            if let Err(e) = self.store.update_pool_entry(entry).await {
                debug!("pool entry {} left before its rebase: {}", id, e);
                continue;
            }
            self.store.clear_votes(id).await?;
            info!(
                target: "consensus",
                "EVENT:REBASE case={} pool_id={} seq={} hash={}",
                case_id, id, sequence_number, hash
            );
            rebased += 1;
        }
        Ok(rebased)
    }
}
