use std::sync::Arc;

use tracing::info;

use casechain_common::{
    wire::{Candidate, SyncDepth},
    Decision, Result, TrackedHead,
};
use casechain_ledger::LedgerStore;

/// Where a node reads the head of a case from: its own chain (replicas) or
/// the heads it tracks (lightweight clients).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadSource {
    Chain,
    Tracked,
}

impl HeadSource {
    pub fn sync_depth(self) -> SyncDepth {
        match self {
            HeadSource::Chain => SyncDepth::Full,
            HeadSource::Tracked => SyncDepth::HeadsOnly,
        }
    }

    pub async fn head(self, store: &dyn LedgerStore, case_id: &str) -> Result<Option<TrackedHead>> {
        match self {
            HeadSource::Chain => Ok(store.last_block(case_id).await?.map(|b| b.head())),
            HeadSource::Tracked => store.tracked_head(case_id).await,
        }
    }
}

/// Decides a delegate's vote on a dispatched candidate.
#[derive(Clone)]
pub struct Ballot {
    store: Arc<dyn LedgerStore>,
    source: HeadSource,
}

impl Ballot {
    pub fn new(store: Arc<dyn LedgerStore>, source: HeadSource) -> Self {
        Self { store, source }
    }

    /// Agrees iff the candidate sits exactly on the local head and its hash
    /// recomputes from the received fields. An unknown case only accepts a
    /// genesis candidate.
    pub async fn judge(&self, candidate: &Candidate) -> Result<Decision> {
        let head = match self.source.head(self.store.as_ref(), &candidate.case_id).await? {
            Some(head) => head,
            None if candidate.sequence_number == 0 => TrackedHead::empty(candidate.case_id.clone()),
            None => return Ok(self.cast(candidate, Decision::Disagree, "unknown case")),
        };

        if !head.is_extended_by(candidate.sequence_number, &candidate.previous_hash) {
            return Ok(self.cast(candidate, Decision::Disagree, "not on local head"));
        }
        if candidate.compute_hash() != candidate.hash {
            return Ok(self.cast(candidate, Decision::Disagree, "hash mismatch"));
        }
        Ok(self.cast(candidate, Decision::Agree, "valid"))
    }

    fn cast(&self, candidate: &Candidate, decision: Decision, reason: &str) -> Decision {
        info!(
            target: "consensus",
            "EVENT:BALLOT case={} pool_id={} seq={} decision={} reason={}",
            candidate.case_id, candidate.id, candidate.sequence_number, decision, reason
        );
        decision
    }
}
