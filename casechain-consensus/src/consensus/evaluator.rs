use std::sync::Arc;

use serde::{Deserialize, Serialize};

use casechain_common::{PoolId, Result};
use casechain_ledger::LedgerStore;

/// `ceil(n * percent / 100)` in integer arithmetic.
pub fn ceil_percent(n: usize, percent: u32) -> usize {
    (n * percent as usize + 99) / 100
}

/// Committee size and agreement threshold, both as whole percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumPolicy {
    pub delegate_percent: u32,
    pub agree_percent: u32,
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self { delegate_percent: 51, agree_percent: 66 }
    }
}

impl QuorumPolicy {
    /// Delegates sampled out of `voters` voter peers.
    pub fn delegate_count(&self, voters: usize) -> usize {
        ceil_percent(voters, self.delegate_percent)
    }

    /// Agree votes needed, relative to the sampled committee rather than
    /// the whole voter population.
    pub fn required(&self, voters: usize) -> usize {
        ceil_percent(self.delegate_count(voters), self.agree_percent)
    }

    /// With no voters nothing was ever asked, so nothing is quorate.
    pub fn is_quorate(&self, agree_count: usize, voters: usize) -> bool {
        let required = self.required(voters);
        required > 0 && agree_count >= required
    }
}

#[derive(Clone)]
pub struct QuorumEvaluator {
    store: Arc<dyn LedgerStore>,
    policy: QuorumPolicy,
}

impl QuorumEvaluator {
    pub fn new(store: Arc<dyn LedgerStore>, policy: QuorumPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> QuorumPolicy {
        self.policy
    }

    pub async fn agree_count(&self, pool_id: PoolId) -> Result<usize> {
        let votes = self.store.votes_for(pool_id).await?;
        Ok(votes.iter().filter(|v| v.decision.is_agree()).count())
    }

    /// Whether `pool_id` has enough agree votes given `voters` registered voter peers.
    pub async fn is_quorate(&self, pool_id: PoolId, voters: usize) -> Result<bool> {
        let agree = self.agree_count(pool_id).await?;
        Ok(self.policy.is_quorate(agree, voters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casechain_common::{utils::time::now, Decision, PoolEntry, Vote};
    use casechain_ledger::MemoryLedger;

    #[test]
    fn test_ten_voters_need_four_of_six() {
        let policy = QuorumPolicy::default();
        assert_eq!(policy.delegate_count(10), 6);
        assert_eq!(policy.required(10), 4);
        assert!(!policy.is_quorate(3, 10));
        assert!(policy.is_quorate(4, 10));
    }

    #[test]
    fn test_small_populations() {
        let policy = QuorumPolicy::default();
        assert_eq!(policy.delegate_count(1), 1);
        assert_eq!(policy.required(1), 1);
        assert_eq!(policy.delegate_count(3), 2);
        assert_eq!(policy.required(3), 2);
        // exact products must not round up
        assert_eq!(ceil_percent(100, 51), 51);
        assert_eq!(ceil_percent(50, 66), 33);
    }

    #[test]
    fn test_no_voters_is_never_quorate() {
        assert!(!QuorumPolicy::default().is_quorate(0, 0));
    }

    #[tokio::test]
    async fn test_only_agree_votes_count() {
        let store = Arc::new(MemoryLedger::new());
        let entry = store
            .stage_entry(PoolEntry::new("C1", "m", "l", now(), 0, ""))
            .await
            .unwrap();
        for (i, decision) in [Decision::Agree, Decision::Agree, Decision::Disagree].into_iter().enumerate() {
            store
                .upsert_vote(Vote::new(entry.id, format!("10.0.0.{i}"), decision, now()))
                .await
                .unwrap();
        }

        let evaluator = QuorumEvaluator::new(store, QuorumPolicy::default());
        assert_eq!(evaluator.agree_count(entry.id).await.unwrap(), 2);
        // 3 voters: 2 delegates, 2 required
        assert!(evaluator.is_quorate(entry.id, 3).await.unwrap());
        // 10 voters: 4 required
        assert!(!evaluator.is_quorate(entry.id, 10).await.unwrap());
    }
}
