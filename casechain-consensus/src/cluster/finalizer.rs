use std::collections::HashSet;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use casechain_common::{wire::BlockAnnouncement, Block, Result};

use super::{core::Cluster, directives::LogDirective};
use crate::chain::HashChain;

#[derive(Debug, Default)]
pub struct FinalizeReport {
    pub finalized: Vec<Block>,
    pub rebased: usize,
    /// Detached announcement calls.
    pub in_flight: Vec<JoinHandle<bool>>,
}

impl FinalizeReport {
    pub async fn settle(&mut self) -> usize {
        let handles = std::mem::take(&mut self.in_flight);
        futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count()
    }
}

/// Promotes quorate candidates into their case chain.
pub struct Finalizer {
    cluster: Cluster,
}

impl Finalizer {
    pub fn new(cluster: Cluster) -> Self {
        Self { cluster }
    }

    /// Finalizes at most one candidate per case per sweep; siblings are
    /// rebased and get a fresh round of votes. A quorate candidate whose
    /// position went stale (the head moved through sync) is rebased instead.
    pub async fn sweep(&self) -> Result<FinalizeReport> {
        let mut report = FinalizeReport::default();
        let pool = self.cluster.pool();
        let chain = HashChain::new(self.cluster.store.clone());
        let evaluator = self.cluster.evaluator();
        let voters = self.cluster.voter_count().await;
        let mut touched: HashSet<String> = HashSet::new();

        for entry in pool.list_pending().await? {
            if touched.contains(&entry.case_id) || !evaluator.is_quorate(entry.id, voters).await? {
                continue;
            }

            let (sequence_number, previous_hash) = chain.next_position(&entry.case_id).await?;
            if !entry.is_positioned_at(sequence_number, &previous_hash) {
                warn!(
                    "pool entry {} is quorate but case {} moved to seq {}, rebasing",
                    entry.id, entry.case_id, sequence_number
                );
                touched.insert(entry.case_id.clone());
                report.rebased += self.rebase(&entry.case_id).await;
                continue;
            }

            let block = entry.to_block();
            if let Err(e) = self.cluster.store.finalize_entry(entry.id, block.clone()).await {
                warn!("could not finalize pool entry {}: {}", entry.id, e);
                continue;
            }
            touched.insert(block.case_id.clone());
            info!(
                target: "consensus",
                "EVENT:FINALIZE case={} seq={} pool_id={} hash={}",
                block.case_id, block.sequence_number, entry.id, block.hash
            );

            // The block is committed; nothing below may abort the sweep.
            report.in_flight.extend(self.announce(&block).await);
            if let Some(directive) = LogDirective::parse(&block.log) {
                if let Err(e) = directive.apply(self.cluster.store.as_ref(), &block.case_id).await {
                    warn!("log directive of case {} seq {} failed: {}", block.case_id, block.sequence_number, e);
                }
            }
            report.rebased += self.rebase(&block.case_id).await;
            report.finalized.push(block);
        }
        Ok(report)
    }

    async fn rebase(&self, case_id: &str) -> usize {
        match self.cluster.pool().rebase_after_finalize(case_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!("rebase of case {} failed, the dispatch sweep will retry: {}", case_id, e);
                0
            }
        }
    }

    /// Best-effort push of the new head to every registered peer.
    async fn announce(&self, block: &Block) -> Vec<JoinHandle<bool>> {
        let announcement = BlockAnnouncement::from(block);

        self.cluster
            .peer_list()
            .await
            .into_iter()
            .map(|peer| {
                let transport = self.cluster.transport.clone();
                let workers = self.cluster.workers.announce.clone();
                let announcement = announcement.clone();
                tokio::spawn(async move {
                    let label = format!("announce to {}", peer);
                    match workers.run(&label, transport.announce(&peer, &announcement)).await {
                        Ok(()) => true,
                        Err(e) => {
                            debug!("{} failed: {}", label, e);
                            false
                        }
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{
        testing::{chain_of, cluster_on, harness, replica, voters, EvictingStore, MockTransport},
        voting::VotingCoordinator,
    };
    use casechain_common::{utils::time::now, Decision, PoolEntry};
    use casechain_ledger::LedgerStore;
    use std::sync::Arc;

    async fn agree(h: &crate::cluster::testing::Harness, entry: &PoolEntry, count: usize) {
        let registry = h.cluster.vote_registry();
        for i in 0..count {
            registry
                .record_vote(entry.id, &format!("10.0.0.{i}"), Decision::Agree, now())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_finalize_rebases_siblings_and_announces() {
        let mut peers = voters(10);
        peers.push(replica("10.0.1.1"));
        let h = harness(peers);
        let pool = h.cluster.pool();

        let first = pool.stage("C1", "m1", "l1").await.unwrap();
        let second = pool.stage("C1", "m2", "l2").await.unwrap();
        let third = pool.stage("C1", "m3", "l3").await.unwrap();
        VotingCoordinator::new(h.cluster.clone()).sweep(now()).await.unwrap().settle().await;
        agree(&h, &first, 4).await;

        let mut report = Finalizer::new(h.cluster.clone()).sweep().await.unwrap();
        assert_eq!(report.finalized.len(), 1);
        assert_eq!(report.rebased, 2);
        assert_eq!(report.settle().await, 11);

        let block = &report.finalized[0];
        assert_eq!(block.case_id, "C1");
        assert_eq!(block.sequence_number, 0);
        assert_eq!(block.previous_hash, "");
        assert_eq!(block.hash, first.hash);
        assert!(h.store.pool_entry(first.id).await.unwrap().is_none());
        assert!(h.store.votes_for(first.id).await.unwrap().is_empty());

        for sibling in [second, third] {
            let rebased = h.store.pool_entry(sibling.id).await.unwrap().unwrap();
            assert_eq!(rebased.sequence_number, 1);
            assert_eq!(rebased.previous_hash, first.hash);
            assert_eq!(rebased.hash, rebased.compute_hash());
            assert!(rebased.dispatch_time.is_none());
        }

        let announced = h.transport.announced.lock().unwrap().clone();
        assert!(announced.iter().any(|(addr, a)| addr == "10.0.1.1" && a.hash == first.hash));
    }

    #[tokio::test]
    async fn test_three_agree_votes_of_ten_are_not_enough() {
        let h = harness(voters(10));
        let entry = h.cluster.pool().stage("C1", "m1", "l1").await.unwrap();
        VotingCoordinator::new(h.cluster.clone()).sweep(now()).await.unwrap();
        agree(&h, &entry, 3).await;

        let report = Finalizer::new(h.cluster.clone()).sweep().await.unwrap();
        assert!(report.finalized.is_empty());
        assert_eq!(h.store.chain_length("C1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_user_directive_is_applied_once() {
        let h = harness(voters(1));
        let log = r#"{"Action": "AddUser", "Username": ["alice"]}"#;
        let coordinator = VotingCoordinator::new(h.cluster.clone());
        let finalizer = Finalizer::new(h.cluster.clone());

        for _ in 0..2 {
            let entry = h.cluster.pool().stage("C1", "grant", log).await.unwrap();
            coordinator.sweep(now()).await.unwrap();
            agree(&h, &entry, 1).await;
            assert_eq!(finalizer.sweep().await.unwrap().finalized.len(), 1);
        }

        assert_eq!(h.store.chain_length("C1").await.unwrap(), 2);
        assert_eq!(h.store.cases_for_user("alice").await.unwrap(), vec!["C1".to_string()]);
    }

    #[tokio::test]
    async fn test_quorate_entry_behind_a_synced_head_is_rebased() {
        let h = harness(voters(10));
        let entry = h.cluster.pool().stage("C1", "m1", "l1").await.unwrap();
        let coordinator = VotingCoordinator::new(h.cluster.clone());
        coordinator.sweep(now()).await.unwrap().settle().await;
        agree(&h, &entry, 4).await;

        // Sync lands a block from another replica before the finalizer runs.
        let synced = chain_of("C1", 1);
        h.store.append_blocks("C1", synced.clone()).await.unwrap();

        let report = Finalizer::new(h.cluster.clone()).sweep().await.unwrap();
        assert!(report.finalized.is_empty());
        assert_eq!(report.rebased, 1);
        assert_eq!(h.store.blocks_from("C1", 0).await.unwrap(), synced);

        let rebased = h.store.pool_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(rebased.sequence_number, 1);
        assert_eq!(rebased.previous_hash, synced[0].hash);
        assert!(rebased.dispatch_time.is_none());
        assert!(h.store.votes_for(entry.id).await.unwrap().is_empty());

        let report = coordinator.sweep(now()).await.unwrap();
        assert_eq!(report.dispatched, vec![entry.id]);
    }

    #[tokio::test]
    async fn test_sibling_evicted_during_rebase_keeps_block_side_effects() {
        let store = Arc::new(EvictingStore::new());
        let transport = Arc::new(MockTransport::default());
        let mut peers = voters(1);
        peers.push(replica("10.0.1.1"));
        let cluster = cluster_on(store.clone(), transport.clone(), peers);

        let log = r#"{"Action": "AddUser", "Username": ["alice"]}"#;
        let grant = cluster.pool().stage("C1", "grant", log).await.unwrap();
        let sibling = cluster.pool().stage("C1", "m2", "l2").await.unwrap();
        VotingCoordinator::new(cluster.clone()).sweep(now()).await.unwrap().settle().await;
        cluster
            .vote_registry()
            .record_vote(grant.id, "10.0.0.0", Decision::Agree, now())
            .await
            .unwrap();
        *store.evict_after_listing.lock().unwrap() = Some(sibling.id);

        let mut report = Finalizer::new(cluster.clone()).sweep().await.unwrap();
        assert_eq!(report.finalized.len(), 1);
        assert_eq!(report.rebased, 0);
        assert_eq!(report.settle().await, 2);
        assert_eq!(store.cases_for_user("alice").await.unwrap(), vec!["C1".to_string()]);
        assert!(store.pool_entry(sibling.id).await.unwrap().is_none());
    }
}
