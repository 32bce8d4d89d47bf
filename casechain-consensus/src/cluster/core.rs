use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use casechain_common::Peer;
use casechain_ledger::LedgerStore;
use casechain_p2p::{HealthProbe, PeerRegistry, PeerTransport, WorkerPool};

use crate::consensus::{ConsensusSettings, PoolStore, QuorumEvaluator, VoteRegistry};

/// One bounded pool per outbound concern, so a stalled sync pull cannot
/// hold the permits a dispatch or an announcement needs.
#[derive(Clone, Debug)]
pub struct WorkerPools {
    pub dispatch: WorkerPool,
    pub announce: WorkerPool,
    pub sync: WorkerPool,
    pub health: WorkerPool,
    pub replies: WorkerPool,
}

impl WorkerPools {
    /// Every pool gets `max_concurrency` permits of its own.
    pub fn new(max_concurrency: usize, call_timeout: Duration) -> Self {
        let pool = || WorkerPool::new(max_concurrency, call_timeout);
        Self {
            dispatch: pool(),
            announce: pool(),
            sync: pool(),
            health: pool(),
            replies: pool(),
        }
    }
}

/// Shared handles every sweep component works against: the store, the
/// peer registry, the outbound transport and the node's worker pools.
#[derive(Clone)]
pub struct Cluster {
    pub store: Arc<dyn LedgerStore>,
    pub peers: Arc<RwLock<PeerRegistry>>,
    pub transport: Arc<dyn PeerTransport>,
    pub workers: WorkerPools,
    pub settings: ConsensusSettings,
    malformed: Arc<AtomicU64>,
}

impl Cluster {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        peers: Arc<RwLock<PeerRegistry>>,
        transport: Arc<dyn PeerTransport>,
        workers: WorkerPools,
        settings: ConsensusSettings,
    ) -> Self {
        Self {
            store,
            peers,
            transport,
            workers,
            settings,
            malformed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counts inbound records dropped as malformed.
    pub fn record_malformed(&self, count: usize) {
        if count > 0 {
            self.malformed.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub async fn peer_list(&self) -> Vec<Peer> {
        self.peers.read().await.all()
    }

    pub async fn voter_count(&self) -> usize {
        self.peers.read().await.voter_count()
    }

    pub async fn find_peer(&self, address: &str) -> Option<Peer> {
        self.peers.read().await.find_by_address(address).cloned()
    }

    pub fn probe(&self) -> HealthProbe {
        HealthProbe::new(self.transport.clone(), self.workers.health.clone())
    }

    pub fn pool(&self) -> PoolStore {
        PoolStore::new(self.store.clone())
    }

    pub fn evaluator(&self) -> QuorumEvaluator {
        QuorumEvaluator::new(self.store.clone(), self.settings.policy)
    }

    pub fn vote_registry(&self) -> VoteRegistry {
        VoteRegistry::new(self.store.clone(), self.settings.vote_window())
    }
}
