//! Test doubles shared by the cluster module tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use casechain_common::{
    utils::time::now,
    wire::{BlockAnnouncement, Candidate, DispatchAck, DispatchPayload, HealthReport, SuffixRequest, VoteReply},
    Block, Peer, PeerRole, PoolEntry, PoolId, Result as LedgerResult, TrackedHead, Vote,
};
use casechain_ledger::{LedgerStore, MemoryLedger};
use casechain_p2p::{NetworkError, PeerRegistry, PeerTransport};
use chrono::{DateTime, Utc};

use super::core::{Cluster, WorkerPools};
use crate::consensus::ConsensusSettings;

#[derive(Default)]
pub struct MockTransport {
    pub down: Mutex<HashSet<String>>,
    pub dispatched: Mutex<Vec<(String, Candidate)>>,
    pub announced: Mutex<Vec<(String, BlockAnnouncement)>>,
    pub summaries: Mutex<HashMap<String, Value>>,
    pub suffixes: Mutex<HashMap<String, Value>>,
    pub suffix_requests: Mutex<Vec<SuffixRequest>>,
}

impl MockTransport {
    fn check(&self, peer: &Peer) -> Result<(), NetworkError> {
        if self.down.lock().unwrap().contains(&peer.address) {
            return Err(NetworkError::Connection(format!("{} down", peer)));
        }
        Ok(())
    }

    pub fn dispatched_to(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn health(&self, peer: &Peer) -> Result<HealthReport, NetworkError> {
        self.check(peer)?;
        Ok(HealthReport { node: peer.address.clone(), role: peer.role })
    }

    async fn dispatch(&self, peer: &Peer, payload: &DispatchPayload) -> Result<DispatchAck, NetworkError> {
        self.check(peer)?;
        let mut log = self.dispatched.lock().unwrap();
        for candidate in &payload.pool {
            log.push((peer.address.clone(), candidate.clone()));
        }
        Ok(DispatchAck { accepted: payload.pool.len(), errors: 0 })
    }

    async fn send_vote(&self, peer: &Peer, _reply: &VoteReply) -> Result<(), NetworkError> {
        self.check(peer)
    }

    async fn announce(&self, peer: &Peer, announcement: &BlockAnnouncement) -> Result<(), NetworkError> {
        self.check(peer)?;
        self.announced.lock().unwrap().push((peer.address.clone(), announcement.clone()));
        Ok(())
    }

    async fn fetch_summary(&self, peer: &Peer) -> Result<Value, NetworkError> {
        self.check(peer)?;
        self.summaries
            .lock()
            .unwrap()
            .get(&peer.address)
            .cloned()
            .ok_or(NetworkError::Status(404))
    }

    async fn fetch_suffix(&self, peer: &Peer, request: &SuffixRequest) -> Result<Value, NetworkError> {
        self.check(peer)?;
        self.suffix_requests.lock().unwrap().push(request.clone());
        self.suffixes
            .lock()
            .unwrap()
            .get(&peer.address)
            .cloned()
            .ok_or(NetworkError::Status(404))
    }
}

pub fn voters(n: usize) -> Vec<Peer> {
    (0..n).map(|i| Peer::voter(format!("10.0.0.{i}"), 5000)).collect()
}

pub struct Harness {
    pub store: Arc<MemoryLedger>,
    pub transport: Arc<MockTransport>,
    pub cluster: Cluster,
}

pub fn harness(peers: Vec<Peer>) -> Harness {
    let store = Arc::new(MemoryLedger::new());
    let transport = Arc::new(MockTransport::default());
    let cluster = cluster_on(store.clone(), transport.clone(), peers);
    Harness { store, transport, cluster }
}

pub fn cluster_on(store: Arc<dyn LedgerStore>, transport: Arc<MockTransport>, peers: Vec<Peer>) -> Cluster {
    Cluster::new(
        store,
        Arc::new(RwLock::new(PeerRegistry::from_peers(peers))),
        transport as Arc<dyn PeerTransport>,
        WorkerPools::new(5, Duration::from_secs(3)),
        ConsensusSettings::default(),
    )
}

/// Delegates to a `MemoryLedger`, but deletes `evict_after_listing` right
/// after `pool_entries_for_case` has returned it, the way a concurrent
/// eviction sweep would.
pub struct EvictingStore {
    pub inner: MemoryLedger,
    pub evict_after_listing: Mutex<Option<PoolId>>,
}

impl EvictingStore {
    pub fn new() -> Self {
        Self { inner: MemoryLedger::new(), evict_after_listing: Mutex::new(None) }
    }
}

#[async_trait]
impl LedgerStore for EvictingStore {
    async fn last_block(&self, case_id: &str) -> LedgerResult<Option<Block>> {
        self.inner.last_block(case_id).await
    }

    async fn chain_length(&self, case_id: &str) -> LedgerResult<u64> {
        self.inner.chain_length(case_id).await
    }

    async fn blocks_from(&self, case_id: &str, from: u64) -> LedgerResult<Vec<Block>> {
        self.inner.blocks_from(case_id, from).await
    }

    async fn case_ids(&self) -> LedgerResult<Vec<String>> {
        self.inner.case_ids().await
    }

    async fn append_blocks(&self, case_id: &str, blocks: Vec<Block>) -> LedgerResult<u64> {
        self.inner.append_blocks(case_id, blocks).await
    }

    async fn stage_entry(&self, entry: PoolEntry) -> LedgerResult<PoolEntry> {
        self.inner.stage_entry(entry).await
    }

    async fn pool_entries(&self) -> LedgerResult<Vec<PoolEntry>> {
        self.inner.pool_entries().await
    }

    async fn pool_entry(&self, id: PoolId) -> LedgerResult<Option<PoolEntry>> {
        self.inner.pool_entry(id).await
    }

    async fn pool_entries_for_case(&self, case_id: &str) -> LedgerResult<Vec<PoolEntry>> {
        let entries = self.inner.pool_entries_for_case(case_id).await?;
        let victim = self.evict_after_listing.lock().unwrap().take();
        if let Some(id) = victim {
            self.inner.remove_pool_entry(id).await?;
        }
        Ok(entries)
    }

    async fn update_pool_entry(&self, entry: PoolEntry) -> LedgerResult<()> {
        self.inner.update_pool_entry(entry).await
    }

    async fn remove_pool_entry(&self, id: PoolId) -> LedgerResult<Option<PoolEntry>> {
        self.inner.remove_pool_entry(id).await
    }

    async fn mark_dispatched(&self, id: PoolId, expected_hash: &str, at: DateTime<Utc>, attempt_count: u32) -> LedgerResult<bool> {
        self.inner.mark_dispatched(id, expected_hash, at, attempt_count).await
    }

    async fn evict_entry(&self, id: PoolId, expected_hash: &str) -> LedgerResult<bool> {
        self.inner.evict_entry(id, expected_hash).await
    }

    async fn upsert_vote(&self, vote: Vote) -> LedgerResult<bool> {
        self.inner.upsert_vote(vote).await
    }

    async fn votes_for(&self, id: PoolId) -> LedgerResult<Vec<Vote>> {
        self.inner.votes_for(id).await
    }

    async fn clear_votes(&self, id: PoolId) -> LedgerResult<()> {
        self.inner.clear_votes(id).await
    }

    async fn finalize_entry(&self, id: PoolId, block: Block) -> LedgerResult<()> {
        self.inner.finalize_entry(id, block).await
    }

    async fn tracked_head(&self, case_id: &str) -> LedgerResult<Option<TrackedHead>> {
        self.inner.tracked_head(case_id).await
    }

    async fn tracked_heads(&self) -> LedgerResult<Vec<TrackedHead>> {
        self.inner.tracked_heads().await
    }

    async fn put_tracked_head(&self, head: TrackedHead) -> LedgerResult<()> {
        self.inner.put_tracked_head(head).await
    }

    async fn grant_access(&self, username: &str, case_id: &str) -> LedgerResult<bool> {
        self.inner.grant_access(username, case_id).await
    }

    async fn revoke_access(&self, username: &str, case_id: &str) -> LedgerResult<bool> {
        self.inner.revoke_access(username, case_id).await
    }

    async fn cases_for_user(&self, username: &str) -> LedgerResult<Vec<String>> {
        self.inner.cases_for_user(username).await
    }
}

pub fn replica(address: &str) -> Peer {
    Peer::new(address, 5000, PeerRole::Replica)
}

/// A valid chain of `len` blocks for `case_id`.
pub fn chain_of(case_id: &str, len: u64) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for seq in 0..len {
        let prev = blocks.last().map(|b| b.hash.clone()).unwrap_or_default();
        blocks.push(PoolEntry::new(case_id, format!("m{seq}"), format!("l{seq}"), now(), seq, prev).to_block());
    }
    blocks
}
