//! Pull-based chain reconciliation between peers.
//!
//! A node asks each live replica for its per-case `(length, head)` summary
//! and, for every case where the replica is ahead, requests the missing
//! suffix. A suffix is accepted whole or not at all: every record must
//! extend the running head, and full blocks must also recompute to their
//! hash. A broken suffix is left for the next sweep.

use tracing::{debug, info, warn};

use casechain_common::{
    wire::{CaseHead, CaseSummary, HeadRecord, SuffixBlocks, SuffixRequest, SuffixResponse, SyncDepth},
    Block, Peer, PeerRole, Result, TrackedHead,
};

use super::{ballot::HeadSource, core::Cluster};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub peers_contacted: usize,
    /// `(case_id, new length)` for every case that advanced.
    pub applied: Vec<(String, u64)>,
    pub rejected: Vec<String>,
    pub malformed: usize,
}

/// Why a suffix was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub sequence_number: u64,
    pub reason: &'static str,
}

/// Checks that `blocks` (sorted here) extend `head` one by one. Returns
/// the head after the last block.
pub fn accept_blocks(head: &TrackedHead, blocks: &mut [Block], verify_hash: bool) -> std::result::Result<TrackedHead, ChainBreak> {
    blocks.sort_by_key(|b| b.sequence_number);
    let mut running = head.clone();
    for block in blocks.iter() {
        if block.case_id != running.case_id {
            return Err(ChainBreak { sequence_number: block.sequence_number, reason: "foreign case" });
        }
        if !running.is_extended_by(block.sequence_number, &block.previous_hash) {
            return Err(ChainBreak { sequence_number: block.sequence_number, reason: "broken link" });
        }
        if verify_hash && !block.is_hash_valid() {
            return Err(ChainBreak { sequence_number: block.sequence_number, reason: "hash mismatch" });
        }
        running.advance(block.hash.clone());
    }
    Ok(running)
}

/// Head-only counterpart of [`accept_blocks`] for lightweight clients.
pub fn accept_heads(head: &TrackedHead, records: &mut [HeadRecord]) -> std::result::Result<TrackedHead, ChainBreak> {
    records.sort_by_key(|r| r.sequence_number);
    let mut running = head.clone();
    for record in records.iter() {
        if record.id != running.case_id {
            return Err(ChainBreak { sequence_number: record.sequence_number, reason: "foreign case" });
        }
        if !running.is_extended_by(record.sequence_number, &record.previous_hash) {
            return Err(ChainBreak { sequence_number: record.sequence_number, reason: "broken link" });
        }
        running.advance(record.hash.clone());
    }
    Ok(running)
}

pub struct SyncReconciler {
    cluster: Cluster,
    source: HeadSource,
}

impl SyncReconciler {
    pub fn new(cluster: Cluster, source: HeadSource) -> Self {
        Self { cluster, source }
    }

    fn depth(&self) -> SyncDepth {
        self.source.sync_depth()
    }

    async fn local_head(&self, case_id: &str) -> Result<TrackedHead> {
        Ok(self
            .source
            .head(self.cluster.store.as_ref(), case_id)
            .await?
            .unwrap_or_else(|| TrackedHead::empty(case_id)))
    }

    /// Reconciles against every live replica, one after another.
    pub async fn sweep(&self) -> Result<SyncReport> {
        let peers = self.cluster.peer_list().await;
        let replicas = self.cluster.probe().live_with_role(&peers, PeerRole::Replica).await;

        let mut report = SyncReport::default();
        for peer in &replicas {
            self.reconcile_with(peer, &mut report).await;
        }
        Ok(report)
    }

    /// A failure on one case is logged and counted as rejected; the other
    /// cases of the summary still reconcile.
    pub async fn reconcile_with(&self, peer: &Peer, report: &mut SyncReport) {
        let label = format!("summary from {}", peer);
        let raw = match self.cluster.workers.sync.run(&label, self.cluster.transport.fetch_summary(peer)).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("{} failed: {}", label, e);
                return;
            }
        };
        report.peers_contacted += 1;

        let summary = match CaseSummary::decode(&raw) {
            Ok(batch) => batch,
            Err(e) => {
                debug!("{} is malformed: {}", label, e);
                report.malformed += 1;
                self.cluster.record_malformed(1);
                return;
            }
        };
        report.malformed += summary.error_count();
        self.cluster.record_malformed(summary.error_count());

        for remote in &summary.items {
            if let Err(e) = self.reconcile_case(peer, remote, report).await {
                warn!("sync of case {} from {} failed: {}", remote.id, peer, e);
                report.rejected.push(remote.id.clone());
            }
        }
    }

    async fn reconcile_case(&self, peer: &Peer, remote: &CaseHead, report: &mut SyncReport) -> Result<()> {
        let head = self.local_head(&remote.id).await?;
        if remote.length <= head.chain_length {
            if remote.length == head.chain_length && remote.last != head.head_hash {
                warn!(
                    "case {} diverges from {} at length {}: local {} remote {}",
                    remote.id, peer, head.chain_length, head.head_hash, remote.last
                );
            }
            return Ok(());
        }

        let request = SuffixRequest {
            id: remote.id.clone(),
            length: head.chain_length,
            last: self.depth(),
        };
        let label = format!("suffix of {} from {}", remote.id, peer);
        let raw = match self.cluster.workers.sync.run(&label, self.cluster.transport.fetch_suffix(peer, &request)).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("{} failed: {}", label, e);
                return Ok(());
            }
        };
        let (response, malformed) = match SuffixResponse::decode(&raw, self.depth()) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("{} is malformed: {}", label, e);
                report.malformed += 1;
                self.cluster.record_malformed(1);
                return Ok(());
            }
        };
        report.malformed += malformed;
        self.cluster.record_malformed(malformed);
        if malformed > 0 {
            // a dropped record leaves a gap; refuse the whole suffix
            self.reject(&remote.id, peer, head.chain_length, "malformed record", report);
            return Ok(());
        }

        match response.blocks {
            SuffixBlocks::Full(mut blocks) => {
                if blocks.is_empty() {
                    return Ok(());
                }
                match accept_blocks(&head, &mut blocks, true) {
                    Ok(new_head) => {
                        let length = self.cluster.store.append_blocks(&remote.id, blocks).await?;
                        self.applied(&remote.id, peer, &new_head, length, report);
                    }
                    Err(brk) => self.reject(&remote.id, peer, brk.sequence_number, brk.reason, report),
                }
            }
            SuffixBlocks::Heads(mut records) => {
                if records.is_empty() {
                    return Ok(());
                }
                match accept_heads(&head, &mut records) {
                    Ok(new_head) => {
                        let length = new_head.chain_length;
                        self.cluster.store.put_tracked_head(new_head.clone()).await?;
                        self.applied(&remote.id, peer, &new_head, length, report);
                    }
                    Err(brk) => self.reject(&remote.id, peer, brk.sequence_number, brk.reason, report),
                }
            }
        }
        Ok(())
    }

    fn applied(&self, case_id: &str, peer: &Peer, head: &TrackedHead, length: u64, report: &mut SyncReport) {
        info!(
            target: "consensus",
            "EVENT:SYNC_APPLY case={} from={} length={} head={}",
            case_id, peer, length, head.head_hash
        );
        report.applied.push((case_id.to_string(), length));
    }

    fn reject(&self, case_id: &str, peer: &Peer, sequence_number: u64, reason: &str, report: &mut SyncReport) {
        info!(
            target: "consensus",
            "EVENT:SYNC_REJECT case={} from={} seq={} reason={}",
            case_id, peer, sequence_number, reason
        );
        report.rejected.push(case_id.to_string());
    }

    // ---- serving side ----

    /// `(length, head)` of every case this node knows.
    pub async fn summary(&self) -> Result<CaseSummary> {
        let store = self.cluster.store.as_ref();
        let blocks = match self.source {
            HeadSource::Chain => {
                let mut heads = Vec::new();
                for case_id in store.case_ids().await? {
                    if let Some(last) = store.last_block(&case_id).await? {
                        heads.push(CaseHead {
                            id: case_id,
                            length: last.sequence_number + 1,
                            last: last.hash,
                        });
                    }
                }
                heads
            }
            HeadSource::Tracked => store
                .tracked_heads()
                .await?
                .into_iter()
                .map(|h| CaseHead { id: h.case_id, length: h.chain_length, last: h.head_hash })
                .collect(),
        };
        Ok(CaseSummary { blocks })
    }

    /// Blocks past `request.length`, shaped for the requester's depth.
    /// Nodes that only track heads have no blocks to serve.
    pub async fn suffix(&self, request: &SuffixRequest) -> Result<SuffixResponse> {
        let store = self.cluster.store.as_ref();
        let (blocks, length) = match self.source {
            HeadSource::Chain => (
                store.blocks_from(&request.id, request.length).await?,
                store.chain_length(&request.id).await?,
            ),
            HeadSource::Tracked => {
                let length = store.tracked_head(&request.id).await?.map(|h| h.chain_length).unwrap_or(0);
                (Vec::new(), length)
            }
        };

        let blocks = match request.last {
            SyncDepth::Full => SuffixBlocks::Full(blocks),
            SyncDepth::HeadsOnly => SuffixBlocks::Heads(blocks.iter().map(HeadRecord::from).collect()),
        };
        Ok(SuffixResponse::new(blocks, length))
    }
}


#[cfg(test)]
mod sweep_tests {
    use super::*;
    use crate::cluster::testing::{chain_of as chain, harness, replica};
    use casechain_ledger::LedgerStore;

    fn serve(h: &crate::cluster::testing::Harness, remote: &[Block], suffix: Vec<Block>) {
        let last = remote.last().unwrap();
        let summary = CaseSummary {
            blocks: vec![CaseHead { id: last.case_id.clone(), length: remote.len() as u64, last: last.hash.clone() }],
        };
        let response = SuffixResponse::new(SuffixBlocks::Full(suffix), remote.len() as u64);
        h.transport.summaries.lock().unwrap().insert("10.0.1.1".into(), serde_json::to_value(summary).unwrap());
        h.transport.suffixes.lock().unwrap().insert("10.0.1.1".into(), serde_json::to_value(response).unwrap());
    }

    #[tokio::test]
    async fn test_catches_up_from_two_to_five() {
        let h = harness(vec![replica("10.0.1.1")]);
        let remote = chain("C1", 5);
        h.store.append_blocks("C1", remote[..2].to_vec()).await.unwrap();
        serve(&h, &remote, remote[2..].to_vec());

        let report = SyncReconciler::new(h.cluster.clone(), HeadSource::Chain).sweep().await.unwrap();
        assert_eq!(report.applied, vec![("C1".to_string(), 5)]);
        assert_eq!(h.store.chain_length("C1").await.unwrap(), 5);

        let requests = h.transport.suffix_requests.lock().unwrap().clone();
        assert_eq!(requests, vec![SuffixRequest { id: "C1".into(), length: 2, last: SyncDepth::Full }]);
    }

    #[tokio::test]
    async fn test_bad_link_at_three_keeps_length_two() {
        let h = harness(vec![replica("10.0.1.1")]);
        let remote = chain("C1", 5);
        h.store.append_blocks("C1", remote[..2].to_vec()).await.unwrap();
        let mut suffix = remote[2..].to_vec();
        suffix[1].previous_hash = "not-the-head".into();
        serve(&h, &remote, suffix);

        let report = SyncReconciler::new(h.cluster.clone(), HeadSource::Chain).sweep().await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.rejected, vec!["C1".to_string()]);
        assert_eq!(h.store.chain_length("C1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_client_tracks_head_only() {
        let h = harness(vec![replica("10.0.1.1")]);
        let remote = chain("C1", 3);
        let summary = CaseSummary {
            blocks: vec![CaseHead { id: "C1".into(), length: 3, last: remote[2].hash.clone() }],
        };
        let heads = SuffixBlocks::Heads(remote.iter().map(HeadRecord::from).collect());
        h.transport.summaries.lock().unwrap().insert("10.0.1.1".into(), serde_json::to_value(summary).unwrap());
        h.transport
            .suffixes
            .lock()
            .unwrap()
            .insert("10.0.1.1".into(), serde_json::to_value(SuffixResponse::new(heads, 3)).unwrap());

        let reconciler = SyncReconciler::new(h.cluster.clone(), HeadSource::Tracked);
        reconciler.sweep().await.unwrap();

        let head = h.store.tracked_head("C1").await.unwrap().unwrap();
        assert_eq!(head.chain_length, 3);
        assert_eq!(head.head_hash, remote[2].hash);
        assert_eq!(h.store.chain_length("C1").await.unwrap(), 0);
        assert_eq!(h.transport.suffix_requests.lock().unwrap()[0].last, SyncDepth::HeadsOnly);
    }

    #[tokio::test]
    async fn test_malformed_summary_rows_are_counted() {
        let h = harness(vec![replica("10.0.1.1")]);
        h.transport.summaries.lock().unwrap().insert(
            "10.0.1.1".into(),
            serde_json::json!({"Blocks": [{"id": "C1"}, {"length": 3}]}),
        );
        let report = SyncReconciler::new(h.cluster.clone(), HeadSource::Chain).sweep().await.unwrap();
        assert_eq!(report.malformed, 2);
        assert_eq!(h.cluster.malformed_count(), 2);
    }

    #[tokio::test]
    async fn test_serves_summary_and_suffix() {
        let h = harness(Vec::new());
        let blocks = chain("C1", 4);
        h.store.append_blocks("C1", blocks.clone()).await.unwrap();
        let reconciler = SyncReconciler::new(h.cluster.clone(), HeadSource::Chain);

        let summary = reconciler.summary().await.unwrap();
        assert_eq!(summary.blocks, vec![CaseHead { id: "C1".into(), length: 4, last: blocks[3].hash.clone() }]);

        let full = reconciler
            .suffix(&SuffixRequest { id: "C1".into(), length: 1, last: SyncDepth::Full })
            .await
            .unwrap();
        assert_eq!(full.count, 3);
        assert_eq!(full.length, 4);
        assert_eq!(full.blocks, SuffixBlocks::Full(blocks[1..].to_vec()));

        let heads = reconciler
            .suffix(&SuffixRequest { id: "C1".into(), length: 3, last: SyncDepth::HeadsOnly })
            .await
            .unwrap();
        assert_eq!(heads.blocks, SuffixBlocks::Heads(vec![HeadRecord::from(&blocks[3])]));
    }
}
