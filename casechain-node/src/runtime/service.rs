use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use casechain_common::{
    utils::time::now,
    wire::{
        BlockAnnouncement, CaseSummary, DispatchAck, DispatchPayload, FromWire, HealthReport, SubmitRequest,
        SuffixRequest, SuffixResponse, VoteReply,
    },
    Block, CaseChainError, Peer, PoolEntry, Result, TrackedHead,
};
use casechain_consensus::{
    cluster::{DispatchReport, FinalizeReport, SyncReport},
    Ballot, Cluster, Finalizer, HashChain, SyncReconciler, VoteOutcome, VotingCoordinator, WorkerPools,
};
use casechain_ledger::{LedgerStore, MemoryLedger};
use casechain_p2p::{HttpTransport, PeerCommand, PeerEvent, PeerHandler, PeerRegistry, PeerTransport};

use crate::config::{Config, NodeMode};
use crate::runtime::scheduler::{Scheduler, Sweep};

#[derive(Debug, Clone, Copy)]
struct SweepIntervals {
    dispatch: Duration,
    finalize: Duration,
    sync: Duration,
}

/// One ledger node: owns its store, peer registry and sweep scheduler, and
/// answers the inbound peer protocol.
pub struct LedgerService {
    name: String,
    mode: NodeMode,
    cluster: Cluster,
    ledger: Arc<MemoryLedger>,
    snapshot_path: Option<PathBuf>,
    intervals: SweepIntervals,
    scheduler: Arc<Scheduler>,
}

impl LedgerService {
    pub fn new(config: &Config, ledger: Arc<MemoryLedger>, transport: Arc<dyn PeerTransport>) -> Arc<Self> {
        let store: Arc<dyn LedgerStore> = ledger.clone();
        let peers = Arc::new(RwLock::new(PeerRegistry::from_peers(config.peers.clone())));
        let workers = WorkerPools::new(config.workers, config.request_timeout());
        let cluster = Cluster::new(store, peers, transport, workers, config.settings());

        Arc::new(Self {
            name: config.node_name.clone(),
            mode: config.mode,
            cluster,
            ledger,
            snapshot_path: config.snapshot_path.clone(),
            intervals: SweepIntervals {
                dispatch: config.dispatch_interval(),
                finalize: config.finalize_interval(),
                sync: config.sync_interval(),
            },
            scheduler: Scheduler::new(),
        })
    }

    /// Production wiring: snapshot-backed store and the HTTP transport.
    pub async fn from_config(config: &Config) -> Result<Arc<Self>> {
        config.validate()?;
        let ledger = match &config.snapshot_path {
            Some(path) => MemoryLedger::open(path).await?,
            None => MemoryLedger::new(),
        };
        let transport = HttpTransport::new(config.outbound_token.clone(), config.request_timeout())?;
        Ok(Self::new(config, Arc::new(ledger), Arc::new(transport)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        self.cluster.store.clone()
    }

    pub fn malformed_count(&self) -> u64 {
        self.cluster.malformed_count()
    }

    pub fn health(&self) -> HealthReport {
        HealthReport { node: self.name.clone(), role: self.mode.role() }
    }

    // ---- lifecycle ----

    /// Registers this node's sweeps and starts ticking. Replicas run
    /// dispatch, finalize and sync; clients only sync their heads.
    pub async fn start(self: &Arc<Self>) -> usize {
        if self.scheduler.running().await > 0 {
            return 0;
        }
        if self.mode == NodeMode::Replica {
            self.schedule("dispatch", self.intervals.dispatch, |svc| async move {
                svc.dispatch_sweep().await.map(|_| ())
            })
            .await;
            self.schedule("finalize", self.intervals.finalize, |svc| async move {
                svc.finalize_sweep().await.map(|_| ())
            })
            .await;
        }
        self.schedule("sync", self.intervals.sync, |svc| async move { svc.sync_sweep().await.map(|_| ()) })
            .await;

        let started = self.scheduler.start().await;
        info!("node {} started as {:?} with {} sweeps", self.name, self.mode, started);
        started
    }

    /// Stops every sweep, then writes the snapshot if one is configured.
    pub async fn stop(&self) -> Result<()> {
        self.scheduler.stop().await;
        if let Some(path) = &self.snapshot_path {
            self.ledger.save_snapshot(path).await?;
            info!("node {} saved snapshot to {}", self.name, path.display());
        }
        Ok(())
    }

    async fn schedule<F, Fut>(self: &Arc<Self>, name: &'static str, every: Duration, body: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let service = Arc::downgrade(self);
        let body = Arc::new(body);
        let sweep: Sweep = Arc::new(move || -> BoxFuture<'static, ()> {
            let service = service.clone();
            let body = body.clone();
            Box::pin(async move {
                let Some(service) = service.upgrade() else { return };
                if let Err(e) = body(service).await {
                    warn!("{} sweep failed: {}", name, e);
                }
            })
        });
        self.scheduler.every(name, every, sweep).await;
    }

    // ---- sweeps ----

    /// One voting round. Returns as soon as the round is decided; the
    /// dispatch calls keep running and are counted by a detached task.
    pub async fn dispatch_sweep(&self) -> Result<DispatchReport> {
        let mut report = VotingCoordinator::new(self.cluster.clone()).sweep(now()).await?;
        debug!(
            "dispatch sweep: {} new, {} retried, {} held, {} evicted, {} waiting",
            report.dispatched.len(),
            report.redispatched.len(),
            report.held.len(),
            report.evicted.len(),
            report.waiting
        );

        if !report.in_flight.is_empty() {
            let mut calls = DispatchReport { in_flight: std::mem::take(&mut report.in_flight), ..Default::default() };
            tokio::spawn(async move {
                let total = calls.in_flight.len();
                let delivered = calls.settle().await;
                debug!("dispatch calls delivered: {}/{}", delivered, total);
            });
        }
        Ok(report)
    }

    pub async fn finalize_sweep(&self) -> Result<FinalizeReport> {
        let mut report = Finalizer::new(self.cluster.clone()).sweep().await?;
        let announced = report.settle().await;
        debug!("finalize sweep: {} finalized, {} announcements delivered", report.finalized.len(), announced);
        Ok(report)
    }

    pub async fn sync_sweep(&self) -> Result<SyncReport> {
        let report = self.reconciler().sweep().await?;
        debug!(
            "sync sweep: {} peers, {} cases applied, {} rejected",
            report.peers_contacted,
            report.applied.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    fn reconciler(&self) -> SyncReconciler {
        SyncReconciler::new(self.cluster.clone(), self.mode.head_source())
    }

    // ---- client-facing operations ----

    pub async fn submit(&self, request: SubmitRequest) -> Result<PoolEntry> {
        if self.mode != NodeMode::Replica {
            return Err(CaseChainError::Consensus("only replicas stage entries".into()));
        }
        self.cluster.pool().stage(&request.case_id, &request.metadata, &request.log).await
    }

    /// Cases `username` may read; cases whose chain fails verification are
    /// left out.
    pub async fn cases_for_user(&self, username: &str) -> Result<Vec<String>> {
        let chain = HashChain::new(self.store());
        let mut verified = Vec::new();
        for case_id in self.store().cases_for_user(username).await? {
            if chain.verify_case(&case_id).await? {
                verified.push(case_id);
            } else {
                warn!("case {} failed verification, hidden from {}", case_id, username);
            }
        }
        Ok(verified)
    }

    pub async fn case_info(&self, case_id: &str) -> Result<Vec<Block>> {
        self.store().blocks_from(case_id, 0).await
    }

    pub async fn register_peer(&self, peer: Peer) -> PeerEvent {
        self.update_peers(PeerCommand::Register(peer)).await
    }

    /// Moves a registered peer to a new address and port, keeping its role.
    pub async fn relocate_peer(&self, address: &str, to: &str, port: u16) -> PeerEvent {
        self.update_peers(PeerCommand::Relocate { address: address.into(), to: to.into(), port })
            .await
    }

    pub async fn drop_peer(&self, address: &str) -> PeerEvent {
        self.update_peers(PeerCommand::Drop(address.into())).await
    }

    async fn update_peers(&self, command: PeerCommand) -> PeerEvent {
        let event = self.cluster.peers.write().await.handle_command(command);
        info!("peer registry: {:?}", event);
        event
    }

    pub async fn peers(&self) -> Vec<Peer> {
        self.cluster.peer_list().await
    }

    /// Sends each reply back to the coordinator without holding up the
    /// dispatch response.
    fn reply_votes(&self, coordinator: Peer, replies: Vec<VoteReply>) {
        for reply in replies {
            let transport = self.cluster.transport.clone();
            let workers = self.cluster.workers.replies.clone();
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let label = format!("vote on {} to {}", reply.pool_id, coordinator);
                if let Err(e) = workers.run(&label, transport.send_vote(&coordinator, &reply)).await {
                    debug!("{} failed: {}", label, e);
                }
            });
        }
    }
}

#[async_trait]
impl PeerHandler for LedgerService {
    async fn on_health(&self) -> HealthReport {
        self.health()
    }

    async fn on_dispatch(&self, origin: &str, body: Value) -> Result<DispatchAck> {
        let batch = DispatchPayload::decode(&body)?;
        let errors = batch.error_count();
        if errors > 0 {
            self.cluster.record_malformed(errors);
            debug!("dropped {} malformed candidates from {}", errors, origin);
        }

        let ballot = Ballot::new(self.store(), self.mode.head_source());
        let mut replies = Vec::with_capacity(batch.items.len());
        for candidate in &batch.items {
            let response = ballot.judge(candidate).await?;
            replies.push(VoteReply { pool_id: candidate.id, response });
        }

        // Votes go back to the registered port of the origin; an unknown
        // origin has no port to answer on.
        match self.cluster.find_peer(origin).await {
            Some(coordinator) => self.reply_votes(coordinator, replies),
            None => warn!("dispatch from unregistered peer {}, not voting", origin),
        }
        Ok(DispatchAck { accepted: batch.items.len(), errors })
    }

    async fn on_vote(&self, origin: &str, body: Value) -> Result<()> {
        let reply = VoteReply::from_wire(&body)?;
        if !self.cluster.find_peer(origin).await.is_some_and(|p| p.is_voter()) {
            debug!("ignoring vote on {} from non-voter {}", reply.pool_id, origin);
            return Ok(());
        }

        let outcome = self
            .cluster
            .vote_registry()
            .record_vote(reply.pool_id, origin, reply.response, now())
            .await?;
        if outcome != VoteOutcome::Recorded {
            debug!("vote on {} from {} not counted: {:?}", reply.pool_id, origin, outcome);
        }
        Ok(())
    }

    async fn on_announce(&self, body: Value) -> Result<()> {
        let announcement = BlockAnnouncement::from_wire(&body)?;
        if self.mode == NodeMode::Replica {
            debug!(
                "announcement case={} seq={} left to the sync sweep",
                announcement.case_id, announcement.sequence_number
            );
            return Ok(());
        }

        let store = self.store();
        let mut head = store
            .tracked_head(&announcement.case_id)
            .await?
            .unwrap_or_else(|| TrackedHead::empty(announcement.case_id.clone()));
        if !head.is_extended_by(announcement.sequence_number, &announcement.previous_hash) {
            debug!(
                "announcement case={} seq={} does not extend head at length {}",
                announcement.case_id, announcement.sequence_number, head.chain_length
            );
            return Ok(());
        }

        head.advance(announcement.hash);
        info!("case {} head advanced to length {}", head.case_id, head.chain_length);
        store.put_tracked_head(head).await
    }

    async fn on_summary(&self) -> Result<CaseSummary> {
        self.reconciler().summary().await
    }

    async fn on_suffix(&self, body: Value) -> Result<SuffixResponse> {
        let request = SuffixRequest::from_wire(&body)?;
        self.reconciler().suffix(&request).await
    }
}
