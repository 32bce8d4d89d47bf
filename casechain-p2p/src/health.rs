use std::sync::Arc;

use casechain_common::{Peer, PeerRole};

use crate::{ports::PeerTransport, worker::WorkerPool};

/// Probes peers concurrently through the worker pool and keeps those that
/// answer `/health` in time.
#[derive(Clone)]
pub struct HealthProbe {
    transport: Arc<dyn PeerTransport>,
    workers: WorkerPool,
}

impl HealthProbe {
    pub fn new(transport: Arc<dyn PeerTransport>, workers: WorkerPool) -> Self {
        Self { transport, workers }
    }

    pub async fn live_peers(&self, peers: &[Peer]) -> Vec<Peer> {
        let calls = peers.iter().map(|peer| {
            let transport = self.transport.clone();
            let target = peer.clone();
            (
                format!("health {}", peer),
                async move { transport.health(&target).await },
            )
        });
        let results = self.workers.run_all(calls).await;

        peers
            .iter()
            .zip(results)
            .filter_map(|(peer, result)| match result {
                Ok(_) => Some(peer.clone()),
                Err(e) => {
                    tracing::debug!("peer {} is down: {}", peer, e);
                    None
                }
            })
            .collect()
    }

    pub async fn live_with_role(&self, peers: &[Peer], role: PeerRole) -> Vec<Peer> {
        let candidates: Vec<Peer> = peers.iter().filter(|p| p.role == role).cloned().collect();
        self.live_peers(&candidates).await
    }
}
