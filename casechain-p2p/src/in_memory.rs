use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use casechain_common::{
    wire::{BlockAnnouncement, DispatchAck, DispatchPayload, HealthReport, SuffixRequest, VoteReply},
    CaseChainError, Peer,
};

use crate::{error::NetworkError, ports::{PeerHandler, PeerTransport}};

/// Process-local network: routes calls straight to the handlers of the
/// attached nodes, keyed by address. Used to run whole clusters in tests.
#[derive(Default)]
pub struct InMemoryNetwork {
    nodes: RwLock<HashMap<String, Weak<dyn PeerHandler>>>,
    offline: RwLock<HashSet<String>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, address: impl Into<String>, handler: &Arc<dyn PeerHandler>) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(address.into(), Arc::downgrade(handler));
        }
    }

    /// Makes every call to `address` fail with a connection error.
    pub fn set_offline(&self, address: &str, offline: bool) {
        if let Ok(mut set) = self.offline.write() {
            if offline {
                set.insert(address.to_string());
            } else {
                set.remove(address);
            }
        }
    }

    pub fn transport(self: &Arc<Self>, local_address: impl Into<String>) -> InMemoryTransport {
        InMemoryTransport {
            network: Arc::clone(self),
            local_address: local_address.into(),
        }
    }

    fn handler(&self, peer: &Peer) -> Result<Arc<dyn PeerHandler>, NetworkError> {
        if self.offline.read().map_err(poisoned)?.contains(&peer.address) {
            return Err(NetworkError::Connection(format!("{} is offline", peer)));
        }
        self.nodes
            .read()
            .map_err(poisoned)?
            .get(&peer.address)
            .and_then(Weak::upgrade)
            .ok_or_else(|| NetworkError::UnknownPeer(peer.to_string()))
    }
}

fn poisoned<T>(_: T) -> NetworkError {
    NetworkError::Connection("in-memory network lock poisoned".into())
}

/// One node's view of an [`InMemoryNetwork`]; calls are made with
/// `local_address` as the origin.
#[derive(Clone)]
pub struct InMemoryTransport {
    network: Arc<InMemoryNetwork>,
    local_address: String,
}

fn to_body<T: Serialize>(payload: &T) -> Result<Value, NetworkError> {
    serde_json::to_value(payload).map_err(|e| NetworkError::Decode(e.to_string()))
}

fn to_status(e: CaseChainError) -> NetworkError {
    match e {
        CaseChainError::Parse(_) | CaseChainError::Json(_) => NetworkError::Status(400),
        _ => NetworkError::Status(500),
    }
}

#[async_trait]
impl PeerTransport for InMemoryTransport {
    async fn health(&self, peer: &Peer) -> Result<HealthReport, NetworkError> {
        Ok(self.network.handler(peer)?.on_health().await)
    }

    async fn dispatch(&self, peer: &Peer, payload: &DispatchPayload) -> Result<DispatchAck, NetworkError> {
        let body = to_body(payload)?;
        self.network
            .handler(peer)?
            .on_dispatch(&self.local_address, body)
            .await
            .map_err(to_status)
    }

    async fn send_vote(&self, peer: &Peer, reply: &VoteReply) -> Result<(), NetworkError> {
        let body = to_body(reply)?;
        self.network
            .handler(peer)?
            .on_vote(&self.local_address, body)
            .await
            .map_err(to_status)
    }

    async fn announce(&self, peer: &Peer, announcement: &BlockAnnouncement) -> Result<(), NetworkError> {
        let body = to_body(announcement)?;
        self.network
            .handler(peer)?
            .on_announce(body)
            .await
            .map_err(to_status)
    }

    async fn fetch_summary(&self, peer: &Peer) -> Result<Value, NetworkError> {
        let summary = self.network.handler(peer)?.on_summary().await.map_err(to_status)?;
        to_body(&summary)
    }

    async fn fetch_suffix(&self, peer: &Peer, request: &SuffixRequest) -> Result<Value, NetworkError> {
        let body = to_body(request)?;
        let response = self
            .network
            .handler(peer)?
            .on_suffix(body)
            .await
            .map_err(to_status)?;
        to_body(&response)
    }
}
