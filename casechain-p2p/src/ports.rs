use async_trait::async_trait;
use serde_json::Value;

use casechain_common::{
    wire::{BlockAnnouncement, CaseSummary, DispatchAck, DispatchPayload, HealthReport, SuffixRequest, SuffixResponse, VoteReply},
    Peer, Result,
};

use crate::error::NetworkError;

/// Outbound calls a node makes to its peers.
///
/// Summary and suffix bodies come back as raw JSON; callers decode them
/// with the wire parser so malformed records can be dropped one by one.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn health(&self, peer: &Peer) -> std::result::Result<HealthReport, NetworkError>;

    async fn dispatch(&self, peer: &Peer, payload: &DispatchPayload) -> std::result::Result<DispatchAck, NetworkError>;

    async fn send_vote(&self, peer: &Peer, reply: &VoteReply) -> std::result::Result<(), NetworkError>;

    async fn announce(&self, peer: &Peer, announcement: &BlockAnnouncement) -> std::result::Result<(), NetworkError>;

    async fn fetch_summary(&self, peer: &Peer) -> std::result::Result<Value, NetworkError>;

    async fn fetch_suffix(&self, peer: &Peer, request: &SuffixRequest) -> std::result::Result<Value, NetworkError>;
}

/// Inbound side of the protocol. Bodies arrive as raw JSON and are decoded
/// by the handler; `origin` is the sender's address.
#[async_trait]
pub trait PeerHandler: Send + Sync {
    async fn on_health(&self) -> HealthReport;

    async fn on_dispatch(&self, origin: &str, body: Value) -> Result<DispatchAck>;

    async fn on_vote(&self, origin: &str, body: Value) -> Result<()>;

    async fn on_announce(&self, body: Value) -> Result<()>;

    async fn on_summary(&self) -> Result<CaseSummary>;

    async fn on_suffix(&self, body: Value) -> Result<SuffixResponse>;
}
