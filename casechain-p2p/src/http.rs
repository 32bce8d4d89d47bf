use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;

use casechain_common::{
    wire::{BlockAnnouncement, DispatchAck, DispatchPayload, HealthReport, SuffixRequest, VoteReply},
    Peer,
};

use crate::{error::NetworkError, ports::PeerTransport};

pub const HEALTH_PATH: &str = "/health";
pub const DISPATCH_PATH: &str = "/receivepool";
pub const VOTE_PATH: &str = "/receive_response";
pub const SYNC_PATH: &str = "/sync";
pub const ANNOUNCE_PATH: &str = "/announce";

/// JSON-over-HTTP transport. Every request carries the node's bearer token
/// and is bounded by the client timeout.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    token: String,
}

impl HttpTransport {
    pub fn new(token: impl Into<String>, request_timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NetworkError::Connection(e.to_string()))?;
        Ok(Self { client, token: token.into() })
    }

    fn url(peer: &Peer, path: &str) -> String {
        format!("{}{}", peer.base_url(), path)
    }

    async fn send(&self, peer: &Peer, request: RequestBuilder) -> Result<reqwest::Response, NetworkError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| classify(peer, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status(status.as_u16()));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, peer: &Peer, request: RequestBuilder) -> Result<T, NetworkError> {
        self.send(peer, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| NetworkError::Decode(e.to_string()))
    }
}

fn classify(peer: &Peer, e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::Timeout(peer.to_string())
    } else {
        NetworkError::Connection(e.to_string())
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn health(&self, peer: &Peer) -> Result<HealthReport, NetworkError> {
        let request = self.client.get(Self::url(peer, HEALTH_PATH));
        self.send_json(peer, request).await
    }

    async fn dispatch(&self, peer: &Peer, payload: &DispatchPayload) -> Result<DispatchAck, NetworkError> {
        let request = self.client.post(Self::url(peer, DISPATCH_PATH)).json(payload);
        self.send_json(peer, request).await
    }

    async fn send_vote(&self, peer: &Peer, reply: &VoteReply) -> Result<(), NetworkError> {
        let request = self.client.post(Self::url(peer, VOTE_PATH)).json(reply);
        self.send(peer, request).await.map(|_| ())
    }

    async fn announce(&self, peer: &Peer, announcement: &BlockAnnouncement) -> Result<(), NetworkError> {
        let request = self.client.post(Self::url(peer, ANNOUNCE_PATH)).json(announcement);
        self.send(peer, request).await.map(|_| ())
    }

    async fn fetch_summary(&self, peer: &Peer) -> Result<Value, NetworkError> {
        let request = self.client.get(Self::url(peer, SYNC_PATH));
        self.send_json(peer, request).await
    }

    async fn fetch_suffix(&self, peer: &Peer, request: &SuffixRequest) -> Result<Value, NetworkError> {
        let request = self.client.post(Self::url(peer, SYNC_PATH)).json(request);
        self.send_json(peer, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_peer_is_connection_error() {
        let transport = HttpTransport::new("token", Duration::from_millis(200)).unwrap();
        // port 9 (discard) on loopback is closed in test environments
        let peer = Peer::voter("127.0.0.1", 9);
        let err = transport.health(&peer).await.unwrap_err();
        assert!(matches!(err, NetworkError::Connection(_) | NetworkError::Timeout(_)));
    }
}
