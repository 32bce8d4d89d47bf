use std::collections::BTreeMap;

use casechain_common::Peer;

pub enum PeerCommand {
    Register(Peer),
    /// Moves a known peer to a new address/port; its role is kept.
    Relocate { address: String, to: String, port: u16 },
    Drop(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Registered(String),
    AlreadyRegistered(String),
    Relocated { from: String, to: String },
    Dropped(String),
    Unknown(String),
}

/// Known peers keyed by address. The address doubles as the voter identity
/// under which votes are recorded.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<String, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_peers(peers: impl IntoIterator<Item = Peer>) -> Self {
        let mut registry = Self::new();
        for peer in peers {
            registry.handle_command(PeerCommand::Register(peer));
        }
        registry
    }

    pub fn handle_command(&mut self, command: PeerCommand) -> PeerEvent {
        match command {
            PeerCommand::Register(peer) => {
                if self.peers.contains_key(&peer.address) {
                    tracing::debug!("peer {} already registered", peer);
                    return PeerEvent::AlreadyRegistered(peer.address);
                }
                tracing::debug!("registering peer {}", peer);
                let address = peer.address.clone();
                self.peers.insert(address.clone(), peer);
                PeerEvent::Registered(address)
            }
            PeerCommand::Relocate { address, to, port } => {
                if to != address && self.peers.contains_key(&to) {
                    return PeerEvent::AlreadyRegistered(to);
                }
                let Some(mut peer) = self.peers.remove(&address) else {
                    return PeerEvent::Unknown(address);
                };
                tracing::debug!("relocating peer {} to {}:{}", peer, to, port);
                peer.address = to.clone();
                peer.port = port;
                self.peers.insert(to.clone(), peer);
                PeerEvent::Relocated { from: address, to }
            }
            PeerCommand::Drop(address) => match self.peers.remove(&address) {
                Some(_) => {
                    tracing::debug!("dropped peer {}", address);
                    PeerEvent::Dropped(address)
                }
                None => PeerEvent::Unknown(address),
            },
        }
    }

    pub fn find_by_address(&self, address: &str) -> Option<&Peer> {
        self.peers.get(address)
    }

    pub fn all(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    pub fn voter_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_voter()).count()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
