use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Replicas keep full chains; voters keep heads only and are sampled as delegates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    #[serde(alias = "server")]
    Replica,
    #[serde(alias = "client")]
    Voter,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Replica => write!(f, "replica"),
            PeerRole::Voter => write!(f, "voter"),
        }
    }
}

impl FromStr for PeerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replica" | "server" => Ok(PeerRole::Replica),
            "voter" | "client" => Ok(PeerRole::Voter),
            other => Err(format!("unknown peer role `{other}`")),
        }
    }
}

/// Registry entry for a remote node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    #[serde(rename = "ip_address")]
    pub address: String,
    pub port: u16,
    pub role: PeerRole,
}

impl Peer {
    pub fn new(address: impl Into<String>, port: u16, role: PeerRole) -> Self {
        Self {
            address: address.into(),
            port,
            role,
        }
    }

    pub fn replica(address: impl Into<String>, port: u16) -> Self {
        Self::new(address, port, PeerRole::Replica)
    }

    pub fn voter(address: impl Into<String>, port: u16) -> Self {
        Self::new(address, port, PeerRole::Voter)
    }

    pub fn is_voter(&self) -> bool {
        self.role == PeerRole::Voter
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.address, self.port, self.role)
    }
}
