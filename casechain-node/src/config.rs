use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use casechain_common::{CaseChainError, Peer, PeerRole, Result};
use casechain_consensus::{ConsensusSettings, HeadSource, QuorumPolicy};

/// What a node keeps locally: full chains (replica) or only case heads
/// (lightweight client that votes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    Replica,
    Client,
}

impl NodeMode {
    pub fn head_source(self) -> HeadSource {
        match self {
            NodeMode::Replica => HeadSource::Chain,
            NodeMode::Client => HeadSource::Tracked,
        }
    }

    /// Role this node advertises in health reports.
    pub fn role(self) -> PeerRole {
        match self {
            NodeMode::Replica => PeerRole::Replica,
            NodeMode::Client => PeerRole::Voter,
        }
    }
}

impl FromStr for NodeMode {
    type Err = CaseChainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "replica" => Ok(NodeMode::Replica),
            "client" => Ok(NodeMode::Client),
            other => Err(CaseChainError::Config(format!("unknown mode '{}'", other))),
        }
    }
}

fn default_dispatch_interval() -> u64 { 10 }
fn default_finalize_interval() -> u64 { 10 }
fn default_sync_interval() -> u64 { 10 }
fn default_vote_timeout() -> u64 { 30 }
fn default_request_timeout() -> u64 { 3 }
fn default_max_attempts() -> u32 { 3 }
fn default_workers() -> usize { 5 }
fn default_delegate_percent() -> u32 { 51 }
fn default_agree_percent() -> u32 { 66 }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub node_name: String,
    pub listen_address: String,
    pub mode: NodeMode,
    /// Inbound bearer tokens mapped to the identity they authenticate.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    /// Token presented on every outbound peer call.
    #[serde(default)]
    pub outbound_token: String,
    #[serde(default)]
    pub peers: Vec<Peer>,
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_secs: u64,
    #[serde(default = "default_finalize_interval")]
    pub finalize_interval_secs: u64,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_vote_timeout")]
    pub vote_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_delegate_percent")]
    pub delegate_percent: u32,
    #[serde(default = "default_agree_percent")]
    pub agree_percent: u32,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Config {
    pub fn new(node_name: impl Into<String>, listen_address: impl Into<String>, mode: NodeMode) -> Self {
        Self {
            node_name: node_name.into(),
            listen_address: listen_address.into(),
            mode,
            tokens: HashMap::new(),
            outbound_token: String::new(),
            peers: Vec::new(),
            dispatch_interval_secs: default_dispatch_interval(),
            finalize_interval_secs: default_finalize_interval(),
            sync_interval_secs: default_sync_interval(),
            vote_timeout_secs: default_vote_timeout(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            workers: default_workers(),
            delegate_percent: default_delegate_percent(),
            agree_percent: default_agree_percent(),
            snapshot_path: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, percent) in [("delegate_percent", self.delegate_percent), ("agree_percent", self.agree_percent)] {
            if percent == 0 || percent > 100 {
                return Err(CaseChainError::Config(format!("{} must be within 1..=100, got {}", name, percent)));
            }
        }
        if self.workers == 0 {
            return Err(CaseChainError::Config("workers must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(CaseChainError::Config("max_attempts must be positive".into()));
        }
        if self.request_timeout_secs == 0 || self.vote_timeout_secs == 0 {
            return Err(CaseChainError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn settings(&self) -> ConsensusSettings {
        ConsensusSettings {
            vote_timeout: Duration::from_secs(self.vote_timeout_secs),
            max_attempts: self.max_attempts,
            policy: QuorumPolicy {
                delegate_percent: self.delegate_percent,
                agree_percent: self.agree_percent,
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs)
    }

    pub fn finalize_interval(&self) -> Duration {
        Duration::from_secs(self.finalize_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let parsed = serde_json::from_str::<Config>(&data)?;
        parsed.validate()?;
        Ok(parsed)
    }
}
