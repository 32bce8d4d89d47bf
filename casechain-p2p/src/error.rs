use thiserror::Error;

use casechain_common::CaseChainError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("peer answered with status {0}")]
    Status(u16),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("unknown peer {0}")]
    UnknownPeer(String),
}

impl From<NetworkError> for CaseChainError {
    fn from(e: NetworkError) -> Self {
        CaseChainError::Network(e.to_string())
    }
}
