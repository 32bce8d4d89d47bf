use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{env::pool::PoolId, utils::time::canonical};

/// A delegate's verdict on a candidate. Travels as `1` (agree) / `0` (disagree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Decision {
    Agree,
    Disagree,
}

impl Decision {
    pub fn from_flag(agree: bool) -> Self {
        if agree {
            Decision::Agree
        } else {
            Decision::Disagree
        }
    }

    pub fn is_agree(self) -> bool {
        self == Decision::Agree
    }
}

impl From<Decision> for u8 {
    fn from(d: Decision) -> Self {
        match d {
            Decision::Agree => 1,
            Decision::Disagree => 0,
        }
    }
}

impl TryFrom<u8> for Decision {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Decision::Agree),
            0 => Ok(Decision::Disagree),
            other => Err(format!("invalid decision {other}")),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Agree => write!(f, "agree"),
            Decision::Disagree => write!(f, "disagree"),
        }
    }
}

/// One voter's live vote on a pool entry. Keyed by `(pool_id, voter_address)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub pool_id: PoolId,
    pub voter_address: String,
    pub decision: Decision,
    #[serde(with = "canonical")]
    pub received_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(pool_id: PoolId, voter_address: impl Into<String>, decision: Decision, received_at: DateTime<Utc>) -> Self {
        Self {
            pool_id,
            voter_address: voter_address.into(),
            decision,
            received_at,
        }
    }
}
