use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{crypto::hash::compute_hash, utils::time::canonical};

/// A finalized, immutable entry of a case chain.
///
/// Keyed by `(case_id, sequence_number)`; `previous_hash` is empty for the
/// first block of a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub case_id: String,
    pub sequence_number: u64,
    pub previous_hash: String,
    pub metadata: String,
    pub log: String,
    #[serde(with = "canonical")]
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

impl Block {
    /// Recomputes the content hash from the block's own fields.
    pub fn compute_hash(&self) -> String {
        compute_hash(
            &self.case_id,
            self.sequence_number,
            &self.metadata,
            &self.log,
            &self.timestamp,
            &self.previous_hash,
        )
    }

    pub fn is_hash_valid(&self) -> bool {
        self.compute_hash() == self.hash
    }

    /// Head of the chain once this block is the last one.
    pub fn head(&self) -> TrackedHead {
        TrackedHead {
            case_id: self.case_id.clone(),
            head_hash: self.hash.clone(),
            chain_length: self.sequence_number + 1,
        }
    }
}

/// What a lightweight client keeps per case instead of the full chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedHead {
    pub case_id: String,
    pub head_hash: String,
    pub chain_length: u64,
}

impl TrackedHead {
    /// Head of a case with no finalized blocks.
    pub fn empty(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            head_hash: String::new(),
            chain_length: 0,
        }
    }

    /// Whether a block at `sequence_number` linking to `previous_hash` extends this head.
    pub fn is_extended_by(&self, sequence_number: u64, previous_hash: &str) -> bool {
        self.chain_length == sequence_number && self.head_hash == previous_hash
    }

    pub fn advance(&mut self, hash: impl Into<String>) {
        self.head_hash = hash.into();
        self.chain_length += 1;
    }
}
