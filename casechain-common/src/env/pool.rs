use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    crypto::hash::compute_hash,
    env::block::Block,
    utils::time::canonical,
    wire::messages::Candidate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A candidate block waiting for quorum.
///
/// `sequence_number` and `previous_hash` always reflect the case head at the
/// time the entry was last staged or rebased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub id: PoolId,
    pub case_id: String,
    pub sequence_number: u64,
    pub previous_hash: String,
    pub metadata: String,
    pub log: String,
    #[serde(with = "canonical")]
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    #[serde(with = "canonical::option", default)]
    pub dispatch_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempt_count: u32,
}

impl PoolEntry {
    /// Builds an undispatched entry positioned at `(sequence_number, previous_hash)`.
    /// The id is assigned by the store when the entry is staged.
    pub fn new(
        case_id: impl Into<String>,
        metadata: impl Into<String>,
        log: impl Into<String>,
        timestamp: DateTime<Utc>,
        sequence_number: u64,
        previous_hash: impl Into<String>,
    ) -> Self {
        let mut entry = Self {
            id: PoolId(0),
            case_id: case_id.into(),
            sequence_number,
            previous_hash: previous_hash.into(),
            metadata: metadata.into(),
            log: log.into(),
            timestamp,
            hash: String::new(),
            dispatch_time: None,
            attempt_count: 0,
        };
        entry.hash = entry.compute_hash();
        entry
    }

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

    /// Moves the entry on top of a new head and resets its dispatch state.
    pub fn rebase(&mut self, sequence_number: u64, previous_hash: impl Into<String>) {
        self.sequence_number = sequence_number;
        self.previous_hash = previous_hash.into();
        self.hash = self.compute_hash();
        self.dispatch_time = None;
        self.attempt_count = 0;
    }

    pub fn is_positioned_at(&self, sequence_number: u64, previous_hash: &str) -> bool {
        self.sequence_number == sequence_number && self.previous_hash == previous_hash
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatch_time.is_some()
    }

    /// True once `timeout` has elapsed since the last dispatch.
    pub fn window_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.dispatch_time
            .map(|sent| now >= sent + timeout)
            .unwrap_or(false)
    }

    /// True while the last dispatch window is still open.
    pub fn window_open(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.dispatch_time
            .map(|sent| now < sent + timeout)
            .unwrap_or(false)
    }

    pub fn to_block(&self) -> Block {
        Block {
            case_id: self.case_id.clone(),
            sequence_number: self.sequence_number,
            previous_hash: self.previous_hash.clone(),
            metadata: self.metadata.clone(),
            log: self.log.clone(),
            timestamp: self.timestamp,
            hash: self.hash.clone(),
        }
    }

    pub fn candidate(&self) -> Candidate {
        Candidate {
            id: self.id,
            case_id: self.case_id.clone(),
            sequence_number: self.sequence_number,
            metadata: self.metadata.clone(),
            log: self.log.clone(),
            timestamp: self.timestamp,
            previous_hash: self.previous_hash.clone(),
            hash: self.hash.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::now;

    #[test]
    fn test_new_entry_is_hashed_and_pending() {
        let entry = PoolEntry::new("C1", "m1", "l1", now(), 0, "");
        assert_eq!(entry.hash, entry.compute_hash());
        assert!(!entry.is_dispatched());
        assert_eq!(entry.attempt_count, 0);
    }

    #[test]
    fn test_rebase_recomputes_hash_and_resets_dispatch() {
        let mut entry = PoolEntry::new("C1", "m1", "l1", now(), 0, "");
        let before = entry.hash.clone();
        entry.dispatch_time = Some(now());
        entry.attempt_count = 2;

        entry.rebase(1, "head");

        assert_eq!(entry.sequence_number, 1);
        assert_eq!(entry.previous_hash, "head");
        assert_ne!(entry.hash, before);
        assert_eq!(entry.hash, entry.compute_hash());
        assert!(entry.dispatch_time.is_none());
        assert_eq!(entry.attempt_count, 0);
    }

    #[test]
    fn test_window_boundaries() {
        let mut entry = PoolEntry::new("C1", "m1", "l1", now(), 0, "");
        let sent = now();
        let timeout = Duration::seconds(30);
        assert!(!entry.window_expired(sent, timeout));

        entry.dispatch_time = Some(sent);
        assert!(entry.window_open(sent + Duration::seconds(29), timeout));
        assert!(!entry.window_expired(sent + Duration::seconds(29), timeout));
        assert!(entry.window_expired(sent + Duration::seconds(30), timeout));
        assert!(!entry.window_open(sent + Duration::seconds(30), timeout));
    }
}
