use std::time::Duration;

use super::evaluator::QuorumPolicy;

pub const DEFAULT_VOTE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Timing and threshold knobs shared by the coordinator, registry and finalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusSettings {
    pub vote_timeout: Duration,
    pub max_attempts: u32,
    pub policy: QuorumPolicy,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            vote_timeout: DEFAULT_VOTE_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            policy: QuorumPolicy::default(),
        }
    }
}

impl ConsensusSettings {
    /// The vote timeout as a wall-clock span for comparing dispatch times.
    pub fn vote_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.vote_timeout.as_millis() as i64)
    }
}
