//! consensus.rs
//!
//! Sampled-quorum agreement on candidate blocks: the pool of candidates,
//! the votes cast on them, how many agree votes make a quorum, and who gets
//! asked.

pub mod evaluator;
pub mod pool;
pub mod registry;
pub mod selector;
pub mod settings;

pub use evaluator::{QuorumEvaluator, QuorumPolicy};
pub use pool::PoolStore;
pub use registry::{VoteOutcome, VoteRegistry};
pub use selector::DelegateSelector;
pub use settings::ConsensusSettings;
