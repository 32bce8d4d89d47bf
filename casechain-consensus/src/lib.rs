pub mod chain;
pub mod cluster;
pub mod consensus;

pub use chain::HashChain;
pub use cluster::core::{Cluster, WorkerPools};
pub use cluster::{Ballot, Finalizer, HeadSource, SyncReconciler, VotingCoordinator};
pub use consensus::evaluator::{QuorumEvaluator, QuorumPolicy};
pub use consensus::registry::VoteOutcome;
pub use consensus::settings::ConsensusSettings;
