pub mod ballot;
pub mod core;
pub mod directives;
pub mod finalizer;
pub mod sync;
pub mod voting;

#[cfg(test)]
pub(crate) mod testing;

pub use ballot::{Ballot, HeadSource};
pub use directives::LogDirective;
pub use finalizer::{FinalizeReport, Finalizer};
pub use sync::{SyncReconciler, SyncReport};
pub use voting::{DispatchReport, VotingCoordinator};
