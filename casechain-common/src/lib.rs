pub mod crypto;
pub mod env;
pub mod error;
pub mod utils;
pub mod wire;

pub use env::block::{Block, TrackedHead};
pub use env::peer::{Peer, PeerRole};
pub use env::pool::{PoolEntry, PoolId};
pub use env::vote::{Decision, Vote};
pub use error::{CaseChainError, Result};
