pub mod block;
pub mod peer;
pub mod pool;
pub mod vote;
