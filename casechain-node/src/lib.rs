pub mod api;
pub mod cli;
pub mod config;
pub mod runtime;

pub use config::{Config, NodeMode};
pub use runtime::scheduler::Scheduler;
pub use runtime::service::LedgerService;
