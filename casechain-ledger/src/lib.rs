pub mod memory;
pub mod state;
pub mod store;

pub use memory::MemoryLedger;
pub use store::LedgerStore;
