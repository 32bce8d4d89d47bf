pub mod error;
pub mod health;
pub mod http;
pub mod in_memory;
pub mod peer_manager;
pub mod ports;
pub mod worker;

pub use error::NetworkError;
pub use health::HealthProbe;
pub use http::HttpTransport;
pub use in_memory::{InMemoryNetwork, InMemoryTransport};
pub use peer_manager::{PeerCommand, PeerEvent, PeerRegistry};
pub use ports::{PeerHandler, PeerTransport};
pub use worker::WorkerPool;
