pub mod rest;

pub use rest::{router, serve, ApiState};
