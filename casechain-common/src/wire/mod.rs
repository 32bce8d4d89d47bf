//! wire.rs
//!
//! JSON payloads exchanged between nodes and the typed decoder used on
//! every inbound body. Outbound payloads are plain `Serialize` structs;
//! inbound bodies go through [`parse::FromWire`] so that a missing or
//! mistyped field surfaces as a [`parse::ParseError`] instead of a null.

pub mod messages;
pub mod parse;

pub use messages::*;
pub use parse::{decode_batch, Batch, Fields, FromWire, ParseError};
