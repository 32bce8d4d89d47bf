//! utils.rs
//!
//! Small helpers shared by every casechain crate.

pub mod time;
