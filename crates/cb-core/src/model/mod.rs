//! Provider-agnostic completion contract.

pub mod client;
pub mod types;
