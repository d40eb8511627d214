//! Storage ports (message log, summaries, preferences, subscriptions).

pub mod memory;
pub mod port;
