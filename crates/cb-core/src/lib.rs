//! Conversation core for the coaching bot.
//!
//! This crate is intentionally framework-agnostic. Storage, subscriptions and
//! the completion model live behind ports (traits); the webhook/dispatch layer
//! and the chat transport are not part of it. The core never messages users,
//! it returns outcomes and errors for the caller to render.

pub mod config;
pub mod context;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod model;
pub mod policy;
pub mod store;
pub mod summarizer;
pub mod tone;

pub use errors::{Error, ErrorKind, Result};
