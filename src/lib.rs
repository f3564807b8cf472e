//! voxtask - client for a task-management service
//!
//! This library provides the session and token lifecycle (login, restore,
//! single-flight refresh, expiry monitoring) and a resilient API client
//! (timeouts, refresh-and-replay on 401, exponential backoff), plus the
//! task endpoints built on top of them.

pub mod api;
pub mod cli;
pub mod core;
pub mod error;

pub use error::{Result, VoxtaskError};
