//! Core functionality for voxtask
//!
//! This module contains the session-side business logic:
//! - Credential expiry decoding
//! - Session state machine and expiry monitor
//! - Per-user task history
//! - Durable session storage
//! - Application configuration
//! - Application wiring

pub mod config;
pub mod context;
pub mod history;
pub mod session;
pub mod store;
pub mod token_manager;

pub use config::{Config, StoreKind};
pub use context::AppContext;
pub use history::{TaskEvent, TaskEventKind, TaskHistory};
pub use session::{AuthPhase, Principal, Session, SessionController, SessionEvent, SessionTiming};
pub use store::{FileStore, KeyringStore, MemoryStore, SessionStore};
pub use token_manager::{Credential, TokenManager};
