//! Backend API integration module
//!
//! This module provides everything that talks to the task backend:
//! - Raw transport and single-attempt pipeline
//! - Resilient client with refresh-and-replay and backoff
//! - Single-flight refresh coordination
//! - Authentication and task endpoints
//! - Error body classification

pub mod auth;
pub mod client;
pub mod error_handler;
pub mod gate;
pub mod pipeline;
pub mod retry;
pub mod tasks;
pub mod transport;

pub use auth::{AuthBackend, AuthGrant, AuthService, HttpAuthBackend};
pub use client::{CredentialSource, RefreshInvoker, ResilientHttpClient};
pub use error_handler::{is_validation_rejection, user_message};
pub use gate::RequestGate;
pub use pipeline::{HttpPipeline, RequestOptions};
pub use retry::RetryPolicy;
pub use tasks::{normalize_task_list, Task, TaskQuery, TaskService, TaskStats, TaskUpdate};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
