//! Custom error types for voxtask
//!
//! Every failure the client can surface, from transport problems to
//! server-reported validation errors. The enum is `Clone` because the outcome
//! of a shared token refresh is handed to every request waiting on it.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Main error type for voxtask
#[derive(Error, Debug, Clone)]
pub enum VoxtaskError {
    /// The request never reached the server or no response came back
    #[error("Connection error: {0}\n\n  → Check your internet connection and that the backend is running.")]
    Network(String),

    /// The request did not complete within the configured timeout
    #[error("The request took too long. Try again.")]
    Timeout,

    /// The server answered a failing status with a body that is not JSON
    #[error("The server returned an invalid response ({status}). Check that the backend is available.")]
    InvalidServerResponse {
        /// HTTP status of the failing response
        status: u16,
    },

    /// The server answered a successful status with a body that is not JSON
    #[error("Could not process the server response ({status}).")]
    ResponseParse {
        /// HTTP status of the response
        status: u16,
    },

    /// The server reported a failure
    #[error("{message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Human-readable message taken from the response body
        message: String,
        /// Structured details passed through from the response body
        details: Option<Value>,
    },

    /// Refreshing the session credential was rejected by the backend
    #[error("Your session has expired: {0}\n\n  → Run 'voxtask auth login' to sign in again.")]
    SessionExpired(String),

    /// No session is available for an operation that needs one
    #[error("You are not logged in.\n\n  → Run 'voxtask auth login' to authenticate.")]
    NotAuthenticated,

    /// Persisted session storage could not be read or written
    #[error("Cannot access session storage: {0}\n\n  → On macOS: Make sure Keychain Access is available.\n  → On Linux: Ensure a secret service is running, or set 'store = \"file\"'.")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("File operation failed: {0}")]
    Io(String),

    /// JSON serialization/deserialization error
    #[error("Failed to parse data: {0}")]
    Json(String),

    /// TOML serialization/deserialization error
    #[error("Configuration file is invalid: {0}")]
    Toml(String),

    /// Invalid input from user
    #[error("{0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Custom(String),
}

/// A single field-level validation failure reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldError {
    /// Form field the failure belongs to
    #[serde(default, alias = "path", alias = "param")]
    pub field: String,
    /// What is wrong with it
    #[serde(default, alias = "msg")]
    pub message: String,
    /// Offending value, when echoed back
    #[serde(default)]
    pub value: Option<Value>,
}

impl VoxtaskError {
    /// HTTP-like status for this error
    ///
    /// Network failures have no status and report `0`.
    pub fn status(&self) -> u16 {
        match self {
            VoxtaskError::Timeout => 408,
            VoxtaskError::InvalidServerResponse { status }
            | VoxtaskError::ResponseParse { status }
            | VoxtaskError::Http { status, .. } => *status,
            VoxtaskError::SessionExpired(_) | VoxtaskError::NotAuthenticated => 401,
            _ => 0,
        }
    }

    /// Structured details attached by the server, if any
    pub fn details(&self) -> Option<&Value> {
        match self {
            VoxtaskError::Http { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    /// Field-level validation failures, for form display
    pub fn field_errors(&self) -> Vec<FieldError> {
        match self.details() {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Seconds the server asked us to wait before retrying (429 responses)
    pub fn retry_after(&self) -> Option<u64> {
        let details = self.details()?;
        details
            .get("retryAfter")
            .or_else(|| details.get("retry_after"))
            .and_then(Value::as_u64)
    }

    /// Whether the failure is transient (worth retrying locally)
    pub fn is_transient(&self) -> bool {
        match self {
            VoxtaskError::Network(_) | VoxtaskError::Timeout => true,
            VoxtaskError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the failure means the credential itself is no longer accepted
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            VoxtaskError::SessionExpired(_)
                | VoxtaskError::NotAuthenticated
                | VoxtaskError::Http { status: 401, .. }
        )
    }
}

impl From<std::io::Error> for VoxtaskError {
    fn from(err: std::io::Error) -> Self {
        VoxtaskError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VoxtaskError {
    fn from(err: serde_json::Error) -> Self {
        VoxtaskError::Json(err.to_string())
    }
}

impl From<keyring::Error> for VoxtaskError {
    fn from(err: keyring::Error) -> Self {
        VoxtaskError::Storage(err.to_string())
    }
}

impl From<toml::de::Error> for VoxtaskError {
    fn from(err: toml::de::Error) -> Self {
        VoxtaskError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for VoxtaskError {
    fn from(err: toml::ser::Error) -> Self {
        VoxtaskError::Toml(err.to_string())
    }
}

impl From<reqwest::Error> for VoxtaskError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VoxtaskError::Timeout
        } else {
            VoxtaskError::Network(err.to_string())
        }
    }
}

/// Result type alias using VoxtaskError
pub type Result<T> = std::result::Result<T, VoxtaskError>;
