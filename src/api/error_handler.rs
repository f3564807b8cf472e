//! Response body classification and user-facing error messages
//!
//! Turns parsed error bodies into [`VoxtaskError`] values and decides whether
//! a 401 means "wrong password" or "credential expired".

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::VoxtaskError;

/// Keywords marking a 401 as a rejected login or form rather than an
/// expired credential. The backend has no distinct error code for this.
// TODO: drop once the backend returns a machine-readable code for expired tokens
static VALIDATION_REJECTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)contraseña|password|incorrecta|incorrect|invalid|inválida|validation|validación")
        .expect("Invalid regex pattern for validation rejection detection")
});

/// Markers that a 401 is about the credential itself; these win over the
/// validation keywords ("Invalid or expired token" is an expiry)
static EXPIRED_CREDENTIAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)token|expired|expirad|jwt|session|sesión")
        .expect("Invalid regex pattern for expired credential detection")
});

/// Message used when the body carries nothing better
const DEFAULT_ERROR_MESSAGE: &str = "Request failed";

/// User-facing messages
pub mod messages {
    /// No response reached us
    pub const NETWORK_ERROR: &str = "Connection error. Check your internet connection.";
    /// Request timed out
    pub const TIMEOUT_ERROR: &str = "The request took too long. Try again.";
    /// Session no longer valid
    pub const UNAUTHORIZED: &str = "Your session has expired. Please log in again.";
    /// No session at all
    pub const NOT_LOGGED_IN: &str = "You are not logged in.";
    /// Forbidden
    pub const FORBIDDEN: &str = "You do not have permission to perform this action.";
    /// Missing resource
    pub const NOT_FOUND: &str = "Resource not found.";
    /// 5xx
    pub const SERVER_ERROR: &str = "Server error. Try again later.";
    /// Anything else
    pub const UNKNOWN_ERROR: &str = "An unexpected error occurred.";
}

/// The `error` text of a body, whether `error` is a string or an object
fn error_text(body: &Value) -> Option<&str> {
    match body.get("error")? {
        Value::String(text) => Some(text),
        Value::Object(obj) => obj.get("message").and_then(Value::as_str),
        _ => None,
    }
}

/// Pick the human-readable message out of an error body
///
/// Order: `error` (string), `error.message`, `message`, then a default.
pub fn extract_message(body: &Value) -> String {
    error_text(body)
        .filter(|message| !message.is_empty())
        .or_else(|| body.get("message").and_then(Value::as_str))
        .filter(|message| !message.is_empty())
        .unwrap_or(DEFAULT_ERROR_MESSAGE)
        .to_string()
}

/// Pick the structured details out of an error body
///
/// Order: `details`, the `error` object itself, then `retryAfter` wrapped
/// in an object so rate-limit hints survive.
pub fn extract_details(body: &Value) -> Option<Value> {
    if let Some(details) = body.get("details").filter(|d| !d.is_null()) {
        return Some(details.clone());
    }
    if let Some(error @ Value::Object(_)) = body.get("error") {
        return Some(error.clone());
    }
    body.get("retryAfter")
        .map(|retry_after| json!({ "retryAfter": retry_after }))
}

/// Build the error for a non-success response with a JSON body
pub fn http_error(status: u16, body: &Value) -> VoxtaskError {
    VoxtaskError::Http {
        status,
        message: extract_message(body),
        details: extract_details(body),
    }
}

/// Whether a 401 body reads like a credential rejection (wrong password,
/// failed validation) instead of an expired session
pub fn is_validation_rejection(body: &Value) -> bool {
    error_text(body)
        .map(|text| {
            VALIDATION_REJECTION_PATTERN.is_match(text) && !EXPIRED_CREDENTIAL_PATTERN.is_match(text)
        })
        .unwrap_or(false)
}

/// Message to show the user for an error
pub fn user_message(err: &VoxtaskError) -> String {
    match err {
        VoxtaskError::Network(_) => messages::NETWORK_ERROR.to_string(),
        VoxtaskError::Timeout => messages::TIMEOUT_ERROR.to_string(),
        VoxtaskError::SessionExpired(_) => messages::UNAUTHORIZED.to_string(),
        VoxtaskError::NotAuthenticated => messages::NOT_LOGGED_IN.to_string(),
        VoxtaskError::Http { message, .. } if message != DEFAULT_ERROR_MESSAGE => message.clone(),
        VoxtaskError::Http { status, .. } => match status {
            401 => messages::UNAUTHORIZED.to_string(),
            403 => messages::FORBIDDEN.to_string(),
            404 => messages::NOT_FOUND.to_string(),
            500..=599 => messages::SERVER_ERROR.to_string(),
            _ => messages::UNKNOWN_ERROR.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_fallback_order() {
        assert_eq!(extract_message(&json!({"error": "Boom", "message": "m"})), "Boom");
        assert_eq!(
            extract_message(&json!({"error": {"message": "Nested"}, "message": "m"})),
            "Nested"
        );
        assert_eq!(extract_message(&json!({"message": "Plain"})), "Plain");
        assert_eq!(
            extract_message(&json!({"error": "", "message": "Email taken"})),
            "Email taken"
        );
        assert_eq!(extract_message(&json!({"error": "", "message": ""})), DEFAULT_ERROR_MESSAGE);
        assert_eq!(extract_message(&json!({})), DEFAULT_ERROR_MESSAGE);
        assert_eq!(extract_message(&json!([1, 2])), DEFAULT_ERROR_MESSAGE);
    }

    #[test]
    fn test_details_pass_through() {
        let body = json!({"error": "Validation failed", "details": [{"field": "email"}]});
        assert_eq!(extract_details(&body), Some(json!([{"field": "email"}])));

        let body = json!({"error": {"message": "bad", "code": 7}});
        assert_eq!(extract_details(&body), Some(json!({"message": "bad", "code": 7})));

        let body = json!({"error": "Too many requests", "retryAfter": 30});
        assert_eq!(extract_details(&body), Some(json!({"retryAfter": 30})));

        assert_eq!(extract_details(&json!({"error": "x"})), None);
    }

    #[test]
    fn test_validation_rejection_detection() {
        assert!(is_validation_rejection(&json!({"error": "contraseña incorrecta"})));
        assert!(is_validation_rejection(&json!({"error": "Incorrect PASSWORD"})));
        assert!(is_validation_rejection(&json!({"error": {"message": "Validación fallida"}})));
        assert!(is_validation_rejection(&json!({"error": "Contraseña INVÁLIDA"})));
    }

    #[test]
    fn test_expired_token_is_not_validation() {
        assert!(!is_validation_rejection(&json!({"error": "Invalid or expired token"})));
        assert!(!is_validation_rejection(&json!({"error": "Token inválido"})));
        assert!(!is_validation_rejection(&json!({"message": "jwt expired"})));
        assert!(!is_validation_rejection(&json!({"error": "Token expired"})));
        assert!(!is_validation_rejection(&json!({})));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            user_message(&VoxtaskError::Network("x".into())),
            messages::NETWORK_ERROR
        );
        assert_eq!(
            user_message(&VoxtaskError::Http {
                status: 503,
                message: DEFAULT_ERROR_MESSAGE.into(),
                details: None
            }),
            messages::SERVER_ERROR
        );
        assert_eq!(
            user_message(&VoxtaskError::Http {
                status: 400,
                message: "Text is required".into(),
                details: None
            }),
            "Text is required"
        );
    }
}
