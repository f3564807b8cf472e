//! Authentication endpoints
//!
//! Two layers:
//! - [`HttpAuthBackend`] drives `/auth/refresh` and `/auth/profile` for the
//!   session itself. It sits directly on [`HttpPipeline`] so a refresh never
//!   waits on the refresh it is performing.
//! - [`AuthService`] is what the UI calls: login, registration and profile
//!   management through the resilient client.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::client::ResilientHttpClient;
use crate::api::pipeline::{HttpPipeline, RequestOptions};
use crate::api::retry::RetryPolicy;
use crate::core::session::Principal;
use crate::error::{Result, VoxtaskError};

/// Login endpoint
pub const LOGIN_ENDPOINT: &str = "/auth/login";

/// Registration endpoint
pub const REGISTER_ENDPOINT: &str = "/auth/register";

/// Profile endpoint, also used to verify a credential
pub const PROFILE_ENDPOINT: &str = "/auth/profile";

/// Credential refresh endpoint
pub const REFRESH_ENDPOINT: &str = "/auth/refresh";

/// New credential issued by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    /// Bearer string
    pub token: String,
    /// Principal, when the backend included one
    pub user: Option<Principal>,
}

/// Wire shape of `{ success?, token, user?, error? }` auth responses
#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<Principal>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

impl AuthResponse {
    fn parse(endpoint: &str, body: Value) -> Result<Self> {
        serde_json::from_value(body).map_err(|e| {
            VoxtaskError::Json(format!("Unexpected response from {}: {}", endpoint, e))
        })
    }

    /// A grant requires a token and no explicit `success: false`
    fn into_grant(self, endpoint: &str) -> Result<AuthGrant> {
        if self.success == Some(false) {
            let message = match self.error {
                Some(Value::String(text)) => text,
                Some(Value::Object(obj)) => obj
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_default(),
                _ => self.message.unwrap_or_default(),
            };
            return Err(VoxtaskError::Custom(if message.is_empty() {
                format!("{} was not successful", endpoint)
            } else {
                message
            }));
        }

        match self.token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(AuthGrant {
                token,
                user: self.user,
            }),
            None => Err(VoxtaskError::Json(format!(
                "Response from {} did not include a token",
                endpoint
            ))),
        }
    }
}

/// Backend operations the session needs for its own lifecycle
pub trait AuthBackend: Send + Sync {
    /// Exchange `credential` for a new one
    fn refresh(&self, credential: String) -> BoxFuture<'_, Result<AuthGrant>>;

    /// Check that the backend still accepts `credential`
    fn verify(&self, credential: String) -> BoxFuture<'_, Result<()>>;
}

/// [`AuthBackend`] over HTTP
///
/// Transient failures are retried with the same policy as regular calls; a
/// 401 is final.
pub struct HttpAuthBackend {
    pipeline: Arc<HttpPipeline>,
    retry: RetryPolicy,
}

impl HttpAuthBackend {
    /// Create a backend sharing the client's pipeline
    pub fn new(pipeline: Arc<HttpPipeline>, retry: RetryPolicy) -> Self {
        Self { pipeline, retry }
    }

    async fn send(&self, endpoint: &str, options: RequestOptions, credential: &str) -> Result<Value> {
        let options = &options;
        self.retry
            .run(
                move |_| async move {
                    self.pipeline
                        .execute(endpoint, options, Some(credential))
                        .await?
                        .into_result()
                },
                |err| !err.is_unauthorized() && self.retry.is_retryable(err),
            )
            .await
    }
}

impl AuthBackend for HttpAuthBackend {
    fn refresh(&self, credential: String) -> BoxFuture<'_, Result<AuthGrant>> {
        Box::pin(async move {
            debug!("requesting credential refresh");
            let body = self
                .send(REFRESH_ENDPOINT, RequestOptions::post_empty().unguarded(), &credential)
                .await?;
            AuthResponse::parse(REFRESH_ENDPOINT, body)?.into_grant(REFRESH_ENDPOINT)
        })
    }

    fn verify(&self, credential: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            debug!("verifying persisted credential");
            self.send(PROFILE_ENDPOINT, RequestOptions::get().unguarded(), &credential)
                .await
                .map(|_| ())
        })
    }
}

/// Login form
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Account email
    pub email: String,
    /// Account password
    pub password: String,
}

/// Registration form
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    /// Display name
    pub username: String,
    /// Account email
    pub email: String,
    /// Account password
    pub password: String,
}

/// Partial profile update; only set fields are sent
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    /// New display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// New email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// New password
    #[serde(rename = "newPassword", skip_serializing_if = "Option::is_none")]
    pub new_password: Option<String>,
    /// Current password, required by the backend to change the password
    #[serde(rename = "currentPassword", skip_serializing_if = "Option::is_none")]
    pub current_password: Option<String>,
}

impl ProfileUpdate {
    /// Whether nothing would be changed
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.new_password.is_none()
    }
}

/// Outcome of a profile update: whatever the backend chose to reissue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChange {
    /// Reissued credential
    pub token: Option<String>,
    /// Updated principal
    pub user: Option<Principal>,
}

/// Authentication calls made on behalf of the user
pub struct AuthService {
    client: Arc<ResilientHttpClient>,
}

impl AuthService {
    /// Create a service over the shared client
    pub fn new(client: Arc<ResilientHttpClient>) -> Self {
        Self { client }
    }

    /// Log in; the caller hands the grant to the session
    ///
    /// A 401 here is a credential mismatch, never a reason to refresh.
    pub async fn login(&self, request: &LoginRequest) -> Result<(String, Principal)> {
        let body = self
            .client
            .call(LOGIN_ENDPOINT, RequestOptions::post(json!(request)).unguarded())
            .await?;
        Self::grant_with_user(LOGIN_ENDPOINT, body)
    }

    /// Register a new account and log it in
    ///
    /// Field-level problems come back in the error's `field_errors()`, and a
    /// 429 carries `retry_after()`.
    pub async fn register(&self, request: &RegisterRequest) -> Result<(String, Principal)> {
        let body = self
            .client
            .call(REGISTER_ENDPOINT, RequestOptions::post(json!(request)).unguarded())
            .await?;
        Self::grant_with_user(REGISTER_ENDPOINT, body)
    }

    /// Current user's profile
    pub async fn profile(&self) -> Result<Principal> {
        let body = self.client.call(PROFILE_ENDPOINT, RequestOptions::get()).await?;
        extract_principal(body)
    }

    /// Update the current user's profile
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<ProfileChange> {
        if update.is_empty() {
            return Err(VoxtaskError::InvalidInput(
                "Nothing to update. Pass --username, --email or --password.".to_string(),
            ));
        }
        let body = self
            .client
            .call(PROFILE_ENDPOINT, RequestOptions::patch(json!(update)))
            .await?;
        let response = AuthResponse::parse(PROFILE_ENDPOINT, body)?;
        Ok(ProfileChange {
            token: response.token.filter(|t| !t.is_empty()),
            user: response.user,
        })
    }

    fn grant_with_user(endpoint: &str, body: Value) -> Result<(String, Principal)> {
        let grant = AuthResponse::parse(endpoint, body)?.into_grant(endpoint)?;
        let user = grant.user.ok_or_else(|| {
            VoxtaskError::Json(format!("Response from {} did not include the user", endpoint))
        })?;
        Ok((grant.token, user))
    }
}

/// Profile bodies come either bare or wrapped in `{ user }`
fn extract_principal(body: Value) -> Result<Principal> {
    let user = match body {
        Value::Object(mut obj) if obj.contains_key("user") => obj.remove("user").unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(user)
        .map_err(|e| VoxtaskError::Json(format!("Unexpected profile response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::api::client::{CredentialSource, RefreshInvoker};
    use crate::api::transport::testing::{Reply, ScriptedTransport};

    fn pipeline(transport: Arc<ScriptedTransport>) -> Arc<HttpPipeline> {
        Arc::new(HttpPipeline::new(transport, "http://api.test", Duration::from_secs(30)).unwrap())
    }

    struct NoSession;

    impl CredentialSource for NoSession {
        fn current_credential(&self) -> Option<String> {
            None
        }
    }

    impl RefreshInvoker for NoSession {
        fn refresh_credential(&self) -> BoxFuture<'_, Result<String>> {
            Box::pin(async { Err(VoxtaskError::NotAuthenticated) })
        }

        fn wait_for_refresh(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn service(transport: Arc<ScriptedTransport>) -> AuthService {
        let client = ResilientHttpClient::new(
            pipeline(transport),
            Arc::new(NoSession),
            Arc::new(NoSession),
            RetryPolicy::new(3, Duration::from_millis(100)),
        );
        AuthService::new(Arc::new(client))
    }

    #[tokio::test]
    async fn test_refresh_sends_current_credential() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(
            "POST /auth/refresh",
            200,
            json!({"success": true, "token": "t2", "user": {"_id": "u1", "username": "ana"}}),
        );
        let backend = HttpAuthBackend::new(pipeline(transport.clone()), RetryPolicy::default());

        let grant = backend.refresh("t1".into()).await.unwrap();

        assert_eq!(grant.token, "t2");
        assert_eq!(grant.user.unwrap().id, "u1");
        let sent = transport.requests_to("POST /auth/refresh");
        assert_eq!(sent[0].header("Authorization"), Some("Bearer t1"));
        assert!(sent[0].body.is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_final() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("POST /auth/refresh", 401, json!({"error": "Refresh not allowed"}))
            .reply("POST /auth/refresh", 200, json!({"token": "t2"}));
        let backend = HttpAuthBackend::new(pipeline(transport.clone()), RetryPolicy::default());

        let err = backend.refresh("t1".into()).await.unwrap_err();

        assert_eq!(err.status(), 401);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_retries_transient_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push("POST /auth/refresh", Reply::Fail(VoxtaskError::Network("reset".into())))
            .reply("POST /auth/refresh", 200, json!({"token": "t2"}));
        let backend = HttpAuthBackend::new(pipeline(transport.clone()), RetryPolicy::default());

        let grant = backend.refresh("t1".into()).await.unwrap();
        assert_eq!(grant, AuthGrant { token: "t2".into(), user: None });
    }

    #[tokio::test]
    async fn test_refresh_without_token_fails() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("POST /auth/refresh", 200, json!({"success": false, "error": "Token reuse detected"}))
            .reply("POST /auth/refresh", 200, json!({"success": true}));
        let backend = HttpAuthBackend::new(pipeline(transport), RetryPolicy::default());

        let first = backend.refresh("t1".into()).await.unwrap_err();
        assert_eq!(first.to_string(), "Token reuse detected");
        let second = backend.refresh("t1".into()).await.unwrap_err();
        assert!(matches!(second, VoxtaskError::Json(_)));
    }

    #[tokio::test]
    async fn test_verify_hits_profile() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("GET /auth/profile", 200, json!({"id": "u1"}))
            .reply("GET /auth/profile", 401, json!({"error": "jwt malformed"}));
        let backend = HttpAuthBackend::new(pipeline(transport.clone()), RetryPolicy::default());

        assert!(backend.verify("t1".into()).await.is_ok());
        assert!(backend.verify("bad".into()).await.unwrap_err().is_unauthorized());
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_login_returns_grant() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(
            "POST /auth/login",
            200,
            json!({"success": true, "token": "t1", "user": {"_id": "u1", "email": "ana@example.com"}}),
        );
        let auth = service(transport.clone());

        let (token, user) = auth
            .login(&LoginRequest {
                email: "ana@example.com".into(),
                password: "secret".into(),
            })
            .await
            .unwrap();

        assert_eq!(token, "t1");
        assert_eq!(user.email.as_deref(), Some("ana@example.com"));
        let body: Value =
            serde_json::from_str(transport.requests()[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"email": "ana@example.com", "password": "secret"}));
    }

    #[tokio::test]
    async fn test_wrong_password_is_reported_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("POST /auth/login", 401, json!({"error": "Incorrect password"}));
        let auth = service(transport.clone());

        let err = auth
            .login(&LoginRequest {
                email: "ana@example.com".into(),
                password: "nope".into(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Incorrect password");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_register_field_errors_and_rate_limit() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply(
                "POST /auth/register",
                400,
                json!({
                    "error": "Validation failed",
                    "details": [{"field": "email", "message": "Email already registered"}]
                }),
            )
            .reply(
                "POST /auth/register",
                429,
                json!({"error": "Too many attempts", "retryAfter": 60}),
            );
        let auth = service(transport);
        let request = RegisterRequest {
            username: "ana".into(),
            email: "ana@example.com".into(),
            password: "secret123".into(),
        };

        let invalid = auth.register(&request).await.unwrap_err();
        assert_eq!(invalid.field_errors()[0].field, "email");

        let limited = auth.register(&request).await.unwrap_err();
        assert_eq!(limited.status(), 429);
        assert_eq!(limited.retry_after(), Some(60));
    }

    #[tokio::test]
    async fn test_profile_shapes() {
        assert_eq!(
            extract_principal(json!({"user": {"_id": "u1"}})).unwrap().id,
            "u1"
        );
        assert_eq!(
            extract_principal(json!({"id": "u2", "username": "bo"})).unwrap().username.as_deref(),
            Some("bo")
        );
        assert!(extract_principal(json!({"success": true})).is_err());
    }

    #[tokio::test]
    async fn test_update_profile() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(
            "PATCH /auth/profile",
            200,
            json!({"success": true, "user": {"id": "u1", "username": "ana2"}}),
        );
        let auth = service(transport.clone());

        assert!(matches!(
            auth.update_profile(&ProfileUpdate::default()).await,
            Err(VoxtaskError::InvalidInput(_))
        ));

        let change = auth
            .update_profile(&ProfileUpdate {
                username: Some("ana2".into()),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();
        assert!(change.token.is_none());
        assert_eq!(change.user.unwrap().username.as_deref(), Some("ana2"));

        let body: Value =
            serde_json::from_str(transport.requests()[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"username": "ana2"}));
    }
}
