//! Resilient API client
//!
//! Wraps [`HttpPipeline`] with the behaviour every authenticated call needs:
//!
//! - waits for an in-flight credential refresh before sending
//! - attaches the current in-memory credential
//! - on a 401 that is not a validation rejection, refreshes once and replays
//! - retries transient failures with exponential backoff
//!
//! The session is reached only through [`CredentialSource`] and
//! [`RefreshInvoker`], so the client never owns session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::api::error_handler;
use crate::api::pipeline::{HttpPipeline, RequestOptions};
use crate::api::retry::RetryPolicy;
use crate::error::{Result, VoxtaskError};

/// Supplies the credential to attach to outgoing requests
pub trait CredentialSource: Send + Sync {
    /// Current bearer string, if a session exists
    fn current_credential(&self) -> Option<String>;
}

/// Triggers and observes credential refreshes
pub trait RefreshInvoker: Send + Sync {
    /// Refresh the credential (single-flight) and return the new bearer string
    fn refresh_credential(&self) -> BoxFuture<'_, Result<String>>;

    /// Wait for an in-flight refresh, if any, to settle
    fn wait_for_refresh(&self) -> BoxFuture<'_, Result<()>>;
}

/// API client with timeout, refresh-and-retry and backoff
pub struct ResilientHttpClient {
    pipeline: Arc<HttpPipeline>,
    credentials: Arc<dyn CredentialSource>,
    refresher: Arc<dyn RefreshInvoker>,
    retry: RetryPolicy,
}

impl ResilientHttpClient {
    /// Create a client over a pipeline and its session collaborators
    pub fn new(
        pipeline: Arc<HttpPipeline>,
        credentials: Arc<dyn CredentialSource>,
        refresher: Arc<dyn RefreshInvoker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pipeline,
            credentials,
            refresher,
            retry,
        }
    }

    /// Retry policy in use
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Call an endpoint and return its JSON body
    pub async fn call(&self, endpoint: &str, options: RequestOptions) -> Result<Value> {
        if options.guarded {
            self.refresher.wait_for_refresh().await?;
        }

        // Set once an attempt has been through the refresh path or was a
        // validation rejection; such failures are final.
        let settled = AtomicBool::new(false);
        let options = &options;
        let settled_ref = &settled;

        self.retry
            .run(
                move |_| self.attempt(endpoint, options, settled_ref),
                |err| !settled.load(Ordering::SeqCst) && self.retry.is_retryable(err),
            )
            .await
    }

    /// Call an endpoint and deserialize its JSON body
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.call(endpoint, options).await?;
        serde_json::from_value(value).map_err(|e| {
            VoxtaskError::Json(format!("Unexpected response from {}: {}", endpoint, e))
        })
    }

    async fn attempt(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        settled: &AtomicBool,
    ) -> Result<Value> {
        let credential = self.credentials.current_credential();
        let response = self
            .pipeline
            .execute(endpoint, options, credential.as_deref())
            .await?;

        if response.status != 401 {
            return response.into_result();
        }
        if !options.guarded {
            settled.store(true, Ordering::SeqCst);
            return response.into_result();
        }

        if error_handler::is_validation_rejection(&response.body) {
            debug!(endpoint, "401 is a validation rejection, not refreshing");
            settled.store(true, Ordering::SeqCst);
            return response.into_result();
        }

        info!(endpoint, "credential rejected, refreshing and replaying once");
        let fresh = self
            .refresher
            .refresh_credential()
            .await
            .map_err(|err| {
                if err.is_unauthorized() {
                    settled.store(true, Ordering::SeqCst);
                    match err {
                        VoxtaskError::SessionExpired(_) => err,
                        other => VoxtaskError::SessionExpired(other.to_string()),
                    }
                } else {
                    err
                }
            })?;

        settled.store(true, Ordering::SeqCst);
        self.pipeline
            .execute(endpoint, options, Some(&fresh))
            .await?
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use crate::api::transport::testing::{Reply, ScriptedTransport};

    /// Session stand-in: a swappable credential and a scripted refresh
    struct FakeSession {
        credential: Mutex<Option<String>>,
        refresh_outcome: Mutex<Result<String>>,
        refreshes: AtomicUsize,
    }

    impl FakeSession {
        fn new(credential: &str, refresh_outcome: Result<String>) -> Arc<Self> {
            Arc::new(Self {
                credential: Mutex::new(Some(credential.to_string())),
                refresh_outcome: Mutex::new(refresh_outcome),
                refreshes: AtomicUsize::new(0),
            })
        }
    }

    impl CredentialSource for FakeSession {
        fn current_credential(&self) -> Option<String> {
            self.credential.lock().unwrap().clone()
        }
    }

    impl RefreshInvoker for FakeSession {
        fn refresh_credential(&self) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move {
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                let outcome = self.refresh_outcome.lock().unwrap().clone();
                if let Ok(token) = &outcome {
                    *self.credential.lock().unwrap() = Some(token.clone());
                }
                outcome
            })
        }

        fn wait_for_refresh(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn client(transport: Arc<ScriptedTransport>, session: Arc<FakeSession>) -> ResilientHttpClient {
        let pipeline =
            HttpPipeline::new(transport, "http://api.test", Duration::from_secs(30)).unwrap();
        ResilientHttpClient::new(
            Arc::new(pipeline),
            session.clone(),
            session,
            RetryPolicy::new(3, Duration::from_millis(1000)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_and_replay_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("GET /tasks", 401, json!({"error": "Invalid or expired token"}))
            .reply("GET /tasks", 200, json!([{"_id": "1", "text": "a", "done": false}]));
        let session = FakeSession::new("t1", Ok("t2".into()));
        let client = client(transport.clone(), session.clone());

        let value = client.call("/tasks", RequestOptions::get()).await.unwrap();

        assert_eq!(value[0]["text"], "a");
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 1);
        let sent = transport.requests_to("GET /tasks");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].header("Authorization"), Some("Bearer t1"));
        assert_eq!(sent[1].header("Authorization"), Some("Bearer t2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_failure_is_not_retried_again() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .reply("GET /tasks", 401, json!({"error": "jwt expired"}))
            .reply("GET /tasks", 401, json!({"error": "jwt expired"}))
            .reply("GET /tasks", 200, json!([]));
        let session = FakeSession::new("t1", Ok("t2".into()));
        let client = client(transport.clone(), session.clone());

        let err = client.call("/tasks", RequestOptions::get()).await.unwrap_err();

        assert_eq!(err.status(), 401);
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.requests_to("GET /tasks").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_rejection_surfaces_directly() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("POST /auth/login", 401, json!({"error": "contraseña incorrecta"}));
        let session = FakeSession::new("t1", Ok("t2".into()));
        let client = client(transport.clone(), session.clone());

        let err = client
            .call("/auth/login", RequestOptions::post(json!({"email": "a@b.c", "password": "x"})))
            .await
            .unwrap_err();

        assert!(matches!(err, VoxtaskError::Http { status: 401, ref message, .. } if message == "contraseña incorrecta"));
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_refresh_becomes_session_expired() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("GET /tasks", 401, json!({"error": "Token expired"}));
        let session = FakeSession::new(
            "t1",
            Err(VoxtaskError::Http {
                status: 401,
                message: "Refresh token revoked".into(),
                details: None,
            }),
        );
        let client = client(transport.clone(), session.clone());

        let err = client.call("/tasks", RequestOptions::get()).await.unwrap_err();

        assert!(matches!(err, VoxtaskError::SessionExpired(_)));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push("GET /tasks", Reply::Fail(VoxtaskError::Network("reset".into())))
            .reply("GET /tasks", 503, json!({"error": "Service unavailable"}))
            .reply("GET /tasks", 200, json!({"tasks": []}));
        let session = FakeSession::new("t1", Ok("t2".into()));
        let client = client(transport.clone(), session);
        let start = tokio::time::Instant::now();

        let value = client.call("/tasks", RequestOptions::get()).await.unwrap();

        assert_eq!(value, json!({"tasks": []}));
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("DELETE /tasks/9", 404, json!({"message": "Task not found"}));
        let session = FakeSession::new("t1", Ok("t2".into()));
        let client = client(transport.clone(), session);

        let err = client
            .call("/tasks/9", RequestOptions::delete())
            .await
            .unwrap_err();

        assert_eq!(err.status(), 404);
        assert_eq!(err.to_string(), "Task not found");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_budget() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..3 {
            transport.push(
                "GET /tasks",
                Reply::Delayed(Duration::from_secs(120), 200, "[]".into()),
            );
        }
        let session = FakeSession::new("t1", Ok("t2".into()));
        let client = client(transport.clone(), session);

        let err = client.call("/tasks", RequestOptions::get()).await.unwrap_err();

        assert!(matches!(err, VoxtaskError::Timeout));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unguarded_calls_never_refresh() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("POST /auth/refresh", 401, json!({"error": "Token expired"}));
        let session = FakeSession::new("t1", Ok("t2".into()));
        let client = client(transport.clone(), session.clone());

        let err = client
            .call("/auth/refresh", RequestOptions::post_empty().unguarded())
            .await;

        assert!(matches!(err, Err(VoxtaskError::Http { status: 401, .. })));
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(transport.requests().len(), 1);
    }
}
