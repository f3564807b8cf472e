//! One request attempt: build, send under a timeout, parse
//!
//! No retries and no credential refresh happen here; those live in
//! [`crate::api::client`]. The auth endpoints driven by the session itself
//! use this layer directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::api::error_handler;
use crate::api::transport::{HttpRequest, HttpResponse, Transport};
use crate::error::{Result, VoxtaskError};

/// Per-call request description
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP method
    pub method: Method,
    /// JSON body
    pub body: Option<Value>,
    /// Query parameters appended to the endpoint
    pub query: Vec<(String, String)>,
    /// Extra headers; these override the defaults
    pub headers: Vec<(String, String)>,
    /// Whether the call waits for and triggers credential refreshes
    pub guarded: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
            guarded: true,
        }
    }
}

impl RequestOptions {
    /// `GET` with no body
    pub fn get() -> Self {
        Self::default()
    }

    /// `POST` with a JSON body
    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }

    /// `POST` without a body
    pub fn post_empty() -> Self {
        Self {
            method: Method::POST,
            ..Self::default()
        }
    }

    /// `PATCH` with a JSON body
    pub fn patch(body: Value) -> Self {
        Self {
            method: Method::PATCH,
            body: Some(body),
            ..Self::default()
        }
    }

    /// `DELETE` with no body
    pub fn delete() -> Self {
        Self {
            method: Method::DELETE,
            ..Self::default()
        }
    }

    /// Append a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Add or override a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Skip refresh coordination; used for calls the session itself makes
    /// while a refresh may be in flight
    pub fn unguarded(mut self) -> Self {
        self.guarded = false;
        self
    }
}

/// Status plus parsed JSON body
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed body (`Null` for 204)
    pub body: Value,
}

impl ParsedResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body on success, or the server-reported error
    pub fn into_result(self) -> Result<Value> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(error_handler::http_error(self.status, &self.body))
        }
    }
}

/// Sends single attempts against the backend
pub struct HttpPipeline {
    transport: Arc<dyn Transport>,
    base_url: String,
    timeout: Duration,
}

impl HttpPipeline {
    /// Create a pipeline for `base_url`
    pub fn new(transport: Arc<dyn Transport>, base_url: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base_url)
            .map_err(|e| VoxtaskError::Config(format!("Invalid API base URL '{}': {}", base_url, e)))?;

        Ok(Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the wire request for an endpoint
    pub fn build(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        credential: Option<&str>,
    ) -> Result<HttpRequest> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, endpoint))
            .map_err(|e| VoxtaskError::InvalidInput(format!("Invalid endpoint '{}': {}", endpoint, e)))?;
        if !options.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &options.query {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(token) = credential.filter(|t| !t.is_empty()) {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        for (name, value) in &options.headers {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }

        let body = options.body.as_ref().map(serde_json::to_string).transpose()?;

        Ok(HttpRequest {
            method: options.method.clone(),
            url: url.into(),
            headers,
            body,
        })
    }

    /// Send one attempt and parse its body
    ///
    /// Fails with `Timeout` when the transport does not answer in time (the
    /// in-flight call is dropped), `Network` when no response arrived, and
    /// `InvalidServerResponse` / `ResponseParse` for non-JSON bodies.
    pub async fn execute(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        credential: Option<&str>,
    ) -> Result<ParsedResponse> {
        let request = self.build(endpoint, options, credential)?;
        let method = request.method.clone();
        debug!(%method, endpoint, authorized = credential.is_some(), "sending request");

        let started = Instant::now();
        let response = match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(response) => response?,
            Err(_) => {
                debug!(%method, endpoint, timeout_ms = self.timeout.as_millis() as u64, "request timed out");
                return Err(VoxtaskError::Timeout);
            }
        };
        debug!(
            %method,
            endpoint,
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "response received"
        );

        parse_response(response)
    }
}

/// Parse a raw response body as JSON
fn parse_response(response: HttpResponse) -> Result<ParsedResponse> {
    let status = response.status;
    let parse_failure = || {
        if response.is_success() {
            VoxtaskError::ResponseParse { status }
        } else {
            VoxtaskError::InvalidServerResponse { status }
        }
    };

    if response.body.trim().is_empty() {
        if status == 204 {
            return Ok(ParsedResponse {
                status,
                body: Value::Null,
            });
        }
        return Err(parse_failure());
    }

    let body = serde_json::from_str(&response.body).map_err(|_| parse_failure())?;
    Ok(ParsedResponse { status, body })
}
