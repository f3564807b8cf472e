//! Raw network seam
//!
//! Everything above this module speaks [`HttpRequest`] / [`HttpResponse`];
//! only [`ReqwestTransport`] knows about the actual HTTP stack.

use futures::future::BoxFuture;
use reqwest::{Client, Method};

use crate::error::Result;

/// A fully built request, ready to send
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL including query string
    pub url: String,
    /// Header name/value pairs
    pub headers: Vec<(String, String)>,
    /// Serialized JSON body
    pub body: Option<String>,
}

impl HttpRequest {
    /// Value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status and raw body of a response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Body text, possibly empty
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests over the network
///
/// Errors are reserved for failures where no response arrived.
pub trait Transport: Send + Sync {
    /// Send one request and collect the whole response body
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

/// [`Transport`] backed by reqwest
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with a default reqwest client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create a transport around an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let mut builder = self.client.request(request.method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok(HttpResponse { status, body })
        })
    }
}

/// In-memory transport for tests: scripted responses per route, every
/// request recorded
#[cfg(test)]
pub mod testing {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::error::VoxtaskError;

    /// What a scripted route answers
    #[derive(Debug, Clone)]
    pub enum Reply {
        /// Respond with a status and a body
        Respond(u16, String),
        /// Fail as if the connection dropped
        Fail(VoxtaskError),
        /// Respond after a delay (use with paused time)
        Delayed(Duration, u16, String),
    }

    /// Route-keyed scripted transport
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<HashMap<String, VecDeque<Reply>>>,
        log: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn route_key(method: &Method, url: &str) -> String {
            let path = url
                .split_once("://")
                .map(|(_, rest)| rest)
                .and_then(|rest| rest.find('/').map(|idx| &rest[idx..]))
                .unwrap_or(url);
            let path = path.split('?').next().unwrap_or(path);
            format!("{} {}", method, path)
        }

        /// Queue a JSON reply for `"METHOD /path"`
        pub fn reply(&self, route: &str, status: u16, body: serde_json::Value) -> &Self {
            self.push(route, Reply::Respond(status, body.to_string()))
        }

        /// Queue a raw reply for `"METHOD /path"`
        pub fn reply_raw(&self, route: &str, status: u16, body: &str) -> &Self {
            self.push(route, Reply::Respond(status, body.to_string()))
        }

        /// Queue any reply for `"METHOD /path"`
        pub fn push(&self, route: &str, reply: Reply) -> &Self {
            self.routes
                .lock()
                .unwrap()
                .entry(route.to_string())
                .or_default()
                .push_back(reply);
            self
        }

        /// Every request sent so far
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.log.lock().unwrap().clone()
        }

        /// Requests sent to one route
        pub fn requests_to(&self, route: &str) -> Vec<HttpRequest> {
            self.requests()
                .into_iter()
                .filter(|r| Self::route_key(&r.method, &r.url) == route)
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
            let key = Self::route_key(&request.method, &request.url);
            self.log.lock().unwrap().push(request);
            let reply = self
                .routes
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(VecDeque::pop_front);

            Box::pin(async move {
                match reply {
                    Some(Reply::Respond(status, body)) => Ok(HttpResponse { status, body }),
                    Some(Reply::Delayed(delay, status, body)) => {
                        tokio::time::sleep(delay).await;
                        Ok(HttpResponse { status, body })
                    }
                    Some(Reply::Fail(err)) => Err(err),
                    None => Err(VoxtaskError::Network(format!("no scripted reply for {}", key))),
                }
            })
        }
    }
}
