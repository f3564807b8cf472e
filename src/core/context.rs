//! Application wiring
//!
//! Builds the object graph once per process: one transport, one pipeline,
//! one session, and the resilient client and services on top of them.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::api::auth::{AuthService, HttpAuthBackend};
use crate::api::client::ResilientHttpClient;
use crate::api::pipeline::HttpPipeline;
use crate::api::tasks::TaskService;
use crate::api::transport::{ReqwestTransport, Transport};
use crate::core::config::Config;
use crate::core::history::TaskHistory;
use crate::core::session::SessionController;
use crate::core::store::SessionStore;
use crate::error::Result;

/// Everything a front end needs to talk to the backend
pub struct AppContext {
    /// Effective configuration
    pub config: Config,
    /// Session owner
    pub session: SessionController,
    /// Shared API client
    pub client: Arc<ResilientHttpClient>,
    /// Authentication calls
    pub auth: AuthService,
    /// Task calls
    pub tasks: TaskService,
}

impl AppContext {
    /// Wire the application from configuration
    pub fn from_config(config: Config) -> Result<Self> {
        let store = config.store.open()?;
        let history_dir = config.store.history_dir()?;
        Self::with_parts(config, Arc::new(ReqwestTransport::new()), store, history_dir)
    }

    /// Wire the application around an explicit transport and store
    ///
    /// Task history is kept in memory when `history_dir` is `None`.
    pub fn with_parts(
        config: Config,
        transport: Arc<dyn Transport>,
        store: Box<dyn SessionStore>,
        history_dir: Option<PathBuf>,
    ) -> Result<Self> {
        debug!(
            api = %config.api_base_url,
            store = %config.store,
            "building application context"
        );

        let pipeline = Arc::new(HttpPipeline::new(
            transport,
            &config.api_base_url,
            config.request_timeout(),
        )?);
        let backend = Arc::new(HttpAuthBackend::new(
            Arc::clone(&pipeline),
            config.retry_policy(),
        ));
        let session = SessionController::new(config.session_timing(), store, backend);

        let history = Arc::new(TaskHistory::new(history_dir, Arc::new(session.clone())));

        let client = Arc::new(ResilientHttpClient::new(
            pipeline,
            Arc::new(session.clone()),
            Arc::new(session.clone()),
            config.retry_policy(),
        ));

        Ok(Self {
            auth: AuthService::new(Arc::clone(&client)),
            tasks: TaskService::new(Arc::clone(&client), history),
            config,
            session,
            client,
        })
    }
}
