//! Session state machine
//!
//! [`SessionController`] is the only holder of mutable session state. It
//! restores a persisted session on startup, records logins, refreshes the
//! credential through a single-flight [`RequestGate`], and runs an expiry
//! monitor that refreshes proactively before the credential lapses.
//!
//! ```text
//! Unknown → Verifying → { Authenticated, Unauthenticated }
//! Authenticated ⇄ Refreshing → { Authenticated, Unauthenticated }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::auth::AuthBackend;
use crate::api::client::{CredentialSource, RefreshInvoker};
use crate::api::gate::RequestGate;
use crate::core::history::UserSource;
use crate::core::store::SessionStore;
use crate::core::token_manager::{Credential, TokenManager};
use crate::error::{Result, VoxtaskError};

/// Minimal user identity returned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Backend user id
    #[serde(alias = "_id", deserialize_with = "deserialize_id")]
    pub id: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Accept ids sent either as strings or as numbers
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    /// Process just started
    #[default]
    Unknown,
    /// Checking a persisted session with the backend
    Verifying,
    /// Holding a credential the backend accepts
    Authenticated,
    /// No session
    Unauthenticated,
    /// Exchanging the credential for a new one
    Refreshing,
}

impl std::fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthPhase::Unknown => "unknown",
            AuthPhase::Verifying => "verifying",
            AuthPhase::Authenticated => "authenticated",
            AuthPhase::Unauthenticated => "unauthenticated",
            AuthPhase::Refreshing => "refreshing",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of the session
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Current credential
    pub credential: Option<Credential>,
    /// Identity the credential belongs to; present iff `credential` is
    pub principal: Option<Principal>,
    /// Lifecycle phase
    pub phase: AuthPhase,
    /// Set by the expiry monitor when the credential is about to lapse
    pub expiring_soon: bool,
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was established by login or restore
    LoggedIn,
    /// The credential was replaced by a refresh
    Refreshed,
    /// The credential expires soon
    ExpiringSoon {
        /// Seconds left
        remaining_secs: i64,
    },
    /// The credential lapsed and the session was dropped
    Expired,
    /// The session was cleared
    LoggedOut,
}

/// Expiry monitor thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Remaining lifetime below which the UI is warned
    pub warn_threshold: Duration,
    /// Remaining lifetime below which a refresh is started
    pub auto_refresh_threshold: Duration,
    /// How often the monitor checks
    pub check_interval: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            warn_threshold: Duration::from_secs(5 * 60),
            auto_refresh_threshold: Duration::from_secs(2 * 60),
            check_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of one expiry check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCheck {
    /// No credential, or one without an expiry
    NoSession,
    /// Plenty of time left
    Healthy {
        /// Time left
        remaining: chrono::Duration,
    },
    /// Inside the warning window
    ExpiringSoon {
        /// Time left
        remaining: chrono::Duration,
        /// Whether a proactive refresh was started
        refresh_started: bool,
    },
    /// Already expired; the session was dropped
    Expired,
}

#[derive(Debug, Default)]
struct SessionState {
    credential: Option<Credential>,
    principal: Option<Principal>,
    phase: AuthPhase,
    expiring_soon: bool,
}

struct SessionInner {
    timing: SessionTiming,
    store: Box<dyn SessionStore>,
    backend: Arc<dyn AuthBackend>,
    gate: RequestGate<Credential>,
    state: Mutex<SessionState>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let monitor = self
            .monitor
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = monitor.take() {
            handle.abort();
        }
    }
}

/// Owner of the session; cheap to clone
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SessionController")
            .field("phase", &state.phase)
            .field("principal", &state.principal)
            .field("gate", &self.inner.gate)
            .finish()
    }
}

impl SessionController {
    /// Create a controller in the `Unknown` phase
    pub fn new(
        timing: SessionTiming,
        store: Box<dyn SessionStore>,
        backend: Arc<dyn AuthBackend>,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(SessionInner {
                timing,
                store,
                backend,
                gate: RequestGate::new(),
                state: Mutex::new(SessionState::default()),
                monitor: Mutex::new(None),
                events,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────────

    /// Copy of the current session
    pub fn snapshot(&self) -> Session {
        let state = self.state();
        Session {
            credential: state.credential.clone(),
            principal: state.principal.clone(),
            phase: state.phase,
            expiring_soon: state.expiring_soon,
        }
    }

    /// Current phase
    pub fn phase(&self) -> AuthPhase {
        self.state().phase
    }

    /// Current credential
    pub fn credential(&self) -> Option<Credential> {
        self.state().credential.clone()
    }

    /// Current principal
    pub fn principal(&self) -> Option<Principal> {
        self.state().principal.clone()
    }

    /// Whether a credential is held
    pub fn is_authenticated(&self) -> bool {
        self.state().credential.is_some()
    }

    /// Whether a refresh is in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.gate.is_refreshing()
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Restore a persisted session on startup
    ///
    /// Never fails: anything that goes wrong ends in `Unauthenticated` with
    /// storage cleared.
    pub async fn restore(&self) -> AuthPhase {
        self.state().phase = AuthPhase::Verifying;

        let stored = match self.inner.store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("no persisted session");
                self.state().phase = AuthPhase::Unauthenticated;
                return AuthPhase::Unauthenticated;
            }
            Err(err) => {
                warn!("persisted session unreadable, clearing it: {}", err);
                self.logout_quietly();
                return AuthPhase::Unauthenticated;
            }
        };

        let credential = Credential::new(stored.token.clone());
        if !credential.is_expired_at(Utc::now()) {
            match self.inner.backend.verify(stored.token).await {
                Ok(()) => {
                    self.install(credential, stored.user);
                    info!("persisted session verified");
                    self.emit(SessionEvent::LoggedIn);
                    self.ensure_monitor();
                    AuthPhase::Authenticated
                }
                Err(err) => {
                    info!("persisted session rejected: {}", err);
                    self.logout_quietly();
                    AuthPhase::Unauthenticated
                }
            }
        } else {
            info!("persisted credential expired, refreshing");
            {
                let mut state = self.state();
                state.credential = Some(credential);
                state.principal = Some(stored.user);
            }
            match self.refresh().await {
                Ok(_) => {
                    self.emit(SessionEvent::LoggedIn);
                    AuthPhase::Authenticated
                }
                Err(err) => {
                    info!("could not revive expired session: {}", err);
                    self.logout_quietly();
                    AuthPhase::Unauthenticated
                }
            }
        }
    }

    /// Record a successful login
    ///
    /// Persists the credential and principal, then becomes `Authenticated`.
    /// Makes no network call.
    pub fn login(&self, token: &str, principal: Principal) -> Result<()> {
        if token.is_empty() {
            return Err(VoxtaskError::InvalidInput(
                "Login response did not include a token".to_string(),
            ));
        }
        self.inner.store.save(token, &principal)?;
        info!(user = %principal.id, "logged in");
        self.install(Credential::new(token), principal);
        self.emit(SessionEvent::LoggedIn);
        self.ensure_monitor();
        Ok(())
    }

    /// Refresh the credential
    ///
    /// Concurrent calls share one backend refresh. A rejected refresh (401)
    /// logs the session out and fails with `SessionExpired`; a transient
    /// failure leaves the session in place.
    pub async fn refresh(&self) -> Result<Credential> {
        let this = self.clone();
        self.inner
            .gate
            .refresh(move || async move { this.perform_refresh().await })
            .await
    }

    async fn perform_refresh(&self) -> Result<Credential> {
        let current = {
            let mut state = self.state();
            if state.credential.is_some() {
                state.phase = AuthPhase::Refreshing;
            }
            state.credential.clone()
        };
        let Some(current) = current else {
            self.logout_quietly();
            return Err(VoxtaskError::SessionExpired(
                "no credential to refresh".to_string(),
            ));
        };

        match self.inner.backend.refresh(current.expose().to_string()).await {
            Ok(grant) => {
                let credential = Credential::new(grant.token.clone());
                let principal = grant.user.or_else(|| self.state().principal.clone());
                match &principal {
                    Some(user) => {
                        if let Err(err) = self.inner.store.save(&grant.token, user) {
                            warn!("refreshed credential not persisted: {}", err);
                        }
                    }
                    None => warn!("refreshed credential has no principal to persist with"),
                }
                {
                    let mut state = self.state();
                    state.credential = Some(credential.clone());
                    state.principal = principal;
                    state.phase = AuthPhase::Authenticated;
                    state.expiring_soon = false;
                }
                info!("credential refreshed");
                self.emit(SessionEvent::Refreshed);
                self.ensure_monitor();
                Ok(credential)
            }
            Err(err) if err.is_unauthorized() => {
                warn!("refresh rejected, logging out: {}", err);
                self.logout_quietly();
                Err(match err {
                    VoxtaskError::SessionExpired(_) => err,
                    other => VoxtaskError::SessionExpired(other.to_string()),
                })
            }
            Err(err) => {
                warn!("refresh failed, keeping session: {}", err);
                let mut state = self.state();
                state.phase = if state.credential.is_some() {
                    AuthPhase::Authenticated
                } else {
                    AuthPhase::Unauthenticated
                };
                Err(err)
            }
        }
    }

    /// Clear the session and storage; idempotent
    pub fn logout(&self) -> Result<()> {
        if let Some(handle) = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }

        let was_active = {
            let mut state = self.state();
            let was_active = state.credential.is_some();
            *state = SessionState {
                phase: AuthPhase::Unauthenticated,
                ..SessionState::default()
            };
            was_active
        };
        if was_active {
            info!("logged out");
            self.emit(SessionEvent::LoggedOut);
        }

        self.inner.store.clear()
    }

    fn logout_quietly(&self) {
        if let Err(err) = self.logout() {
            warn!("session storage not cleared: {}", err);
        }
    }

    /// Apply a profile update: replace whichever of token and principal the
    /// backend returned
    pub fn update_session(&self, token: Option<&str>, principal: Option<Principal>) -> Result<()> {
        let (current_token, current_principal) = {
            let state = self.state();
            match (&state.credential, &state.principal) {
                (Some(credential), Some(principal)) => {
                    (credential.expose().to_string(), principal.clone())
                }
                _ => return Err(VoxtaskError::NotAuthenticated),
            }
        };

        let token = token.filter(|t| !t.is_empty()).map(str::to_string);
        let new_token = token.clone().unwrap_or(current_token);
        let new_principal = principal.unwrap_or(current_principal);
        self.inner.store.save(&new_token, &new_principal)?;

        let mut state = self.state();
        if token.is_some() {
            state.credential = Some(Credential::new(new_token));
        }
        state.principal = Some(new_principal);
        state.expiring_soon = false;
        Ok(())
    }

    fn install(&self, credential: Credential, principal: Principal) {
        let mut state = self.state();
        state.credential = Some(credential);
        state.principal = Some(principal);
        state.phase = AuthPhase::Authenticated;
        state.expiring_soon = false;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expiry monitor
    // ─────────────────────────────────────────────────────────────────────────

    /// Evaluate the credential's remaining lifetime at `now`
    ///
    /// Inside the warning window the UI is notified; inside the auto window a
    /// refresh is started in the background and its outcome ignored (the
    /// 401 path covers a failure). An expired credential logs out.
    pub fn check_expiry(&self, now: DateTime<Utc>) -> ExpiryCheck {
        let (expiry, refreshing) = {
            let state = self.state();
            (
                state.credential.as_ref().and_then(Credential::expires_at),
                state.phase == AuthPhase::Refreshing,
            )
        };
        let Some(expiry) = expiry else {
            return ExpiryCheck::NoSession;
        };

        let remaining = TokenManager::time_until_expiry(expiry, now);
        if remaining <= chrono::Duration::zero() {
            info!("credential expired");
            self.logout_quietly();
            self.emit(SessionEvent::Expired);
            return ExpiryCheck::Expired;
        }

        let warn_window = to_chrono(self.inner.timing.warn_threshold);
        if remaining > warn_window {
            self.state().expiring_soon = false;
            return ExpiryCheck::Healthy { remaining };
        }

        self.state().expiring_soon = true;
        self.emit(SessionEvent::ExpiringSoon {
            remaining_secs: remaining.num_seconds(),
        });

        let auto_window = to_chrono(self.inner.timing.auto_refresh_threshold);
        let refresh_started = remaining <= auto_window
            && !refreshing
            && !self.inner.gate.is_refreshing()
            && self.spawn_proactive_refresh();

        ExpiryCheck::ExpiringSoon {
            remaining,
            refresh_started,
        }
    }

    fn spawn_proactive_refresh(&self) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let this = self.clone();
        runtime.spawn(async move {
            if let Err(err) = this.refresh().await {
                warn!("proactive refresh failed: {}", err);
            }
        });
        true
    }

    fn ensure_monitor(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime, expiry monitor not started");
            return;
        };

        let mut monitor = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if monitor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.timing.check_interval;
        *monitor = Some(runtime.spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let controller = SessionController { inner };
                if matches!(
                    controller.check_expiry(Utc::now()),
                    ExpiryCheck::Expired | ExpiryCheck::NoSession
                ) {
                    break;
                }
            }
        }));
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

impl CredentialSource for SessionController {
    fn current_credential(&self) -> Option<String> {
        self.state()
            .credential
            .as_ref()
            .map(|credential| credential.expose().to_string())
    }
}

impl UserSource for SessionController {
    fn current_user_id(&self) -> Option<String> {
        self.state().principal.as_ref().map(|principal| principal.id.clone())
    }
}

impl RefreshInvoker for SessionController {
    fn refresh_credential(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.refresh()
                .await
                .map(|credential| credential.expose().to_string())
        })
    }

    fn wait_for_refresh(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.inner.gate.enqueue())
    }
}
