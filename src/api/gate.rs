//! Single-flight coordination of credential refreshes
//!
//! When several requests discover an expired credential at the same time,
//! only one refresh reaches the backend. Everyone else either shares that
//! refresh's outcome ([`RequestGate::refresh`]) or waits for it to settle
//! ([`RequestGate::enqueue`]).

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Result, VoxtaskError};

type SharedRefresh<T> = Shared<BoxFuture<'static, Result<T>>>;

struct GateState<T: Clone> {
    active: Option<SharedRefresh<T>>,
    queue: Vec<oneshot::Sender<Result<()>>>,
}

/// At most one refresh in flight; waiters drained FIFO on settlement
pub struct RequestGate<T: Clone> {
    state: Arc<Mutex<GateState<T>>>,
}

impl<T> RequestGate<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an idle gate
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                active: None,
                queue: Vec::new(),
            })),
        }
    }

    fn lock(state: &Mutex<GateState<T>>) -> MutexGuard<'_, GateState<T>> {
        state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        Self::lock(&self.state).active.is_some()
    }

    /// Number of callers waiting for the in-flight refresh to settle
    pub fn queued(&self) -> usize {
        Self::lock(&self.state).queue.len()
    }

    /// Join the in-flight refresh, or start one with `do_refresh`
    ///
    /// `do_refresh` is only invoked when no refresh is active. The refresh
    /// runs on its own task, so it settles (and drains the queue) even if
    /// every caller stops waiting.
    pub async fn refresh<F, Fut>(&self, do_refresh: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = {
            let mut state = Self::lock(&self.state);
            match state.active.clone() {
                Some(active) => {
                    debug!("refresh already in flight, joining it");
                    active
                }
                None => {
                    let gate_state = Arc::clone(&self.state);
                    let refresh = do_refresh();
                    let task = tokio::spawn(async move {
                        let outcome = refresh.await;
                        let waiters = {
                            let mut state = Self::lock(&gate_state);
                            state.active = None;
                            std::mem::take(&mut state.queue)
                        };
                        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "refresh settled");
                        for waiter in waiters {
                            let _ = waiter.send(outcome.as_ref().map(|_| ()).map_err(Clone::clone));
                        }
                        outcome
                    });

                    let shared = async move {
                        task.await.unwrap_or_else(|err| {
                            Err(VoxtaskError::Custom(format!("Credential refresh aborted: {}", err)))
                        })
                    }
                    .boxed()
                    .shared();
                    state.active = Some(shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    /// Wait for the in-flight refresh, if any, to settle
    ///
    /// Resolves immediately when nothing is in flight. Fails with the
    /// refresh's error when the refresh failed.
    pub async fn enqueue(&self) -> Result<()> {
        let waiter = {
            let mut state = Self::lock(&self.state);
            if state.active.is_none() {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.queue.push(tx);
            rx
        };

        // A dropped sender means the refresh task itself went away
        waiter.await.unwrap_or(Ok(()))
    }
}

impl<T> Default for RequestGate<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> std::fmt::Debug for RequestGate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("RequestGate")
            .field("refreshing", &state.active.is_some())
            .field("queued", &state.queue.len())
            .finish()
    }
}
