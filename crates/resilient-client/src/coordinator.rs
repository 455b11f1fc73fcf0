//! Single-flight credential refresh
//!
//! The first request to fail with an expired credential becomes the leader:
//! it performs the one refresh call while every other expired request parks
//! in a FIFO queue. When the refresh settles the leader either replays the
//! whole batch with the new credentials, in arrival order, or rejects it with
//! one shared error and ends the session.
//!
//! The state lock is a `std::sync::Mutex` and is never held across an await.
//! A request whose credential generation is already out of date skips the
//! refresh and is replayed directly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use transport::{ApiRequest, ApiResponse};

use crate::dispatch::Dispatcher;
use crate::error::{ApiError, ErrorKind, Result};
use crate::metrics;
use crate::terminate::SessionTerminator;

/// Why a refresh did not produce new credentials.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshFailure {
    #[error("no refresh token stored")]
    MissingToken,

    /// The server refused the refresh credential.
    #[error("refresh rejected: {0}")]
    Rejected(String),

    /// Non-2xx, `success: false` or an unreadable body.
    #[error("refresh failed: {0}")]
    Failed(String),

    /// The refresh call got no response.
    #[error("refresh endpoint unreachable: {0}")]
    Network(String),
}

impl RefreshFailure {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshFailure::MissingToken => "missing_token",
            RefreshFailure::Rejected(_) => "rejected",
            RefreshFailure::Failed(_) => "failed",
            RefreshFailure::Network(_) => "network",
        }
    }

    /// Kind handed to every waiting caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RefreshFailure::Network(_) => ErrorKind::Network,
            _ => ErrorKind::AuthInvalid,
        }
    }

    /// A refresh that never reached the server says nothing about the
    /// credentials, so the session survives it.
    pub fn ends_session(&self) -> bool {
        !matches!(self, RefreshFailure::Network(_))
    }
}

impl From<session_auth::Error> for RefreshFailure {
    fn from(e: session_auth::Error) -> Self {
        match e {
            session_auth::Error::MissingRefreshToken => RefreshFailure::MissingToken,
            session_auth::Error::InvalidCredentials(msg) => RefreshFailure::Rejected(msg),
            session_auth::Error::Transport(e) => RefreshFailure::Network(e.to_string()),
            other => RefreshFailure::Failed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

struct Pending {
    request: ApiRequest,
    reply: oneshot::Sender<Result<ApiResponse>>,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    disposed: bool,
    queue: VecDeque<Pending>,
}

enum Role {
    Leader(ApiRequest),
    Queued(oneshot::Receiver<Result<ApiResponse>>),
    Stale(ApiRequest),
    Disposed,
}

pub struct RefreshCoordinator {
    dispatcher: Arc<Dispatcher>,
    terminator: Arc<SessionTerminator>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, terminator: Arc<SessionTerminator>) -> Self {
        Self {
            dispatcher,
            terminator,
            state: Mutex::new(RefreshState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> RefreshPhase {
        if self.lock().refreshing {
            RefreshPhase::Refreshing
        } else {
            RefreshPhase::Idle
        }
    }

    /// Requests parked behind the refresh in flight.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Recover a request that failed with `AuthExpired`.
    ///
    /// `request` must be the stamped request that failed; its generation
    /// tells whether the credentials it carried are still current.
    pub async fn recover(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request_id = request.request_id.clone();
        if !self.is_disposed() && !self.dispatcher.credentials().await.is_authenticated() {
            // Signed out (usually already terminated): nothing to refresh,
            // and ending the session again would repeat the notice.
            debug!(request_id = %request_id, "no credentials, not refreshing");
            return Err(ApiError::new(ErrorKind::AuthInvalid, "not signed in")
                .with_status(transport::StatusCode::UNAUTHORIZED)
                .with_request_id(request_id));
        }
        let role = {
            let mut state = self.lock();
            if state.disposed {
                Role::Disposed
            } else if request.generation != self.dispatcher.session().generation() {
                Role::Stale(request)
            } else if state.refreshing {
                let (reply, rx) = oneshot::channel();
                state.queue.push_back(Pending { request, reply });
                debug!(request_id = %request_id, position = state.queue.len(), "waiting for token refresh");
                Role::Queued(rx)
            } else {
                state.refreshing = true;
                Role::Leader(request)
            }
        };

        match role {
            Role::Leader(request) => self.lead(request).await,
            Role::Queued(rx) => rx.await.unwrap_or_else(|_| {
                Err(ApiError::cancelled("refresh abandoned before replay").with_request_id(request_id))
            }),
            Role::Stale(request) => {
                debug!(request_id = %request_id, "credentials changed since dispatch, replaying");
                self.replay(request).await
            }
            Role::Disposed => Err(ApiError::cancelled("client disposed").with_request_id(request_id)),
        }
    }

    async fn lead(&self, request: ApiRequest) -> Result<ApiResponse> {
        let guard = RefreshGuard {
            coordinator: self,
            armed: true,
        };
        info!(request_id = %request.request_id, "access token expired, refreshing");

        let outcome = self.refresh().await;
        let queued = guard.finish();

        match outcome {
            Ok(generation) => {
                metrics::record_refresh("success");
                if self.is_disposed() {
                    return Err(ApiError::cancelled("client disposed").with_request_id(request.request_id));
                }
                debug!(generation, waiting = queued.len(), "refresh succeeded, replaying");
                self.replay_all(request, queued).await
            }
            Err(failure) => {
                metrics::record_refresh(failure.label());
                warn!(
                    reason = failure.label(),
                    error = %failure,
                    waiting = queued.len(),
                    "token refresh failed, rejecting waiting requests"
                );
                // Terminate first so every waiter observes the cleared session.
                if failure.ends_session() {
                    self.terminator.terminate(failure.label()).await;
                }
                let error = ApiError::new(failure.kind(), failure.to_string());
                for pending in queued {
                    let _ = pending.reply.send(Err(error
                        .clone()
                        .with_request_id(pending.request.request_id)));
                }
                Err(error.with_request_id(request.request_id))
            }
        }
    }

    /// Refresh and store new credentials. Returns the new generation.
    async fn refresh(&self) -> std::result::Result<u64, RefreshFailure> {
        let creds = self.dispatcher.credentials().await;
        let tokens = session_auth::refresh_token(
            self.dispatcher.transport(),
            &creds,
            self.dispatcher.timeout(),
        )
        .await?;

        let session = self.dispatcher.session();
        match session.store(tokens).await {
            Ok(generation) => Ok(generation),
            Err(e) => {
                // in-memory credentials are updated even when the write fails
                warn!(error = %e, "failed to persist refreshed credentials");
                Ok(session.generation())
            }
        }
    }

    /// Replay the trigger and every parked request with fresh credentials.
    ///
    /// All requests are handed to the transport in arrival order before any
    /// response is awaited; each waiter is settled as soon as its own replay
    /// finishes.
    async fn replay_all(&self, mut trigger: ApiRequest, queued: Vec<Pending>) -> Result<ApiResponse> {
        let creds = self.dispatcher.credentials().await;
        metrics::record_replays(queued.len() + 1);

        trigger.replayed = true;
        let own = self.dispatcher.dispatch(&creds, &mut trigger);
        let waiters: Vec<_> = queued
            .into_iter()
            .map(|Pending { mut request, reply }| {
                request.replayed = true;
                let response = self.dispatcher.dispatch(&creds, &mut request);
                async move {
                    let _ = reply.send(response.await);
                }
            })
            .collect();

        let (result, _) = tokio::join!(own, join_all(waiters));
        result
    }

    async fn replay(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        let creds = self.dispatcher.credentials().await;
        metrics::record_replays(1);
        request.replayed = true;
        self.dispatcher.dispatch(&creds, &mut request).await
    }

    /// Reject everything parked with `Cancelled` and refuse further work.
    pub fn dispose(&self) {
        let queue = {
            let mut state = self.lock();
            state.disposed = true;
            std::mem::take(&mut state.queue)
        };
        info!(rejected = queue.len(), "client disposed");
        for pending in queue {
            let _ = pending.reply.send(Err(
                ApiError::cancelled("client disposed").with_request_id(pending.request.request_id)
            ));
        }
    }

    /// Leave the refreshing state and take the queue in one step.
    fn settle(&self) -> VecDeque<Pending> {
        let mut state = self.lock();
        state.refreshing = false;
        std::mem::take(&mut state.queue)
    }
}

/// Ends the refreshing state if the leader's future is dropped mid-refresh,
/// so waiters are cancelled instead of hanging.
struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl RefreshGuard<'_> {
    fn finish(mut self) -> Vec<Pending> {
        self.armed = false;
        self.coordinator.settle().into()
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let queue = self.coordinator.settle();
        warn!(waiting = queue.len(), "refresh abandoned");
        for pending in queue {
            let _ = pending.reply.send(Err(
                ApiError::cancelled("refresh abandoned").with_request_id(pending.request.request_id)
            ));
        }
    }
}
