//! Request pipeline
//!
//! `ApiClient` is what consumers call. Each call runs
//! attach → send → classify → refresh-or-retry → return, with the whole
//! sequence (including any refresh-triggered replay) wrapped in the retry
//! executor.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use session_auth::{AuthMode, LOGIN_PATH, Session, TokenResponse, Tokens};
use tracing::{debug, info, warn};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::coordinator::RefreshCoordinator;
use crate::dispatch::Dispatcher;
use crate::error::{ApiError, ErrorKind, Result};
use crate::metrics;
use crate::notify::{DEFAULT_NOTICE_WINDOW, NotificationGate, Notifier};
use crate::retry::{self, RetryPolicy};
use crate::terminate::{DEFAULT_TERMINATE_WINDOW, Navigator, SessionTerminator, logout_call};

pub struct ApiClientBuilder {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    retry: RetryPolicy<ApiError>,
    notifier: Option<Arc<dyn Notifier>>,
    navigator: Option<Arc<dyn Navigator>>,
    notice_window: Duration,
    terminate_window: Duration,
}

impl ApiClientBuilder {
    /// Per-call upper bound for requests that do not set their own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy<ApiError>) -> Self {
        self.retry = policy;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn notice_window(mut self, window: Duration) -> Self {
        self.notice_window = window;
        self
    }

    pub fn terminate_window(mut self, window: Duration) -> Self {
        self.terminate_window = window;
        self
    }

    pub fn build(self) -> ApiClient {
        let notices = Arc::new(NotificationGate::new(self.notifier, self.notice_window));
        let dispatcher = Arc::new(Dispatcher::new(
            self.session.clone(),
            self.transport.clone(),
            self.timeout,
        ));
        let terminator = Arc::new(
            SessionTerminator::new(
                self.session.clone(),
                self.transport,
                notices.clone(),
                self.navigator,
            )
            .with_window(self.terminate_window)
            .with_logout_timeout(self.timeout),
        );
        let coordinator = RefreshCoordinator::new(dispatcher.clone(), terminator.clone());
        let single_shot = self.retry.clone().with_retries(0);

        ApiClient {
            session: self.session,
            dispatcher,
            coordinator,
            terminator,
            notices,
            retry: self.retry,
            single_shot,
        }
    }
}

pub struct ApiClient {
    session: Arc<Session>,
    dispatcher: Arc<Dispatcher>,
    coordinator: RefreshCoordinator,
    terminator: Arc<SessionTerminator>,
    notices: Arc<NotificationGate>,
    retry: RetryPolicy<ApiError>,
    /// Used for non-idempotent methods, which are never re-sent.
    single_shot: RetryPolicy<ApiError>,
}

impl ApiClient {
    pub fn builder(session: Arc<Session>, transport: Arc<dyn Transport>) -> ApiClientBuilder {
        ApiClientBuilder {
            session,
            transport,
            timeout: Duration::from_millis(session_auth::DEFAULT_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            notifier: None,
            navigator: None,
            notice_window: DEFAULT_NOTICE_WINDOW,
            terminate_window: DEFAULT_TERMINATE_WINDOW,
        }
    }

    pub fn new(session: Arc<Session>, transport: Arc<dyn Transport>) -> Self {
        Self::builder(session, transport).build()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Run a request through the full pipeline.
    ///
    /// Idempotent methods are retried per the policy; others get one attempt
    /// (plus the replay after a credential refresh).
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let policy = if request.is_idempotent() {
            &self.retry
        } else {
            &self.single_shot
        };

        let result = retry::execute(policy, || self.attempt(&request)).await;

        match &result {
            Ok(response) => {
                metrics::record_request(request.method.as_str(), "success");
                debug!(
                    request_id = %request.request_id,
                    method = %request.method,
                    path = %request.path,
                    status = response.status.as_u16(),
                    "request completed"
                );
            }
            Err(e) => {
                metrics::record_request(request.method.as_str(), e.kind.label());
                warn!(
                    request_id = %request.request_id,
                    method = %request.method,
                    path = %request.path,
                    kind = e.kind.label(),
                    status = e.status.map(|s| s.as_u16()),
                    error = %e.message,
                    "request failed"
                );
                let signed_in = matches!(e.kind, ErrorKind::AuthExpired | ErrorKind::AuthInvalid)
                    && self.session.is_authenticated().await;
                self.notices.report(e, signed_in);
            }
        }
        result
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<ApiResponse> {
        if self.coordinator.is_disposed() {
            return Err(ApiError::cancelled("client disposed").with_request_id(&request.request_id));
        }

        let mut request = request.clone();
        let creds = self.dispatcher.credentials().await;
        match self.dispatcher.dispatch(&creds, &mut request).await {
            Err(e) if e.kind == ErrorKind::AuthExpired => self.coordinator.recover(request).await,
            other => other,
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse> {
        self.send(ApiRequest::post(path).json(body)).await
    }

    pub async fn put_json(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse> {
        self.send(ApiRequest::put(path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::delete(path)).await
    }

    /// GET and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).await?;
        response.json().map_err(|e| {
            ApiError::new(ErrorKind::Unknown, format!("decoding response from {path}: {e}"))
                .with_status(response.status)
        })
    }

    /// Seed the session with tokens obtained elsewhere.
    pub async fn login(&self, tokens: Tokens) {
        match self.session.store(tokens).await {
            Ok(generation) => info!(generation, "signed in"),
            Err(e) => warn!(error = %e, "signed in, but failed to persist credentials"),
        }
    }

    /// POST credentials to the login endpoint and store what comes back.
    pub async fn login_with(&self, credentials: serde_json::Value) -> Result<()> {
        let response = self
            .send(ApiRequest::post(LOGIN_PATH).json(credentials))
            .await?;

        let body: TokenResponse = if response.body.is_empty() {
            TokenResponse::default()
        } else {
            response.json().map_err(|e| {
                ApiError::new(ErrorKind::Unknown, format!("decoding login response: {e}"))
            })?
        };
        let tokens = body
            .into_tokens(self.session.mode())
            .map_err(|e| ApiError::new(ErrorKind::AuthInvalid, e.to_string()))?;

        if self.session.mode() == AuthMode::Cookie {
            // picks the fresh CSRF cookie out of the jar
            self.dispatcher.credentials().await;
        }
        self.login(tokens).await;
        Ok(())
    }

    /// Sign out: clear the session and tell the server (best-effort).
    pub async fn logout(&self) {
        let creds = self.dispatcher.credentials().await;
        let cookies = self.dispatcher.transport().take_cookies();
        if let Err(e) = self.session.clear().await {
            warn!(error = %e, "failed to persist cleared session");
        }

        let request = logout_call(&creds, cookies, self.dispatcher.timeout());
        if let Err(e) = session_auth::send_logout(self.dispatcher.transport(), request).await {
            debug!(error = %e, "logout call failed, cleared locally");
        }
        info!("signed out");
    }

    /// End the session as if credentials had become unusable.
    pub async fn terminate(&self, reason: &str) -> bool {
        self.terminator.terminate(reason).await
    }

    /// Cancel every parked request and make later calls fail with `Cancelled`.
    pub fn dispose(&self) {
        self.coordinator.dispose();
    }
}
