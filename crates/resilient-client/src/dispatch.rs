//! Single dispatch: attach credentials, send, classify

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use session_auth::{AuthMode, CSRF_COOKIE, Credentials, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, Session};
use tracing::{debug, warn};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::classify;
use crate::error::Result;

pub type ResponseFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;

/// Auth endpoints whose 401 means "credentials wrong", never "refresh and retry".
const NO_REFRESH_PATHS: &[&str] = &[REFRESH_PATH, LOGIN_PATH, LOGOUT_PATH];

pub(crate) struct Dispatcher {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(session: Arc<Session>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            session,
            transport,
            timeout,
        }
    }

    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current credentials, with the CSRF token re-read from the cookie jar
    /// in cookie mode (the server rotates it alongside the auth cookies).
    pub(crate) async fn credentials(&self) -> Credentials {
        if self.session.mode() == AuthMode::Cookie {
            if let Some(csrf) = self.transport.cookie(CSRF_COOKIE) {
                if let Err(e) = self.session.set_csrf_token(csrf).await {
                    warn!(error = %e, "failed to persist csrf token");
                }
            }
        }
        self.session.snapshot().await
    }

    /// Stamp `request` and hand it to the transport.
    ///
    /// The transport is called before this returns, so dispatch order is call
    /// order. The future resolves to the response for 2xx and a classified
    /// error otherwise.
    pub(crate) fn dispatch(&self, creds: &Credentials, request: &mut ApiRequest) -> ResponseFuture<'_> {
        session_auth::stamp(creds, request);
        if request.timeout.is_none() {
            request.timeout = Some(self.timeout);
        }

        let final_401 = request.replayed || NO_REFRESH_PATHS.contains(&request.endpoint());
        let request_id = request.request_id.clone();
        let method = request.method.clone();
        let path = request.path.clone();
        let replayed = request.replayed;
        let pending = self.transport.send(request.clone());

        Box::pin(async move {
            match pending.await {
                Ok(response) if response.is_success() => {
                    debug!(request_id = %request_id, method = %method, path = %path, status = response.status.as_u16(), replayed, "request succeeded");
                    Ok(response)
                }
                Ok(response) => {
                    let error = classify::classify_response(&response, final_401)
                        .with_request_id(request_id.clone());
                    debug!(
                        request_id = %request_id,
                        method = %method,
                        path = %path,
                        status = response.status.as_u16(),
                        kind = error.kind.label(),
                        replayed,
                        "request failed"
                    );
                    Err(error)
                }
                Err(e) => {
                    let error = classify::transport_failure(&e).with_request_id(request_id.clone());
                    debug!(request_id = %request_id, method = %method, path = %path, error = %e, "no response");
                    Err(error)
                }
            }
        })
    }
}
