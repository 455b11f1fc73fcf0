//! Session termination
//!
//! Ends a session that can no longer be recovered: clears the credential
//! store, shows one "session expired" notice, asks the host application to
//! navigate to sign-in, and tells the server best-effort. Repeated calls
//! within the window collapse into one.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use session_auth::{AuthMode, Credentials, Session};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use transport::{ApiRequest, HeaderValue, Transport, header};

use crate::error::ErrorKind;
use crate::metrics;
use crate::notify::NotificationGate;

/// Fixed key shared by the termination notice and auth-failure notices.
pub const SESSION_EXPIRED: &str = "session-expired";

pub const DEFAULT_TERMINATE_WINDOW: Duration = Duration::from_secs(2);

/// Host hook that takes the user to the sign-in entry point.
pub trait Navigator: Send + Sync {
    fn to_sign_in(&self, reason: &str);
}

pub struct SessionTerminator {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    notices: Arc<NotificationGate>,
    navigator: Option<Arc<dyn Navigator>>,
    window: Duration,
    logout_timeout: Duration,
    last: Mutex<Option<Instant>>,
}

impl SessionTerminator {
    pub fn new(
        session: Arc<Session>,
        transport: Arc<dyn Transport>,
        notices: Arc<NotificationGate>,
        navigator: Option<Arc<dyn Navigator>>,
    ) -> Self {
        Self {
            session,
            transport,
            notices,
            navigator,
            window: DEFAULT_TERMINATE_WINDOW,
            logout_timeout: Duration::from_millis(session_auth::DEFAULT_TIMEOUT_MS),
            last: Mutex::new(None),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout = timeout;
        self
    }

    /// End the session. Returns `false` when a termination already ran
    /// within the window and this call did nothing.
    pub async fn terminate(&self, reason: &str) -> bool {
        let now = Instant::now();
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.window {
                    debug!(reason, "session already terminated, skipping");
                    return false;
                }
            }
            *last = Some(now);
        }

        let creds = self.session.snapshot().await;
        // Emptied before the clear so no call in between can copy the CSRF
        // cookie back into the session.
        let cookies = self.transport.take_cookies();
        if let Err(e) = self.session.clear().await {
            warn!(error = %e, "failed to persist cleared session");
        }

        metrics::record_session_termination();
        info!(reason, mode = creds.mode.label(), "session terminated");

        self.notices
            .emit(SESSION_EXPIRED, ErrorKind::AuthInvalid.user_message());
        if let Some(navigator) = &self.navigator {
            navigator.to_sign_in(reason);
        }

        // A bearer session without an access token has nothing to revoke.
        if creds.mode == AuthMode::Bearer && creds.access_token.is_none() {
            return true;
        }
        let request = logout_call(&creds, cookies, self.logout_timeout);
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = session_auth::send_logout(transport.as_ref(), request).await {
                debug!(error = %e, "logout after termination failed, ignoring");
            }
        });

        true
    }
}

/// Logout call presenting the cookies taken out of the jar, if any.
pub(crate) fn logout_call(
    creds: &Credentials,
    cookies: Option<HeaderValue>,
    timeout: Duration,
) -> ApiRequest {
    let request = session_auth::logout_request(creds, timeout);
    match cookies {
        Some(cookies) => request.header(header::COOKIE, cookies),
        None => request,
    }
}
