//! User-facing notifications
//!
//! The layer does not render anything itself. It hands one `Notice` per
//! failure kind to a `Notifier` supplied by the embedding application and
//! suppresses repeats of the same key within a short window, so a burst of
//! failing calls produces a single toast.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{ApiError, ErrorKind};

pub const DEFAULT_NOTICE_WINDOW: Duration = Duration::from_secs(3);

/// Key for an auth refusal that left the session signed in.
pub const AUTH_REFUSED: &str = "auth-refused";

const AUTH_REFUSED_MESSAGE: &str = "Invalid authentication token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// De-duplication key, e.g. `session-expired` or an error kind label.
    pub key: &'static str,
    pub message: &'static str,
}

/// Sink for user-visible notices (toast, banner, log line).
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

pub struct NotificationGate {
    notifier: Option<Arc<dyn Notifier>>,
    window: Duration,
    recent: Mutex<HashMap<&'static str, Instant>>,
}

impl NotificationGate {
    pub fn new(notifier: Option<Arc<dyn Notifier>>, window: Duration) -> Self {
        Self {
            notifier,
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Gate that swallows everything.
    pub fn silent() -> Self {
        Self::new(None, DEFAULT_NOTICE_WINDOW)
    }

    /// Surface the message for a failed call.
    ///
    /// Cancellations are never shown. An auth failure on a signed-out session
    /// belongs to the session terminator, which has already announced it; on
    /// a session that is still signed in (a replay refused even with fresh
    /// credentials) it gets its own notice instead of "session expired".
    pub fn report(&self, error: &ApiError, signed_in: bool) -> bool {
        match error.kind {
            ErrorKind::Cancelled => false,
            ErrorKind::AuthExpired | ErrorKind::AuthInvalid if signed_in => {
                self.emit(AUTH_REFUSED, AUTH_REFUSED_MESSAGE)
            }
            ErrorKind::AuthExpired | ErrorKind::AuthInvalid => {
                debug!(kind = error.kind.label(), "signed out, leaving notice to terminator");
                false
            }
            kind => self.emit(kind.notice_key(), kind.user_message()),
        }
    }

    /// Deliver a notice unless one with the same key went out within the
    /// window. Returns whether it was delivered.
    pub fn emit(&self, key: &'static str, message: &'static str) -> bool {
        let Some(notifier) = &self.notifier else {
            return false;
        };

        let now = Instant::now();
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = recent.get(key) {
                if now.duration_since(*last) < self.window {
                    debug!(key, "duplicate notice suppressed");
                    return false;
                }
            }
            recent.insert(key, now);
        }

        notifier.notify(&Notice { key, message });
        true
    }
}
