//! Error taxonomy for API calls
//!
//! Every failed call resolves to exactly one `ErrorKind`. The kind drives the
//! pipeline (refresh, retry or surface) and selects the single user-facing
//! message shown for it.

use std::fmt;

use transport::StatusCode;

/// Classified failure of an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response: connection failure or timeout.
    Network,
    RateLimited,
    BadRequest,
    /// 401 on a first attempt; recovered by a credential refresh.
    AuthExpired,
    /// Credentials are unusable: refresh failed, or a replay got 401 again.
    AuthInvalid,
    Forbidden,
    NotFound,
    Conflict,
    TooLarge,
    Validation,
    ServerError,
    Unavailable,
    Unknown,
    /// The client was disposed or the waiting caller went away.
    Cancelled,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::AuthInvalid => "auth_invalid",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TooLarge => "too_large",
            ErrorKind::Validation => "validation",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// The one message shown to a user for this kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Unable to reach the server. Check your connection and try again.",
            ErrorKind::RateLimited => "Too many requests, please try again later",
            ErrorKind::BadRequest => "Invalid input provided",
            ErrorKind::AuthExpired | ErrorKind::AuthInvalid => {
                "Your session has expired. Please sign in again."
            }
            ErrorKind::Forbidden => "Access forbidden",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::Conflict => "Resource already exists",
            ErrorKind::TooLarge => "File size exceeds maximum allowed",
            ErrorKind::Validation => "Validation error",
            ErrorKind::ServerError => "Internal server error",
            ErrorKind::Unavailable => "Service temporarily unavailable",
            ErrorKind::Unknown => "An error occurred",
            ErrorKind::Cancelled => "Request cancelled",
        }
    }

    /// De-duplication key for notifications. Both auth kinds share the key the
    /// session terminator uses so the user sees one "session expired" notice.
    pub fn notice_key(&self) -> &'static str {
        match self {
            ErrorKind::AuthExpired | ErrorKind::AuthInvalid => crate::terminate::SESSION_EXPIRED,
            other => other.label(),
        }
    }

    /// Failures the default retry policy re-attempts.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::ServerError | ErrorKind::Unavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failed API call as seen by the consumer.
///
/// `Clone` so a single refresh failure can be handed to every parked request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    /// HTTP status, when a response was received.
    pub status: Option<StatusCode>,
    /// Diagnostic detail (server message or transport error). Not for display.
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
