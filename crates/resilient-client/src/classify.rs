//! Failure classification
//!
//! Maps a failed call to exactly one `ErrorKind`. Pure functions: the
//! pipeline decides what to do with the kind.

use serde_json::Value;
use transport::{ApiResponse, StatusCode, TransportError};

use crate::error::{ApiError, ErrorKind};

/// Classify an HTTP status.
///
/// `replayed` marks a request already re-issued after a credential refresh
/// (or one that must never trigger a refresh); a 401 there is final.
pub fn classify_status(status: StatusCode, replayed: bool) -> ErrorKind {
    match status.as_u16() {
        400 => ErrorKind::BadRequest,
        401 if replayed => ErrorKind::AuthInvalid,
        401 => ErrorKind::AuthExpired,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        413 => ErrorKind::TooLarge,
        422 => ErrorKind::Validation,
        429 => ErrorKind::RateLimited,
        500 => ErrorKind::ServerError,
        502..=504 => ErrorKind::Unavailable,
        _ => ErrorKind::Unknown,
    }
}

/// Classify a call that produced no response.
pub fn classify_transport(err: &TransportError) -> ErrorKind {
    match err {
        TransportError::Timeout(_) | TransportError::Connect(_) | TransportError::Http(_) => {
            ErrorKind::Network
        }
        TransportError::InvalidRequest(_) => ErrorKind::Unknown,
    }
}

/// Build the error for a non-2xx response.
pub fn classify_response(response: &ApiResponse, replayed: bool) -> ApiError {
    let kind = classify_status(response.status, replayed);
    let message = server_message(&response.body)
        .unwrap_or_else(|| format!("HTTP {}", response.status));
    ApiError::new(kind, message).with_status(response.status)
}

pub fn transport_failure(err: &TransportError) -> ApiError {
    ApiError::new(classify_transport(err), err.to_string())
}

/// Server-supplied error text, if the body carries one.
///
/// Understands `{"detail": "..."}`, validation lists
/// `{"detail": [{"msg": "..."}]}`, `{"error": {"message": "..."}}`,
/// `{"error": "..."}` and `{"message": "..."}`.
pub fn server_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;

    match value.get("detail") {
        Some(Value::String(s)) => return Some(s.clone()),
        Some(Value::Array(items)) => {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if !msgs.is_empty() {
                return Some(msgs.join("; "));
            }
        }
        _ => {}
    }

    match value.get("error") {
        Some(Value::String(s)) => return Some(s.clone()),
        Some(obj) => {
            if let Some(msg) = obj.get("message").and_then(Value::as_str) {
                return Some(msg.to_string());
            }
        }
        None => {}
    }

    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}
