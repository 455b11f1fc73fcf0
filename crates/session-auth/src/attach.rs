//! Credential attachment
//!
//! Stamps the current credentials onto an outgoing request. The header set
//! depends on the auth mode only: bearer mode never sends a CSRF header and
//! cookie mode never sends an `Authorization` header, whatever else happens
//! to be stored.

use transport::{ApiRequest, HeaderName, HeaderValue, header};
use tracing::warn;

use crate::constants::CSRF_HEADER;
use crate::credentials::{AuthMode, Credentials, Session};

/// Stamp `request` with the credentials in `creds`.
///
/// Existing auth headers are replaced, so a replayed request picks up the
/// refreshed credentials rather than keeping the stale ones.
pub fn stamp(creds: &Credentials, request: &mut ApiRequest) {
    let csrf_header = HeaderName::from_static(CSRF_HEADER);
    request.headers.remove(header::AUTHORIZATION);
    request.headers.remove(&csrf_header);
    request.generation = creds.generation;

    match creds.mode {
        AuthMode::Bearer => {
            let Some(token) = &creds.access_token else {
                return;
            };
            match HeaderValue::from_str(&format!("Bearer {}", token.expose())) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => {
                    warn!(request_id = %request.request_id, "access token is not a valid header value, sending unauthenticated");
                }
            }
        }
        AuthMode::Cookie => {
            let Some(csrf) = &creds.csrf_token else {
                return;
            };
            match HeaderValue::from_str(csrf) {
                Ok(value) => {
                    request.headers.insert(csrf_header, value);
                }
                Err(_) => {
                    warn!(request_id = %request.request_id, "csrf token is not a valid header value, omitting it");
                }
            }
        }
    }
}

/// Stamp `request` with the session's current credentials.
pub async fn attach(session: &Session, request: &mut ApiRequest) {
    let creds = session.snapshot().await;
    stamp(&creds, request);
}
