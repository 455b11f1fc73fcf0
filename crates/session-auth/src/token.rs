//! Refresh and logout calls against the auth endpoints

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use transport::{ApiRequest, HeaderName, HeaderValue, StatusCode, Transport};

use crate::constants::{CSRF_HEADER, LOGOUT_PATH, REFRESH_PATH, REFRESH_TOKEN_FIELD};
use crate::credentials::{AuthMode, Credentials, Tokens};
use crate::error::{Error, Result};

/// Body returned by the login and refresh endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Older servers return the access credential as `token`.
    #[serde(default)]
    pub token: Option<String>,
}

impl TokenResponse {
    /// Convert into storable tokens.
    ///
    /// Bearer mode needs an access token in the body. Cookie mode gets its
    /// credentials as cookies, so an empty body is fine there.
    pub fn into_tokens(self, mode: AuthMode) -> Result<Tokens> {
        if self.success == Some(false) {
            return Err(Error::RefreshFailed("server reported success: false".into()));
        }
        match mode {
            AuthMode::Bearer => {
                let access = self.access_token.or(self.token).ok_or_else(|| {
                    Error::InvalidResponse("response carries no access token".into())
                })?;
                Ok(Tokens::new(access, self.refresh_token))
            }
            AuthMode::Cookie => Ok(Tokens::default()),
        }
    }
}

/// Exchange the refresh credential for new tokens.
pub async fn refresh_token(
    transport: &dyn Transport,
    creds: &Credentials,
    timeout: Duration,
) -> Result<Tokens> {
    let mut request = ApiRequest::post(REFRESH_PATH).timeout(timeout);
    request = match creds.mode {
        AuthMode::Bearer => {
            let refresh = creds
                .refresh_token
                .as_ref()
                .ok_or(Error::MissingRefreshToken)?;
            request.form([(REFRESH_TOKEN_FIELD, refresh.expose().as_str())])
        }
        AuthMode::Cookie => with_csrf(request.form(Vec::<(String, String)>::new()), creds),
    };

    debug!(request_id = %request.request_id, mode = creds.mode.label(), "refreshing access token");
    let response = transport.send(request).await?;

    match response.status {
        s if s.is_success() => {}
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(Error::InvalidCredentials(format!(
                "refresh rejected ({}): {}",
                response.status,
                response.text()
            )));
        }
        s => {
            return Err(Error::RefreshFailed(format!("HTTP {s}: {}", response.text())));
        }
    }

    // Cookie-mode servers may answer with an empty body; the cookies are the payload.
    let body: TokenResponse = if response.body.is_empty() && creds.mode == AuthMode::Cookie {
        TokenResponse::default()
    } else {
        response
            .json()
            .map_err(|e| Error::InvalidResponse(format!("refresh response: {e}")))?
    };
    let tokens = body.into_tokens(creds.mode)?;

    info!(
        mode = creds.mode.label(),
        rotated = tokens.refresh.is_some(),
        "access token refreshed"
    );
    Ok(tokens)
}

/// Tell the server the session is over.
///
/// Callers treat failures as advisory; the local session is cleared either way.
pub async fn logout(transport: &dyn Transport, creds: &Credentials, timeout: Duration) -> Result<()> {
    send_logout(transport, logout_request(creds, timeout)).await
}

/// The logout call for `creds`, stamped but not sent.
pub fn logout_request(creds: &Credentials, timeout: Duration) -> ApiRequest {
    let mut request = ApiRequest::post(LOGOUT_PATH).timeout(timeout);
    match creds.mode {
        AuthMode::Bearer => crate::attach::stamp(creds, &mut request),
        AuthMode::Cookie => request = with_csrf(request, creds),
    }
    request
}

pub async fn send_logout(transport: &dyn Transport, request: ApiRequest) -> Result<()> {
    let response = transport.send(request).await?;
    if !response.is_success() {
        return Err(Error::Logout(format!("HTTP {}", response.status)));
    }
    debug!("server session invalidated");
    Ok(())
}

fn with_csrf(request: ApiRequest, creds: &Credentials) -> ApiRequest {
    match creds
        .csrf_token
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        Some(value) => request.header(HeaderName::from_static(CSRF_HEADER), value),
        None => request,
    }
}
