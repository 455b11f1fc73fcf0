//! Error types for session credential operations

use transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No response from the auth endpoint.
    #[error("auth endpoint unreachable: {0}")]
    Transport(#[from] TransportError),

    #[error("no refresh token stored")]
    MissingRefreshToken,

    /// The server refused the refresh credential (401/403).
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("logout failed: {0}")]
    Logout(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;
