//! Client-side session credentials
//!
//! Holds the credentials for one signed-in user and knows how to put them on
//! the wire. This crate has no knowledge of retries or refresh coordination;
//! it only provides the building blocks the client pipeline composes.
//!
//! Credential flow:
//! 1. Login stores tokens via `Session::store()`
//! 2. Every outgoing call is stamped with `attach::attach()`
//! 3. On expiry the coordinator calls `token::refresh_token()` and stores the result
//! 4. Unrecoverable failure clears the session and calls `token::logout()` best-effort

pub mod attach;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use attach::{attach, stamp};
pub use constants::*;
pub use credentials::{AuthMode, Credentials, Session, Tokens};
pub use error::{Error, Result};
pub use token::{TokenResponse, logout, logout_request, refresh_token, send_logout};
