//! Transport seam for outbound API calls
//!
//! Defines the request/response descriptors that flow through the client
//! pipeline and the `Transport` trait that actually puts them on the wire.
//! `HttpTransport` is the reqwest-backed implementation; tests substitute
//! scripted transports to drive refresh and retry paths deterministically.

pub mod http;
pub mod request;

pub use http::{HttpTransport, REQUEST_ID_HEADER};
pub use request::{ApiRequest, ApiResponse, Body};
pub use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
pub use reqwest::{Method, StatusCode};

use std::future::Future;
use std::pin::Pin;

/// Failures where no HTTP response was received.
///
/// Responses with error statuses are not transport errors; they come back as
/// `ApiResponse` and are classified by the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Boxed future returned by `Transport::send`.
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;

/// Sends a fully stamped request and returns the raw response.
///
/// Uses `Pin<Box<dyn Future>>` so the client can hold an `Arc<dyn Transport>`.
/// Implementations must start the exchange (or at least record it) when
/// `send` is called, not when the future is first polled: the refresh
/// coordinator relies on call order to replay queued requests in arrival order.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> SendFuture<'_>;

    /// Read a client-visible cookie (cookie-auth mode). Transports without a
    /// cookie jar return `None`.
    fn cookie(&self, _name: &str) -> Option<String> {
        None
    }

    /// Empty the cookie jar, returning the `Cookie` header it held for the
    /// API root so one last call (logout) can still present it explicitly.
    fn take_cookies(&self) -> Option<HeaderValue> {
        None
    }
}
