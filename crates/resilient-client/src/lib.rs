//! Resilient API client
//!
//! Wraps every outbound API call so consumers never see transient failures
//! or a mid-session credential expiry:
//!
//! - `coordinator`: single-flight token refresh with FIFO replay of the
//!   requests that were blocked on it
//! - `retry`: exponential backoff for network and 5xx failures
//! - `classify`: maps failures onto `ErrorKind`
//! - `terminate`: ends a session that cannot be recovered
//! - `notify`: one de-duplicated user message per failure kind
//!
//! `ApiClient` composes them: attach → send → classify → refresh-or-retry.

pub mod classify;
pub mod client;
pub mod config;
pub mod coordinator;
mod dispatch;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod retry;
pub mod terminate;

#[cfg(test)]
mod testing;

pub use client::{ApiClient, ApiClientBuilder};
pub use config::{ClientConfig, RetryConfig};
pub use coordinator::{RefreshCoordinator, RefreshFailure, RefreshPhase};
pub use error::{ApiError, ErrorKind, Result};
pub use notify::{Notice, NotificationGate, Notifier};
pub use retry::{RetryPolicy, Retryable};
pub use terminate::{Navigator, SessionTerminator};
