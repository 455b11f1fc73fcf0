//! Client-side counters
//!
//! - `api_requests_total` (counter): labels `method`, `outcome`
//! - `api_refresh_total` (counter): label `result`
//! - `api_replays_total` (counter)
//! - `api_retries_total` (counter): label `kind`
//! - `api_session_terminations_total` (counter)
//!
//! Without an installed recorder these are no-ops.

/// Record a finished pipeline call. `outcome` is `success` or an error kind label.
pub fn record_request(method: &str, outcome: &str) {
    metrics::counter!(
        "api_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a settled refresh. `result` is `success` or a failure reason.
pub fn record_refresh(result: &'static str) {
    metrics::counter!("api_refresh_total", "result" => result).increment(1);
}

pub fn record_replays(count: usize) {
    metrics::counter!("api_replays_total").increment(count as u64);
}

pub fn record_retry(kind: &'static str) {
    metrics::counter!("api_retries_total", "kind" => kind).increment(1);
}

pub fn record_session_termination() {
    metrics::counter!("api_session_terminations_total").increment(1);
}
