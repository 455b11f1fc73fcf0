//! Endpoint paths, header and cookie names shared with the API server

/// Exchanges user credentials for a session.
pub const LOGIN_PATH: &str = "/auth/login";

/// Exchanges the refresh credential for a new access credential.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Invalidates the session server-side (and clears auth cookies in cookie mode).
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Header carrying the double-submit CSRF value in cookie mode.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Client-readable cookie the server sets alongside the HTTP-only auth cookies.
pub const CSRF_COOKIE: &str = "csrf_token";

/// Form field the refresh endpoint expects in bearer mode.
pub const REFRESH_TOKEN_FIELD: &str = "refresh_token";

/// Default per-call upper bound. Large uploads and report generation can take
/// minutes; anything shorter misreports them as network failures.
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;
