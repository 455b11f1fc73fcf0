//! reqwest-backed transport
//!
//! Joins request paths onto the configured API root, applies the per-call
//! timeout (generous by default so large uploads are not mistaken for network
//! failure) and, in cookie-auth mode, keeps a cookie jar so HTTP-only session
//! cookies ride along automatically and the CSRF cookie can be read back.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderName, HeaderValue};
use tracing::debug;

use crate::request::{ApiRequest, ApiResponse, Body};
use crate::{Result, SendFuture, Transport, TransportError};

/// Correlation header stamped on every outbound call.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const USER_AGENT: &str = concat!("resilient-client/", env!("CARGO_PKG_VERSION"));

pub struct HttpTransport {
    client: reqwest::Client,
    api_root: reqwest::Url,
    default_timeout: Duration,
    jar: Option<Arc<SessionJar>>,
}

/// Cookie store the client keeps for its whole life; emptying it swaps the
/// inner `Jar` rather than the store itself.
#[derive(Default)]
struct SessionJar(RwLock<Jar>);

impl SessionJar {
    fn take(&self) -> Jar {
        std::mem::take(&mut *self.0.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &reqwest::Url) {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &reqwest::Url) -> Option<HeaderValue> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cookies(url)
    }
}

impl HttpTransport {
    /// Build a transport for `api_root`.
    ///
    /// `with_cookies` enables the cookie jar; cookie-auth sessions need it,
    /// bearer sessions should leave it off so no ambient cookies are sent.
    pub fn new(api_root: &str, default_timeout: Duration, with_cookies: bool) -> Result<Self> {
        let api_root = reqwest::Url::parse(api_root)
            .map_err(|e| TransportError::InvalidRequest(format!("api_root {api_root}: {e}")))?;

        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        let jar = if with_cookies {
            let jar = Arc::new(SessionJar::default());
            builder = builder.cookie_provider(jar.clone());
            Some(jar)
        } else {
            None
        };
        let client = builder
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_root,
            default_timeout,
            jar,
        })
    }

    /// Absolute URL for a request path.
    pub fn url_for(&self, path: &str) -> String {
        let root = self.api_root.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{root}{path}")
        } else {
            format!("{root}/{path}")
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> SendFuture<'_> {
        let url = self.url_for(&request.path);
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut headers = request.headers;
        if let Ok(value) = HeaderValue::from_str(&request.request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }

        let builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers)
            .timeout(timeout);
        let builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Form(pairs) => builder.form(&pairs),
        };
        let pending = builder.send();

        let request_id = request.request_id;
        let method = request.method;
        Box::pin(async move {
            let response = pending.await.map_err(|e| map_error(e, timeout))?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| map_error(e, timeout))?;
            debug!(
                request_id = %request_id,
                method = %method,
                url = %url,
                status = status.as_u16(),
                "response received"
            );
            Ok(ApiResponse::new(status, headers, body))
        })
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let jar = self.jar.as_ref()?;
        let header = jar.cookies(&self.api_root)?;
        let raw = header.to_str().ok()?;
        raw.split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    fn take_cookies(&self) -> Option<HeaderValue> {
        let jar = self.jar.as_ref()?.take();
        debug!("cookie jar emptied");
        jar.cookies(&self.api_root)
    }
}

fn map_error(e: reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(format!("no response within {}ms: {e}", timeout.as_millis()))
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::http::StatusCode;
    use reqwest::header::AUTHORIZATION;
    use tokio::net::TcpListener;

    /// Start a mock API that echoes method, path, query, headers and body as JSON.
    async fn start_echo_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let app = axum::Router::new().fallback(
                |request: axum::http::Request<AxumBody>| async move {
                    let mut headers = serde_json::Map::new();
                    for (name, value) in request.headers() {
                        headers.insert(
                            name.to_string(),
                            serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
                        );
                    }
                    let method = request.method().to_string();
                    let path = request.uri().path().to_string();
                    let query = request.uri().query().unwrap_or("").to_string();
                    let body = axum::body::to_bytes(request.into_body(), 1024 * 1024)
                        .await
                        .unwrap();
                    axum::Json(serde_json::json!({
                        "headers": headers,
                        "method": method,
                        "path": path,
                        "query": query,
                        "body": String::from_utf8_lossy(&body),
                    }))
                },
            );
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    #[test]
    fn url_for_joins_root_and_path() {
        let transport =
            HttpTransport::new("http://api.test/v1/", Duration::from_secs(1), false).unwrap();
        assert_eq!(transport.url_for("/meetings"), "http://api.test/v1/meetings");
        assert_eq!(transport.url_for("meetings?x=1"), "http://api.test/v1/meetings?x=1");
    }

    #[test]
    fn invalid_api_root_is_rejected() {
        let result = HttpTransport::new("not a url", Duration::from_secs(1), false);
        assert!(matches!(result, Err(TransportError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn forwards_method_path_headers_and_json_body() {
        let (url, _server) = start_echo_server().await;
        let transport = HttpTransport::new(&url, Duration::from_secs(5), false).unwrap();

        let request = ApiRequest::put("/tickets/7?notify=true")
            .header(AUTHORIZATION, HeaderValue::from_static("Bearer T1"))
            .json(serde_json::json!({"status": "closed"}));
        let request_id = request.request_id.clone();

        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let echo: serde_json::Value = response.json().unwrap();
        assert_eq!(echo["method"], "PUT");
        assert_eq!(echo["path"], "/tickets/7");
        assert_eq!(echo["query"], "notify=true");
        assert_eq!(echo["headers"]["authorization"], "Bearer T1");
        assert_eq!(echo["headers"]["x-request-id"], request_id.as_str());
        assert_eq!(echo["body"], r#"{"status":"closed"}"#);
    }

    #[tokio::test]
    async fn encodes_form_bodies() {
        let (url, _server) = start_echo_server().await;
        let transport = HttpTransport::new(&url, Duration::from_secs(5), false).unwrap();

        let request = ApiRequest::post("/auth/refresh").form([("refresh_token", "rt 1")]);
        let echo: serde_json::Value = transport.send(request).await.unwrap().json().unwrap();

        assert_eq!(echo["body"], "refresh_token=rt+1");
        assert_eq!(
            echo["headers"]["content-type"],
            "application/x-www-form-urlencoded"
        );
    }

    #[tokio::test]
    async fn error_statuses_come_back_as_responses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let app = axum::Router::new().fallback(|| async {
                (StatusCode::UNAUTHORIZED, r#"{"detail":"Invalid or expired token"}"#)
            });
            axum::serve(listener, app).await.unwrap();
        });

        let transport = HttpTransport::new(&url, Duration::from_secs(5), false).unwrap();
        let response = transport.send(ApiRequest::get("/me")).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert!(response.text().contains("expired"));
    }

    #[tokio::test]
    async fn dead_upstream_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let transport = HttpTransport::new(&url, Duration::from_secs(5), false).unwrap();
        let err = transport.send(ApiRequest::get("/me")).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Connect(_)),
            "expected connect error, got {err:?}"
        );
    }

    #[tokio::test]
    async fn slow_upstream_hits_per_call_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let app = axum::Router::new().fallback(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "too late"
            });
            axum::serve(listener, app).await.unwrap();
        });

        let transport = HttpTransport::new(&url, Duration::from_secs(600), false).unwrap();
        let request = ApiRequest::get("/reports/big").timeout(Duration::from_millis(50));
        let err = transport.send(request).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Timeout(_)),
            "expected timeout, got {err:?}"
        );
    }

    #[tokio::test]
    async fn cookie_jar_captures_and_replays_session_cookies() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/auth/login",
                    axum::routing::post(|| async {
                        (
                            axum::response::AppendHeaders([
                                ("set-cookie", "access_token=at_1; HttpOnly; Path=/"),
                                ("set-cookie", "csrf_token=csrf_1; Path=/"),
                            ]),
                            "{}",
                        )
                    }),
                )
                .route(
                    "/me",
                    axum::routing::get(|headers: axum::http::HeaderMap| async move {
                        headers
                            .get("cookie")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string()
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });

        let transport = HttpTransport::new(&url, Duration::from_secs(5), true).unwrap();
        assert_eq!(transport.cookie("csrf_token"), None);

        transport.send(ApiRequest::post("/auth/login")).await.unwrap();
        assert_eq!(transport.cookie("csrf_token").as_deref(), Some("csrf_1"));

        let cookies = transport.send(ApiRequest::get("/me")).await.unwrap().text();
        assert!(cookies.contains("access_token=at_1"), "got: {cookies}");

        let taken = transport.take_cookies().unwrap();
        let taken = taken.to_str().unwrap();
        assert!(taken.contains("access_token=at_1"), "got: {taken}");
        assert!(taken.contains("csrf_token=csrf_1"), "got: {taken}");
        assert_eq!(transport.cookie("csrf_token"), None);

        let cookies = transport.send(ApiRequest::get("/me")).await.unwrap().text();
        assert_eq!(cookies, "", "emptied jar sends nothing");

        let explicit = ApiRequest::get("/me").header(
            reqwest::header::COOKIE,
            HeaderValue::from_static("access_token=at_1"),
        );
        let cookies = transport.send(explicit).await.unwrap().text();
        assert_eq!(cookies, "access_token=at_1");
    }

    #[tokio::test]
    async fn transport_without_jar_reports_no_cookies() {
        let transport =
            HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(1), false).unwrap();
        assert_eq!(transport.cookie("csrf_token"), None);
        assert_eq!(transport.take_cookies(), None);
    }
}
