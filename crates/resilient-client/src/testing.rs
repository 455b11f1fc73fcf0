//! Scripted transport and recording hooks shared by the unit tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use session_auth::{LOGOUT_PATH, REFRESH_PATH};
use tokio::sync::Semaphore;
use transport::{
    ApiRequest, ApiResponse, HeaderMap, HeaderValue, SendFuture, StatusCode, Transport,
    TransportError, header,
};

use crate::notify::{Notice, Notifier};
use crate::terminate::Navigator;

type Handler = Arc<dyn Fn(&ApiRequest) -> transport::Result<ApiResponse> + Send + Sync>;

/// In-memory transport. Records every request at `send` time and answers
/// through a handler. Refresh calls can be held open to build up a queue.
pub(crate) struct FakeTransport {
    handler: Mutex<Handler>,
    calls: Mutex<Vec<ApiRequest>>,
    failing: Mutex<HashSet<String>>,
    cookies: Mutex<HashMap<String, String>>,
    refresh_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeTransport {
    pub(crate) fn new(
        handler: impl Fn(&ApiRequest) -> transport::Result<ApiResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Mutex::new(Arc::new(handler)),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            cookies: Mutex::new(HashMap::new()),
            refresh_gate: Mutex::new(None),
        }
    }

    /// Every call answers 200 `{}`.
    pub(crate) fn ok() -> Self {
        Self::new(|_| Ok(json(200, serde_json::json!({}))))
    }

    /// Every call answers `code` with `body`.
    pub(crate) fn status(code: u16, body: &'static str) -> Self {
        Self::new(move |_| {
            Ok(ApiResponse::new(
                StatusCode::from_u16(code).unwrap(),
                HeaderMap::new(),
                body,
            ))
        })
    }

    /// API that accepts only `Bearer <valid>`; the refresh endpoint issues
    /// `valid` (rotating the refresh token to `R2`).
    pub(crate) fn api(valid: &'static str) -> Self {
        Self::new(move |req| {
            let endpoint = req.endpoint();
            if endpoint == REFRESH_PATH {
                return Ok(json(
                    200,
                    serde_json::json!({"success": true, "access_token": valid, "refresh_token": "R2"}),
                ));
            }
            if endpoint == LOGOUT_PATH {
                return Ok(json(200, serde_json::json!({"success": true})));
            }
            let expected = format!("Bearer {valid}");
            match req.headers.get(header::AUTHORIZATION) {
                Some(v) if v == expected.as_str() => {
                    Ok(json(200, serde_json::json!({"path": req.path})))
                }
                _ => Ok(json(401, serde_json::json!({"detail": "Token expired"}))),
            }
        })
    }

    pub(crate) fn set_handler(
        &self,
        handler: impl Fn(&ApiRequest) -> transport::Result<ApiResponse> + Send + Sync + 'static,
    ) {
        *self.handler.lock().unwrap() = Arc::new(handler);
    }

    /// Calls to `path` fail with a connection error.
    pub(crate) fn fail_path(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub(crate) fn set_cookie(&self, name: &str, value: &str) {
        self.cookies
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    /// Hold refresh responses until `release_refresh`.
    pub(crate) fn hold_refresh(&self) {
        *self.refresh_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release_refresh(&self) {
        if let Some(gate) = self.refresh_gate.lock().unwrap().as_ref() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub(crate) fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, path: &str) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|r| r.endpoint() == path)
            .collect()
    }

    pub(crate) fn refresh_count(&self) -> usize {
        self.calls_to(REFRESH_PATH).len()
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: ApiRequest) -> SendFuture<'_> {
        self.calls.lock().unwrap().push(request.clone());

        let result = if self.failing.lock().unwrap().contains(request.endpoint()) {
            Err(TransportError::Connect("connection refused".into()))
        } else {
            let handler = self.handler.lock().unwrap().clone();
            handler(&request)
        };
        let gate = if request.endpoint() == REFRESH_PATH {
            self.refresh_gate.lock().unwrap().clone()
        } else {
            None
        };

        Box::pin(async move {
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
            result
        })
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.lock().unwrap().get(name).cloned()
    }

    fn take_cookies(&self) -> Option<HeaderValue> {
        let cookies = std::mem::take(&mut *self.cookies.lock().unwrap());
        if cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<_> = cookies.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }
}

pub(crate) fn json(code: u16, body: serde_json::Value) -> ApiResponse {
    ApiResponse::json_body(StatusCode::from_u16(code).unwrap(), &body)
}

/// Collects every delivered notice.
#[derive(Default)]
pub(crate) struct Recorder(pub(crate) Mutex<Vec<Notice>>);

impl Recorder {
    pub(crate) fn keys(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(|n| n.key).collect()
    }
}

impl Notifier for Recorder {
    fn notify(&self, notice: &Notice) {
        self.0.lock().unwrap().push(notice.clone());
    }
}

/// Collects sign-in navigation requests.
#[derive(Default)]
pub(crate) struct NavLog(Mutex<Vec<String>>);

impl NavLog {
    pub(crate) fn reasons(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Navigator for NavLog {
    fn to_sign_in(&self, reason: &str) {
        self.0.lock().unwrap().push(reason.to_string());
    }
}

/// Let spawned tasks and woken futures run.
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Yield until `condition` holds.
pub(crate) async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
