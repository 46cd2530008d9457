//! Scripted transport for deterministic tests.

use crate::transport::Transport;
use async_trait::async_trait;
use quill_proto::{AUTHORIZATION, HttpRequest, HttpResponse, Method, NetworkError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use url::Url;

/// What a scripted route answers with.
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(HttpResponse),
    Fail(NetworkError),
}

impl From<HttpResponse> for MockReply {
    fn from(response: HttpResponse) -> Self {
        Self::Respond(response)
    }
}

impl From<NetworkError> for MockReply {
    fn from(error: NetworkError) -> Self {
        Self::Fail(error)
    }
}

/// Record of one call, with wall-clock bounds for overlap checks.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub request: HttpRequest,
    pub started: Instant,
    pub finished: Instant,
}

impl CallRecord {
    /// Returns true if this call's window intersects `other`'s.
    pub fn overlaps(&self, other: &CallRecord) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

#[derive(Debug)]
struct Route {
    method: Method,
    path: String,
    /// Consumed front to back; the last reply repeats.
    replies: VecDeque<MockReply>,
    delay: Duration,
    required_auth: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    routes: Vec<Route>,
    calls: Vec<CallRecord>,
}

/// Transport that answers from a script and records every call.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answers every `method path` call with `response`.
    pub fn on(&self, method: Method, path: &str, response: HttpResponse) -> &Self {
        self.on_sequence(method, path, vec![MockReply::Respond(response)])
    }

    /// Answers successive calls with `replies`, repeating the last one.
    pub fn on_sequence(&self, method: Method, path: &str, replies: Vec<MockReply>) -> &Self {
        let mut state = self.state();
        state.routes.retain(|r| !(r.method == method && r.path == path));
        state.routes.push(Route {
            method,
            path: path.to_string(),
            replies: replies.into(),
            delay: Duration::ZERO,
            required_auth: None,
        });
        drop(state);
        self
    }

    /// Delays every reply on the route.
    pub fn with_delay(&self, method: Method, path: &str, delay: Duration) -> &Self {
        self.update_route(method, path, |route| route.delay = delay)
    }

    /// Makes the route answer 401 unless `Authorization` equals `header`.
    pub fn require_auth(&self, method: Method, path: &str, header: impl Into<String>) -> &Self {
        let header = header.into();
        self.update_route(method, path, |route| route.required_auth = Some(header))
    }

    fn update_route(&self, method: Method, path: &str, update: impl FnOnce(&mut Route)) -> &Self {
        if let Some(route) = self
            .state()
            .routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            update(route);
        }
        self
    }

    /// Returns every call in arrival order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state().calls.clone()
    }

    /// Returns the calls made to one route.
    pub fn calls_to(&self, method: Method, path: &str) -> Vec<CallRecord> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.request.method == method && request_path(&c.request) == path)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }
}

fn request_path(request: &HttpRequest) -> String {
    Url::parse(&request.url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| request.url.clone())
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let started = Instant::now();
        let path = request_path(request);

        let (reply, delay) = {
            let mut state = self.state();
            match state
                .routes
                .iter_mut()
                .find(|r| r.method == request.method && r.path == path)
            {
                Some(route) => {
                    let authorized = route
                        .required_auth
                        .as_deref()
                        .is_none_or(|h| request.header(AUTHORIZATION) == Some(h));
                    let reply = if !authorized {
                        MockReply::Respond(
                            HttpResponse::new(401).with_header("WWW-Authenticate", "Basic"),
                        )
                    } else if route.replies.len() > 1 {
                        route
                            .replies
                            .pop_front()
                            .unwrap_or(MockReply::Respond(HttpResponse::new(404)))
                    } else {
                        route
                            .replies
                            .front()
                            .cloned()
                            .unwrap_or(MockReply::Respond(HttpResponse::new(404)))
                    };
                    (reply, route.delay)
                }
                None => (MockReply::Respond(HttpResponse::new(404)), Duration::ZERO),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.state().calls.push(CallRecord {
            request: request.clone(),
            started,
            finished: Instant::now(),
        });

        match reply {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail(error) => Err(error),
        }
    }
}
