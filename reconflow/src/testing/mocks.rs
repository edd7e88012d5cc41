//! Scripted in-memory backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::TransportError;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// The peer answers.
    Respond(HttpResponse),
    /// The exchange fails below HTTP.
    Fail(TransportError),
}

type Route = (String, String);

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<Route, VecDeque<MockReply>>,
    latency: HashMap<Route, Duration>,
    requests: Vec<HttpRequest>,
}

/// A backend that answers from per-route scripts.
///
/// Each route (`"GET"`, `"/status/p-1"`) holds a queue of replies. Calls
/// consume the queue front; the last reply is sticky and answers every
/// later call. Unscripted routes answer 404. Every request is recorded.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
    default_latency: Arc<Mutex<Duration>>,
}

impl MockBackend {
    /// Creates a backend with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend as a transport sharing this script.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    fn route(method: &str, path: &str) -> Route {
        (method.to_ascii_uppercase(), path.to_string())
    }

    /// Replaces the route's script with one sticky reply.
    pub fn respond(&self, method: &str, path: &str, reply: MockReply) {
        self.state
            .lock()
            .scripts
            .insert(Self::route(method, path), VecDeque::from([reply]));
    }

    /// Appends a reply to the route's script.
    pub fn push(&self, method: &str, path: &str, reply: MockReply) {
        self.state
            .lock()
            .scripts
            .entry(Self::route(method, path))
            .or_default()
            .push_back(reply);
    }

    /// Replaces the route's script with one JSON 200 reply.
    pub fn respond_json(&self, method: &str, path: &str, body: serde_json::Value) {
        self.respond(method, path, MockReply::Respond(HttpResponse::json(&body)));
    }

    /// Appends a JSON 200 reply.
    pub fn push_json(&self, method: &str, path: &str, body: serde_json::Value) {
        self.push(method, path, MockReply::Respond(HttpResponse::json(&body)));
    }

    /// Replaces the route's script with one status reply.
    pub fn respond_status(&self, method: &str, path: &str, status: u16, body: &str) {
        self.respond(method, path, MockReply::Respond(HttpResponse::new(status, body)));
    }

    /// Appends a status reply.
    pub fn push_status(&self, method: &str, path: &str, status: u16, body: &str) {
        self.push(method, path, MockReply::Respond(HttpResponse::new(status, body)));
    }

    /// Replaces the route's script with a connection failure.
    pub fn respond_network_error(&self, method: &str, path: &str) {
        self.respond(
            method,
            path,
            MockReply::Fail(TransportError::Network("connection refused".to_string())),
        );
    }

    /// Appends a connection failure.
    pub fn push_network_error(&self, method: &str, path: &str) {
        self.push(
            method,
            path,
            MockReply::Fail(TransportError::Network("connection refused".to_string())),
        );
    }

    /// Delays every answer.
    pub fn set_latency(&self, latency: Duration) {
        *self.default_latency.lock() = latency;
    }

    /// Delays answers on one route.
    pub fn set_route_latency(&self, method: &str, path: &str, latency: Duration) {
        self.state
            .lock()
            .latency
            .insert(Self::route(method, path), latency);
    }

    /// Number of calls made to a route.
    #[must_use]
    pub fn calls(&self, method: &str, path: &str) -> usize {
        self.requests(method, path).len()
    }

    /// Number of calls whose path starts with `prefix`.
    #[must_use]
    pub fn calls_with_prefix(&self, method: &str, prefix: &str) -> usize {
        let method = method.to_ascii_uppercase();
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method.to_string() == method && r.path.starts_with(prefix))
            .count()
    }

    /// Recorded requests to a route, oldest first.
    #[must_use]
    pub fn requests(&self, method: &str, path: &str) -> Vec<HttpRequest> {
        let method = method.to_ascii_uppercase();
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method.to_string() == method && r.path == path)
            .cloned()
            .collect()
    }

    /// Body of the most recent request to a route.
    #[must_use]
    pub fn last_body(&self, method: &str, path: &str) -> Option<serde_json::Value> {
        self.requests(method, path).pop().and_then(|r| r.body)
    }

    /// Total number of requests.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.state.lock().requests.len()
    }

    fn next_reply(&self, request: &HttpRequest) -> (MockReply, Duration) {
        let route = Self::route(&request.method.to_string(), &request.path);
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        let latency = state
            .latency
            .get(&route)
            .copied()
            .unwrap_or_else(|| *self.default_latency.lock());

        let reply = match state.scripts.get_mut(&route) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        let reply = reply.unwrap_or_else(|| {
            MockReply::Respond(HttpResponse::new(404, r#"{"detail":"Not Found"}"#))
        });
        (reply, latency)
    }
}

#[async_trait]
impl Transport for MockBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (reply, latency) = self.next_reply(&request);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match reply {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail(error) => Err(error),
        }
    }
}
