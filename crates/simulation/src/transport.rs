//! Scripted HTTP transport that records every request.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use weft_core::{ActionError, HttpMethod, ResolvedRequest};
use weft_executor::{HttpTransport, TransportResponse};

/// What a route answers with.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(TransportResponse),
    Fail(ActionError),
    /// Never answer; only cancellation or a timeout ends the call.
    Hang,
}

#[derive(Debug)]
struct Route {
    method: Option<HttpMethod>,
    url_part: String,
    replies: VecDeque<Scripted>,
}

impl Route {
    fn matches(&self, request: &ResolvedRequest) -> bool {
        self.method.is_none_or(|m| m == request.method) && request.url.contains(&self.url_part)
    }

    /// Replies are consumed in order; the last one repeats.
    fn next_reply(&mut self) -> Option<Scripted> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

/// A request seen by the transport.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub timestamp: DateTime<Utc>,
    pub request: ResolvedRequest,
}

/// [`HttpTransport`] answering from scripted routes.
///
/// Routes match on method (optional) and a URL substring, first match wins.
/// Requests with no matching route get a 404.
///
/// ```
/// use weft_core::HttpMethod;
/// use weft_simulation::ScriptedTransport;
///
/// let transport = ScriptedTransport::new()
///     .respond_json(Some(HttpMethod::Get), "/todos", 200, serde_json::json!([]));
/// assert_eq!(transport.call_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<CapturedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Append a reply to the route for `method` and `url_part`, creating
    /// the route if needed.
    #[must_use]
    pub fn script(self, method: Option<HttpMethod>, url_part: &str, reply: Scripted) -> Self {
        self.push(method, url_part, reply);
        self
    }

    #[must_use]
    pub fn respond(
        self,
        method: Option<HttpMethod>,
        url_part: &str,
        response: TransportResponse,
    ) -> Self {
        self.script(method, url_part, Scripted::Respond(response))
    }

    #[must_use]
    pub fn respond_json(
        self,
        method: Option<HttpMethod>,
        url_part: &str,
        status: u16,
        body: serde_json::Value,
    ) -> Self {
        self.respond(method, url_part, TransportResponse::json(status, &body))
    }

    #[must_use]
    pub fn fail(self, method: Option<HttpMethod>, url_part: &str, error: ActionError) -> Self {
        self.script(method, url_part, Scripted::Fail(error))
    }

    #[must_use]
    pub fn hang(self, method: Option<HttpMethod>, url_part: &str) -> Self {
        self.script(method, url_part, Scripted::Hang)
    }

    /// Add a reply after construction.
    pub fn push(&self, method: Option<HttpMethod>, url_part: &str, reply: Scripted) {
        let mut routes = self.routes.lock();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.url_part == url_part)
        {
            route.replies.push_back(reply);
        } else {
            routes.push(Route {
                method,
                url_part: url_part.to_owned(),
                replies: VecDeque::from([reply]),
            });
        }
    }

    pub fn calls(&self) -> Vec<CapturedRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_request(&self) -> Option<ResolvedRequest> {
        self.calls.lock().last().map(|c| c.request.clone())
    }

    /// Requests whose URL contains `url_part`.
    pub fn requests_to(&self, url_part: &str) -> Vec<ResolvedRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.request.url.contains(url_part))
            .map(|c| c.request.clone())
            .collect()
    }

    /// Assert the transport saw exactly `n` requests.
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    pub fn assert_called(&self, n: usize) {
        let count = self.call_count();
        assert_eq!(count, n, "expected {n} requests, got {count}");
    }

    /// # Panics
    ///
    /// Panics if any request was made.
    pub fn assert_not_called(&self) {
        let calls = self.calls.lock();
        assert!(
            calls.is_empty(),
            "expected no requests, got {:?}",
            calls.iter().map(|c| &c.request.url).collect::<Vec<_>>()
        );
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &ResolvedRequest) -> Result<TransportResponse, ActionError> {
        self.calls.lock().push(CapturedRequest {
            timestamp: Utc::now(),
            request: request.clone(),
        });

        let reply = self
            .routes
            .lock()
            .iter_mut()
            .find(|r| r.matches(request))
            .and_then(Route::next_reply);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Hang) => std::future::pending().await,
            None => {
                tracing::debug!(url = %request.url, "no scripted route");
                let message = format!("no scripted route for {}", request.url);
                Ok(TransportResponse::json(404, &serde_json::json!({ "message": message })))
            }
        }
    }
}
