//! Passive network capture for one page.
//!
//! A [`NetworkLogger`] subscribes to its page on construction and records
//! every request and response, in arrival order, until it is dropped. Waits
//! for specific traffic are explicit handles ([`NetworkWait`]) that resolve
//! once, can be bounded with [`NetworkWait::timeout`], and deregister
//! themselves when resolved, cancelled or dropped.

use crate::page::{BrowserPage, ListenerId, NetworkActivity, ObservedRequest, ObservedResponse, ResourceType};
use crate::result::{HarnessError, HarnessResult};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// A captured request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    /// Request URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Capture time, RFC 3339 UTC with milliseconds
    pub timestamp: String,
    /// Resource type
    pub resource_type: ResourceType,
}

/// A captured response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    /// Response URL
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// HTTP status text
    pub status_text: String,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// Method of the originating request
    pub method: String,
    /// Capture time, RFC 3339 UTC with milliseconds
    pub timestamp: String,
    /// Resource type of the originating request
    pub resource_type: ResourceType,
}

/// Either kind of captured traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NetworkEvent {
    /// Outbound request
    Request(RequestEvent),
    /// Inbound response
    Response(ResponseEvent),
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<ObservedRequest> for RequestEvent {
    fn from(request: ObservedRequest) -> Self {
        Self {
            url: request.url,
            method: request.method,
            headers: request.headers,
            timestamp: now_iso(),
            resource_type: request.resource_type,
        }
    }
}

impl From<ObservedResponse> for ResponseEvent {
    fn from(response: ObservedResponse) -> Self {
        Self {
            url: response.url,
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            method: response.method,
            timestamp: now_iso(),
            resource_type: response.resource_type,
        }
    }
}

/// Conjunctive filter over captured traffic. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFilter {
    /// URL substring
    pub url: Option<String>,
    /// Exact HTTP method
    pub method: Option<String>,
    /// Exact status; responses only
    pub status: Option<u16>,
    /// Exact resource type
    pub resource_type: Option<ResourceType>,
}

impl NetworkFilter {
    /// Match everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the URL to contain `fragment`
    #[must_use]
    pub fn url(mut self, fragment: impl Into<String>) -> Self {
        self.url = Some(fragment.into());
        self
    }

    /// Require an exact method
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Require an exact status (ignored for requests)
    #[must_use]
    pub const fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Require a resource type
    #[must_use]
    pub const fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    fn matches_common(&self, url: &str, method: &str, resource_type: ResourceType) -> bool {
        self.url.as_deref().map_or(true, |fragment| url.contains(fragment))
            && self.method.as_deref().map_or(true, |m| m == method)
            && self.resource_type.map_or(true, |rt| rt == resource_type)
    }

    /// Whether a request passes the filter
    #[must_use]
    pub fn matches_request(&self, request: &RequestEvent) -> bool {
        self.matches_common(&request.url, &request.method, request.resource_type)
    }

    /// Whether a response passes the filter
    #[must_use]
    pub fn matches_response(&self, response: &ResponseEvent) -> bool {
        self.matches_common(&response.url, &response.method, response.resource_type)
            && self.status.map_or(true, |status| status == response.status)
    }
}

impl std::fmt::Display for NetworkFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(url) = &self.url {
            parts.push(format!("url~{url}"));
        }
        if let Some(method) = &self.method {
            parts.push(format!("method={method}"));
        }
        if let Some(status) = self.status {
            parts.push(format!("status={status}"));
        }
        if let Some(rt) = self.resource_type {
            parts.push(format!("type={rt}"));
        }
        if parts.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitKind {
    Request,
    Response,
}

struct Waiter<T> {
    id: u64,
    filter: NetworkFilter,
    sender: oneshot::Sender<T>,
}

#[derive(Default)]
struct LogState {
    requests: Vec<RequestEvent>,
    responses: Vec<ResponseEvent>,
    // kind of each captured event, in arrival order
    arrivals: Vec<WaitKind>,
    request_waiters: Vec<Waiter<RequestEvent>>,
    response_waiters: Vec<Waiter<ResponseEvent>>,
    next_waiter_id: u64,
}

/// Hand `event` to every waiter whose filter it satisfies
fn deliver<T: Clone>(waiters: &mut Vec<Waiter<T>>, event: &T, matches: fn(&NetworkFilter, &T) -> bool) {
    if waiters.is_empty() {
        return;
    }
    let (ready, rest): (Vec<_>, Vec<_>) = std::mem::take(waiters)
        .into_iter()
        .partition(|waiter| matches(&waiter.filter, event));
    *waiters = rest;
    for waiter in ready {
        let _ = waiter.sender.send(event.clone());
    }
}

impl LogState {
    fn record(&mut self, activity: &NetworkActivity) {
        match activity {
            NetworkActivity::Request(request) => {
                let event = RequestEvent::from(request.clone());
                deliver(&mut self.request_waiters, &event, NetworkFilter::matches_request);
                self.requests.push(event);
                self.arrivals.push(WaitKind::Request);
            }
            NetworkActivity::Response(response) => {
                let event = ResponseEvent::from(response.clone());
                deliver(&mut self.response_waiters, &event, NetworkFilter::matches_response);
                self.responses.push(event);
                self.arrivals.push(WaitKind::Response);
            }
        }
    }

    fn remove_waiter(&mut self, kind: WaitKind, id: u64) {
        match kind {
            WaitKind::Request => self.request_waiters.retain(|w| w.id != id),
            WaitKind::Response => self.response_waiters.retain(|w| w.id != id),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_waiter_id += 1;
        self.next_waiter_id
    }
}

fn lock(state: &Mutex<LogState>) -> MutexGuard<'_, LogState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancelled(pattern: &str) -> HarnessError {
    HarnessError::NetworkWaitCancelled {
        pattern: pattern.to_string(),
    }
}

enum WaitInner<T> {
    Ready(Option<T>),
    Pending(oneshot::Receiver<T>),
    Done,
}

/// One-shot wait for matching traffic.
///
/// Resolves with the first buffered match, or the first later match. Never
/// times out on its own; use [`NetworkWait::timeout`] to bound it. Dropping
/// the handle deregisters it.
#[must_use = "a network wait does nothing unless awaited"]
pub struct NetworkWait<T> {
    state: Weak<Mutex<LogState>>,
    kind: WaitKind,
    id: u64,
    pattern: String,
    inner: WaitInner<T>,
}

impl<T> std::fmt::Debug for NetworkWait<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self.inner {
            WaitInner::Ready(_) => "ready",
            WaitInner::Pending(_) => "pending",
            WaitInner::Done => "done",
        };
        f.debug_struct("NetworkWait")
            .field("kind", &self.kind)
            .field("pattern", &self.pattern)
            .field("status", &status)
            .finish()
    }
}

impl<T> NetworkWait<T> {
    /// URL substring being waited for
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether a match was already buffered when the wait was created
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.inner, WaitInner::Ready(Some(_)))
    }

    /// Abandon the wait
    pub fn cancel(self) {
        debug!(pattern = %self.pattern, "Network wait cancelled");
    }

    fn deregister(&mut self) {
        if matches!(self.inner, WaitInner::Pending(_)) {
            if let Some(state) = self.state.upgrade() {
                lock(&state).remove_waiter(self.kind, self.id);
            }
        }
        self.inner = WaitInner::Done;
    }
}

impl<T: Unpin> NetworkWait<T> {
    /// Bound the wait; on expiry it is deregistered and fails with
    /// [`HarnessError::NetworkWaitTimeout`]
    pub async fn timeout(self, duration: Duration) -> HarnessResult<T> {
        let pattern = self.pattern.clone();
        match tokio::time::timeout(duration, self).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::NetworkWaitTimeout {
                pattern,
                ms: duration.as_millis() as u64,
            }),
        }
    }
}

impl<T: Unpin> Future for NetworkWait<T> {
    type Output = HarnessResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let result = match &mut this.inner {
            WaitInner::Ready(value) => value.take().ok_or_else(|| cancelled(&this.pattern)),
            WaitInner::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(value)) => Ok(value),
                Poll::Ready(Err(_)) => Err(cancelled(&this.pattern)),
                Poll::Pending => return Poll::Pending,
            },
            WaitInner::Done => Err(cancelled(&this.pattern)),
        };
        this.inner = WaitInner::Done;
        Poll::Ready(result)
    }
}

impl<T> Drop for NetworkWait<T> {
    fn drop(&mut self) {
        self.deregister();
    }
}

/// Request/response recorder bound to one page
pub struct NetworkLogger {
    page: Arc<dyn BrowserPage>,
    listener: ListenerId,
    state: Arc<Mutex<LogState>>,
}

impl std::fmt::Debug for NetworkLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("NetworkLogger")
            .field("listener", &self.listener)
            .field("requests", &state.requests.len())
            .field("responses", &state.responses.len())
            .finish_non_exhaustive()
    }
}

impl NetworkLogger {
    /// Start recording `page`'s traffic
    #[must_use]
    pub fn attach(page: Arc<dyn BrowserPage>) -> Self {
        let state = Arc::new(Mutex::new(LogState::default()));
        let sink = Arc::clone(&state);
        let listener = page.on_network_event(Arc::new(move |activity| {
            lock(&sink).record(activity);
        }));
        debug!(listener, "Network logger attached");
        Self {
            page,
            listener,
            state,
        }
    }

    /// Captured requests matching `filter`, in arrival order
    #[must_use]
    pub fn requests(&self, filter: &NetworkFilter) -> Vec<RequestEvent> {
        lock(&self.state)
            .requests
            .iter()
            .filter(|request| filter.matches_request(request))
            .cloned()
            .collect()
    }

    /// Captured responses matching `filter`, in arrival order
    #[must_use]
    pub fn responses(&self, filter: &NetworkFilter) -> Vec<ResponseEvent> {
        lock(&self.state)
            .responses
            .iter()
            .filter(|response| filter.matches_response(response))
            .cloned()
            .collect()
    }

    /// Total captured requests
    #[must_use]
    pub fn request_count(&self) -> usize {
        lock(&self.state).requests.len()
    }

    /// Total captured responses
    #[must_use]
    pub fn response_count(&self) -> usize {
        lock(&self.state).responses.len()
    }

    /// Wait for a request whose URL contains `url` and which passes `filter`.
    /// `url` replaces any URL constraint already set on `filter`.
    pub fn wait_for_request(&self, url: &str, filter: NetworkFilter) -> NetworkWait<RequestEvent> {
        let filter = filter.url(url);
        let mut state = lock(&self.state);
        let buffered = state
            .requests
            .iter()
            .find(|request| filter.matches_request(request))
            .cloned();
        let (id, inner) = match buffered {
            Some(request) => (0, WaitInner::Ready(Some(request))),
            None => {
                let (sender, receiver) = oneshot::channel();
                let id = state.next_id();
                state.request_waiters.push(Waiter { id, filter, sender });
                (id, WaitInner::Pending(receiver))
            }
        };
        NetworkWait {
            state: Arc::downgrade(&self.state),
            kind: WaitKind::Request,
            id,
            pattern: url.to_string(),
            inner,
        }
    }

    /// Wait for a response whose URL contains `url` and which passes `filter`.
    /// `url` replaces any URL constraint already set on `filter`.
    pub fn wait_for_response(&self, url: &str, filter: NetworkFilter) -> NetworkWait<ResponseEvent> {
        let filter = filter.url(url);
        let mut state = lock(&self.state);
        let buffered = state
            .responses
            .iter()
            .find(|response| filter.matches_response(response))
            .cloned();
        let (id, inner) = match buffered {
            Some(response) => (0, WaitInner::Ready(Some(response))),
            None => {
                let (sender, receiver) = oneshot::channel();
                let id = state.next_id();
                state.response_waiters.push(Waiter { id, filter, sender });
                (id, WaitInner::Pending(receiver))
            }
        };
        NetworkWait {
            state: Arc::downgrade(&self.state),
            kind: WaitKind::Response,
            id,
            pattern: url.to_string(),
            inner,
        }
    }

    /// Outstanding registered waits
    #[must_use]
    pub fn pending_waits(&self) -> usize {
        let state = lock(&self.state);
        state.request_waiters.len() + state.response_waiters.len()
    }

    /// Empty both buffers. The subscription and pending waits are kept.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.requests.clear();
        state.responses.clear();
        state.arrivals.clear();
    }

    /// Fail unless some request matches `filter`
    pub fn assert_requested(&self, filter: &NetworkFilter) -> HarnessResult<()> {
        if self.requests(filter).is_empty() {
            return Err(HarnessError::assertion(format!(
                "Expected a request matching {filter}, but none was captured"
            )));
        }
        Ok(())
    }

    /// Fail if any request matches `filter`
    pub fn assert_not_requested(&self, filter: &NetworkFilter) -> HarnessResult<()> {
        let found = self.requests(filter).len();
        if found > 0 {
            return Err(HarnessError::assertion(format!(
                "Expected no request matching {filter}, but {found} were captured"
            )));
        }
        Ok(())
    }

    /// Both buffers as `{"requests": [...], "responses": [...]}`
    pub fn to_json(&self) -> HarnessResult<serde_json::Value> {
        let state = lock(&self.state);
        let mut document = serde_json::Map::new();
        let _ = document.insert("requests".to_string(), serde_json::to_value(&state.requests)?);
        let _ = document.insert("responses".to_string(), serde_json::to_value(&state.responses)?);
        Ok(serde_json::Value::Object(document))
    }

    /// All captured traffic, interleaved in arrival order
    #[must_use]
    pub fn events(&self) -> Vec<NetworkEvent> {
        let state = lock(&self.state);
        let mut requests = state.requests.iter().cloned();
        let mut responses = state.responses.iter().cloned();
        state
            .arrivals
            .iter()
            .filter_map(|kind| match kind {
                WaitKind::Request => requests.next().map(NetworkEvent::Request),
                WaitKind::Response => responses.next().map(NetworkEvent::Response),
            })
            .collect()
    }
}

impl Drop for NetworkLogger {
    fn drop(&mut self) {
        let _ = self.page.remove_network_listener(self.listener);
    }
}
