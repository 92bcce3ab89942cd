//! In-memory browser for unit tests and offline suites.
//!
//! [`MockPage`] keeps an element table, a cookie jar, scripted `evaluate`
//! results and scripted failures, and records every call in a history list.
//! Network traffic is injected with [`MockPage::emit_request`] and
//! [`MockPage::emit_response`]; navigation emits a document request/response
//! pair the way a real page would.

use crate::page::{
    Browser, BrowserPage, Cookie, ListenerId, ListenerRegistry, NetworkActivity, NetworkListener,
    ObservedRequest, ObservedResponse, ResourceType, Viewport,
};
use crate::result::{HarnessError, HarnessResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Bytes returned by default from [`MockPage::screenshot`] (PNG signature)
pub const MOCK_PNG: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// An element known to a [`MockPage`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockElement {
    /// Whether the element is rendered visibly
    pub visible: bool,
    /// Text content
    pub text: Option<String>,
    /// Current input value
    pub value: String,
}

impl MockElement {
    /// A visible element with text
    #[must_use]
    pub fn visible(text: impl Into<String>) -> Self {
        Self {
            visible: true,
            text: Some(text.into()),
            value: String::new(),
        }
    }

    /// A present but hidden element
    #[must_use]
    pub fn hidden() -> Self {
        Self::default()
    }
}

type ClickHandler = Arc<dyn Fn(&MockPage) + Send + Sync>;

struct ScriptedFailure {
    remaining: u32,
    message: String,
}

struct MockState {
    url: String,
    title: String,
    elements: HashMap<String, MockElement>,
    click_handlers: HashMap<String, ClickHandler>,
    evaluate_results: VecDeque<Value>,
    screenshot: Vec<u8>,
    cookies: Vec<Cookie>,
    history: Vec<String>,
    failures: HashMap<String, ScriptedFailure>,
    default_timeout: Option<Duration>,
    navigation_timeout: Option<Duration>,
    viewport: Viewport,
    closed: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            url: "about:blank".to_string(),
            title: String::new(),
            elements: HashMap::new(),
            click_handlers: HashMap::new(),
            evaluate_results: VecDeque::new(),
            screenshot: MOCK_PNG.to_vec(),
            cookies: Vec::new(),
            history: Vec::new(),
            failures: HashMap::new(),
            default_timeout: None,
            navigation_timeout: None,
            viewport: Viewport::default(),
            closed: false,
        }
    }
}

/// Scriptable in-memory page
#[derive(Default)]
pub struct MockPage {
    state: Mutex<MockState>,
    listeners: ListenerRegistry,
}

impl std::fmt::Debug for MockPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockPage")
            .field("url", &state.url)
            .field("elements", &state.elements.len())
            .field("closed", &state.closed)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl MockPage {
    /// Create a blank page
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and apply closed/scripted-failure checks
    fn enter(&self, op: &str, detail: &str) -> HarnessResult<()> {
        let mut state = self.lock();
        state.history.push(if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op}:{detail}")
        });
        if state.closed {
            return Err(HarnessError::page("Target page has been closed"));
        }
        if let Some(failure) = state.failures.get_mut(op) {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return Err(HarnessError::page(failure.message.clone()));
            }
        }
        Ok(())
    }

    fn element_timeout(state: &MockState) -> HarnessError {
        HarnessError::Timeout {
            ms: state
                .default_timeout
                .map_or(30_000, |d| d.as_millis() as u64),
        }
    }

    /// Add or replace an element
    #[must_use]
    pub fn with_element(self, selector: &str, element: MockElement) -> Self {
        self.set_element(selector, element);
        self
    }

    /// Add or replace an element
    pub fn set_element(&self, selector: &str, element: MockElement) {
        let _ = self.lock().elements.insert(selector.to_string(), element);
    }

    /// Remove an element
    pub fn remove_element(&self, selector: &str) {
        let _ = self.lock().elements.remove(selector);
    }

    /// Current value of an input element
    #[must_use]
    pub fn element_value(&self, selector: &str) -> Option<String> {
        self.lock().elements.get(selector).map(|e| e.value.clone())
    }

    /// Run `handler` each time `selector` is clicked
    pub fn on_click<F>(&self, selector: &str, handler: F)
    where
        F: Fn(&Self) + Send + Sync + 'static,
    {
        let _ = self
            .lock()
            .click_handlers
            .insert(selector.to_string(), Arc::new(handler));
    }

    /// Queue a result for `evaluate`. Results are consumed in order; the
    /// last one is sticky. With an empty queue `evaluate` yields `null`.
    pub fn push_evaluate_result(&self, value: Value) {
        self.lock().evaluate_results.push_back(value);
    }

    /// Replace the screenshot bytes
    pub fn set_screenshot(&self, bytes: Vec<u8>) {
        self.lock().screenshot = bytes;
    }

    /// Set the document title
    pub fn set_title(&self, title: &str) {
        title.clone_into(&mut self.lock().title);
    }

    /// Put a cookie in the jar
    pub fn add_cookie(&self, cookie: Cookie) {
        self.lock().cookies.push(cookie);
    }

    /// Make the next `times` calls of `operation` (e.g. `"click"`) fail
    pub fn fail_next(&self, operation: &str, times: u32, message: &str) {
        let _ = self.lock().failures.insert(
            operation.to_string(),
            ScriptedFailure {
                remaining: times,
                message: message.to_string(),
            },
        );
    }

    /// Whether the page was closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Call history, `op` or `op:detail`
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Whether an operation was called
    #[must_use]
    pub fn was_called(&self, operation: &str) -> bool {
        self.lock()
            .history
            .iter()
            .any(|call| call == operation || call.starts_with(&format!("{operation}:")))
    }

    /// Number of calls of an operation
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .history
            .iter()
            .filter(|call| *call == operation || call.starts_with(&format!("{operation}:")))
            .count()
    }

    /// Timeout applied through `set_default_timeout`
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.lock().default_timeout
    }

    /// Timeout applied through `set_default_navigation_timeout`
    #[must_use]
    pub fn navigation_timeout(&self) -> Option<Duration> {
        self.lock().navigation_timeout
    }

    /// Current viewport
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.lock().viewport
    }

    /// Number of attached network listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver a request to network listeners
    pub fn emit_request(&self, request: ObservedRequest) {
        self.listeners.dispatch(&NetworkActivity::Request(request));
    }

    /// Deliver a response to network listeners
    pub fn emit_response(&self, response: ObservedResponse) {
        self.listeners.dispatch(&NetworkActivity::Response(response));
    }

    /// Deliver a request and its response
    pub fn emit_exchange(&self, url: &str, method: &str, status: u16, resource_type: ResourceType) {
        self.emit_request(ObservedRequest::new(url, method, resource_type));
        self.emit_response(ObservedResponse::new(url, method, status, resource_type));
    }
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn goto(&self, url: &str) -> HarnessResult<()> {
        self.enter("goto", url).map_err(|e| HarnessError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        url.clone_into(&mut self.lock().url);
        self.emit_exchange(url, "GET", 200, ResourceType::Document);
        Ok(())
    }

    async fn click(&self, selector: &str) -> HarnessResult<()> {
        self.enter("click", selector)?;
        let handler = {
            let state = self.lock();
            match state.elements.get(selector) {
                Some(element) if element.visible => state.click_handlers.get(selector).cloned(),
                _ => return Err(Self::element_timeout(&state)),
            }
        };
        if let Some(handler) = handler {
            handler(self);
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
        self.enter("fill", selector)?;
        let mut state = self.lock();
        let timeout = Self::element_timeout(&state);
        let element = state.elements.get_mut(selector).ok_or(timeout)?;
        value.clone_into(&mut element.value);
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
        self.enter("is_visible", selector)?;
        Ok(self
            .lock()
            .elements
            .get(selector)
            .is_some_and(|element| element.visible))
    }

    async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>> {
        self.enter("text_content", selector)?;
        Ok(self
            .lock()
            .elements
            .get(selector)
            .and_then(|element| element.text.clone()))
    }

    async fn evaluate(&self, script: &str) -> HarnessResult<Value> {
        let _ = script;
        self.enter("evaluate", "")?;
        let mut state = self.lock();
        let value = if state.evaluate_results.len() > 1 {
            state.evaluate_results.pop_front()
        } else {
            state.evaluate_results.front().cloned()
        };
        Ok(value.unwrap_or(Value::Null))
    }

    async fn screenshot(&self, full_page: bool) -> HarnessResult<Vec<u8>> {
        self.enter("screenshot", if full_page { "full" } else { "viewport" })
            .map_err(|e| HarnessError::Screenshot {
                message: e.to_string(),
            })?;
        Ok(self.lock().screenshot.clone())
    }

    async fn title(&self) -> HarnessResult<String> {
        self.enter("title", "")?;
        Ok(self.lock().title.clone())
    }

    async fn url(&self) -> HarnessResult<String> {
        self.enter("url", "")?;
        Ok(self.lock().url.clone())
    }

    async fn set_viewport(&self, viewport: Viewport) -> HarnessResult<()> {
        self.enter("set_viewport", &format!("{}x{}", viewport.width, viewport.height))?;
        self.lock().viewport = viewport;
        Ok(())
    }

    async fn cookies(&self) -> HarnessResult<Vec<Cookie>> {
        self.enter("cookies", "")?;
        Ok(self.lock().cookies.clone())
    }

    async fn clear_cookies(&self) -> HarnessResult<()> {
        self.enter("clear_cookies", "")?;
        self.lock().cookies.clear();
        Ok(())
    }

    async fn close(&self) -> HarnessResult<()> {
        let mut state = self.lock();
        state.history.push("close".to_string());
        state.closed = true;
        Ok(())
    }

    fn set_default_timeout(&self, timeout: Duration) {
        self.lock().default_timeout = Some(timeout);
    }

    fn set_default_navigation_timeout(&self, timeout: Duration) {
        self.lock().navigation_timeout = Some(timeout);
    }

    fn on_network_event(&self, listener: NetworkListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_network_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

type PageSetup = Arc<dyn Fn(&MockPage) + Send + Sync>;

/// Browser handing out [`MockPage`]s
#[derive(Default)]
pub struct MockBrowser {
    pages: Mutex<Vec<Arc<MockPage>>>,
    setup: Option<PageSetup>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MockBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBrowser")
            .field("pages", &self.page_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl MockBrowser {
    /// Create a browser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure every page the browser opens
    #[must_use]
    pub fn with_page_setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&MockPage) + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(setup));
        self
    }

    /// Pages opened so far
    #[must_use]
    pub fn pages(&self) -> Vec<Arc<MockPage>> {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of pages opened so far
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether `close` was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn new_page(&self) -> HarnessResult<Arc<dyn BrowserPage>> {
        if self.is_closed() {
            return Err(HarnessError::page("Browser has been closed"));
        }
        let page = Arc::new(MockPage::new());
        if let Some(setup) = &self.setup {
            setup(&page);
        }
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&page));
        Ok(page)
    }

    async fn close(&self) -> HarnessResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        for page in self.pages() {
            page.close().await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    mod page_tests {
        use super::*;

        #[tokio::test]
        async fn test_goto_records_url_and_emits_document_exchange() {
            let page = MockPage::new();
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            let _ = page.on_network_event(Arc::new(move |activity| {
                sink.lock().unwrap().push(activity.clone());
            }));

            page.goto("https://shop.test/").await.unwrap();

            assert_eq!(page.url().await.unwrap(), "https://shop.test/");
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert!(matches!(&seen[0], NetworkActivity::Request(r) if r.resource_type == ResourceType::Document));
            assert!(matches!(&seen[1], NetworkActivity::Response(r) if r.status == 200));
        }

        #[tokio::test]
        async fn test_click_missing_element_times_out() {
            let page = MockPage::new();
            page.set_default_timeout(Duration::from_millis(1500));
            let err = page.click("#missing").await.unwrap_err();
            assert!(matches!(err, HarnessError::Timeout { ms: 1500 }));
        }

        #[tokio::test]
        async fn test_click_runs_handler() {
            let page = MockPage::new().with_element("#add", MockElement::visible("Add to cart"));
            page.on_click("#add", |page| {
                page.set_element(".badge", MockElement::visible("1"));
            });
            page.click("#add").await.unwrap();
            assert_eq!(
                page.text_content(".badge").await.unwrap().as_deref(),
                Some("1")
            );
        }

        #[tokio::test]
        async fn test_fill_sets_value() {
            let page = MockPage::new().with_element("#email", MockElement::visible(""));
            page.fill("#email", "a@b.test").await.unwrap();
            assert_eq!(page.element_value("#email").as_deref(), Some("a@b.test"));
        }

        #[tokio::test]
        async fn test_scripted_failures_are_consumed() {
            let page = MockPage::new().with_element("#btn", MockElement::visible("Go"));
            page.fail_next("click", 2, "element detached");
            assert!(page.click("#btn").await.is_err());
            assert!(page.click("#btn").await.is_err());
            assert!(page.click("#btn").await.is_ok());
            assert_eq!(page.call_count("click"), 3);
        }

        #[tokio::test]
        async fn test_evaluate_queue_last_result_is_sticky() {
            let page = MockPage::new();
            assert_eq!(page.evaluate("1").await.unwrap(), Value::Null);
            page.push_evaluate_result(serde_json::json!(1));
            page.push_evaluate_result(serde_json::json!(2));
            assert_eq!(page.evaluate("x").await.unwrap(), serde_json::json!(1));
            assert_eq!(page.evaluate("x").await.unwrap(), serde_json::json!(2));
            assert_eq!(page.evaluate("x").await.unwrap(), serde_json::json!(2));
        }

        #[tokio::test]
        async fn test_closed_page_rejects_operations() {
            let page = MockPage::new();
            page.close().await.unwrap();
            page.close().await.unwrap();
            assert!(page.is_closed());
            assert_eq!(page.call_count("close"), 2);
            assert!(page.title().await.is_err());
            assert!(matches!(
                page.screenshot(true).await.unwrap_err(),
                HarnessError::Screenshot { .. }
            ));
        }

        #[tokio::test]
        async fn test_cookie_jar() {
            let page = MockPage::new();
            page.add_cookie(Cookie::new("session", "abc", "shop.test"));
            assert_eq!(page.cookies().await.unwrap().len(), 1);
            page.clear_cookies().await.unwrap();
            assert!(page.cookies().await.unwrap().is_empty());
        }
    }

    mod browser_tests {
        use super::*;

        #[tokio::test]
        async fn test_pages_are_isolated_and_configured() {
            let configured = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&configured);
            let browser = MockBrowser::new().with_page_setup(move |page| {
                counter.fetch_add(1, Ordering::SeqCst);
                page.set_title("Automation Exercise");
            });

            let first = browser.new_page().await.unwrap();
            let second = browser.new_page().await.unwrap();
            first.goto("https://shop.test/a").await.unwrap();

            assert_eq!(configured.load(Ordering::SeqCst), 2);
            assert_eq!(second.url().await.unwrap(), "about:blank");
            assert_eq!(second.title().await.unwrap(), "Automation Exercise");
        }

        #[tokio::test]
        async fn test_close_closes_pages() {
            let browser = MockBrowser::new();
            let page = browser.new_page().await.unwrap();
            browser.close().await.unwrap();
            assert!(browser.is_closed());
            assert!(page.url().await.is_err());
            assert!(browser.new_page().await.is_err());
        }
    }
}
