//! Browser abstraction consumed by the harness.
//!
//! The harness treats the browser as an opaque capability set: navigation,
//! element interaction, full-page screenshots, cookie access and a network
//! event subscription. [`BrowserPage`] and [`Browser`] describe that set so a
//! CDP-backed implementation (feature `browser`) and the in-memory
//! [`MockPage`](crate::MockPage) are interchangeable.

use crate::result::HarnessResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Resource type of a network request (Playwright naming)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Top-level or frame document
    Document,
    /// CSS stylesheet
    Stylesheet,
    /// Image
    Image,
    /// Audio or video
    Media,
    /// Web font
    Font,
    /// JavaScript
    Script,
    /// Subtitle track
    #[serde(rename = "texttrack")]
    TextTrack,
    /// XMLHttpRequest
    Xhr,
    /// Fetch API request
    Fetch,
    /// Server-sent events
    #[serde(rename = "eventsource")]
    EventSource,
    /// WebSocket handshake
    #[serde(rename = "websocket")]
    WebSocket,
    /// Web app manifest
    Manifest,
    /// Anything else
    #[default]
    Other,
}

impl ResourceType {
    /// Parse a resource type name, case-insensitively. Unknown names map to `Other`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "document" => Self::Document,
            "stylesheet" => Self::Stylesheet,
            "image" => Self::Image,
            "media" => Self::Media,
            "font" => Self::Font,
            "script" => Self::Script,
            "texttrack" => Self::TextTrack,
            "xhr" => Self::Xhr,
            "fetch" => Self::Fetch,
            "eventsource" => Self::EventSource,
            "websocket" => Self::WebSocket,
            "manifest" => Self::Manifest,
            _ => Self::Other,
        }
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Stylesheet => "stylesheet",
            Self::Image => "image",
            Self::Media => "media",
            Self::Font => "font",
            Self::Script => "script",
            Self::TextTrack => "texttrack",
            Self::Xhr => "xhr",
            Self::Fetch => "fetch",
            Self::EventSource => "eventsource",
            Self::WebSocket => "websocket",
            Self::Manifest => "manifest",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request as reported by the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRequest {
    /// Request URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Resource type
    pub resource_type: ResourceType,
}

impl ObservedRequest {
    /// Create a request without headers
    #[must_use]
    pub fn new(url: impl Into<String>, method: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: BTreeMap::new(),
            resource_type,
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(key.into(), value.into());
        self
    }
}

/// An inbound response as reported by the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedResponse {
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
    /// Resource type of the originating request
    pub resource_type: ResourceType,
}

impl ObservedResponse {
    /// Create a response without headers
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        method: impl Into<String>,
        status: u16,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            url: url.into(),
            status,
            status_text: default_status_text(status).to_string(),
            headers: BTreeMap::new(),
            method: method.into(),
            resource_type,
        }
    }

    /// Set the status text
    #[must_use]
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(key.into(), value.into());
        self
    }
}

fn default_status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// One item of the page's network event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkActivity {
    /// Request emitted
    Request(ObservedRequest),
    /// Response received
    Response(ObservedResponse),
}

/// Identifier returned when registering a network listener
pub type ListenerId = u64;

/// Callback invoked for every network event of a page
pub type NetworkListener = Arc<dyn Fn(&NetworkActivity) + Send + Sync>;

/// Set of network listeners attached to one page.
///
/// Dispatch works on a snapshot of the listener list, so a listener may
/// deregister itself (or others) while being called.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, NetworkListener)>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn add(&self, listener: NetworkListener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Deregister a listener; returns whether it was present
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no listener is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener in registration order
    pub fn dispatch(&self, activity: &NetworkActivity) {
        let snapshot: Vec<NetworkListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(activity);
        }
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels
    pub width: u32,
    /// Height in CSS pixels
    pub height: u32,
}

impl Viewport {
    /// Create a viewport
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

/// A browser cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Domain
    pub domain: String,
    /// Path
    pub path: String,
    /// Expiration timestamp (seconds since epoch)
    pub expires: Option<f64>,
    /// HTTP only flag
    pub http_only: bool,
    /// Secure flag
    pub secure: bool,
    /// Same site setting
    pub same_site: SameSite,
}

impl Cookie {
    /// Create a session cookie on path `/`
    #[must_use]
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: SameSite::Lax,
        }
    }

    /// Set path
    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// Mark HTTP only
    #[must_use]
    pub const fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// Mark secure
    #[must_use]
    pub const fn secure(mut self) -> Self {
        self.secure = true;
        self
    }
}

/// Same site cookie setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    /// Strict same site
    Strict,
    /// Lax same site
    Lax,
    /// No same site restriction
    None,
}

/// A single browser page (tab) the harness can drive.
///
/// All operations take `&self`; implementations synchronise internally so a
/// page can be shared between fixtures of one test.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate to a URL
    async fn goto(&self, url: &str) -> HarnessResult<()>;

    /// Click the first element matching a selector
    async fn click(&self, selector: &str) -> HarnessResult<()>;

    /// Replace the value of an input
    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()>;

    /// Whether an element matching the selector is visible
    async fn is_visible(&self, selector: &str) -> HarnessResult<bool>;

    /// Text content of the first matching element, `None` if absent
    async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>>;

    /// Evaluate a JavaScript expression and return its JSON value
    async fn evaluate(&self, script: &str) -> HarnessResult<serde_json::Value>;

    /// Capture a PNG screenshot
    async fn screenshot(&self, full_page: bool) -> HarnessResult<Vec<u8>>;

    /// Document title
    async fn title(&self) -> HarnessResult<String>;

    /// Current URL
    async fn url(&self) -> HarnessResult<String>;

    /// Resize the viewport
    async fn set_viewport(&self, viewport: Viewport) -> HarnessResult<()>;

    /// Cookies visible to the page's browser context
    async fn cookies(&self) -> HarnessResult<Vec<Cookie>>;

    /// Remove all cookies of the page's browser context
    async fn clear_cookies(&self) -> HarnessResult<()>;

    /// Close the page and release its browsing context. Closing twice is a no-op.
    async fn close(&self) -> HarnessResult<()>;

    /// Default timeout applied to element operations
    fn set_default_timeout(&self, timeout: Duration);

    /// Default timeout applied to navigations
    fn set_default_navigation_timeout(&self, timeout: Duration);

    /// Subscribe to every request/response of this page
    fn on_network_event(&self, listener: NetworkListener) -> ListenerId;

    /// Remove a network subscription; returns whether it existed
    fn remove_network_listener(&self, id: ListenerId) -> bool;
}

/// A browser able to open isolated pages, one per test.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a new page in a fresh browsing context
    async fn new_page(&self) -> HarnessResult<Arc<dyn BrowserPage>>;

    /// Close the browser and all of its pages
    async fn close(&self) -> HarnessResult<()>;

    /// Browser name for logging
    fn name(&self) -> &str {
        "browser"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    mod resource_type_tests {
        use super::*;

        #[test]
        fn test_from_name_is_case_insensitive() {
            assert_eq!(ResourceType::from_name("XHR"), ResourceType::Xhr);
            assert_eq!(ResourceType::from_name("Document"), ResourceType::Document);
            assert_eq!(ResourceType::from_name("TextTrack"), ResourceType::TextTrack);
            assert_eq!(ResourceType::from_name("ping"), ResourceType::Other);
        }

        #[test]
        fn test_serde_uses_playwright_names() {
            let json = serde_json::to_string(&ResourceType::EventSource).unwrap();
            assert_eq!(json, "\"eventsource\"");
            let parsed: ResourceType = serde_json::from_str("\"fetch\"").unwrap();
            assert_eq!(parsed, ResourceType::Fetch);
        }
    }

    mod observed_tests {
        use super::*;

        #[test]
        fn test_response_default_status_text() {
            let ok = ObservedResponse::new("https://shop.test/", "GET", 200, ResourceType::Document);
            assert_eq!(ok.status_text, "OK");
            let teapot = ObservedResponse::new("https://shop.test/", "GET", 418, ResourceType::Other);
            assert_eq!(teapot.status_text, "");
        }

        #[test]
        fn test_request_headers() {
            let request = ObservedRequest::new("https://shop.test/api", "POST", ResourceType::Fetch)
                .with_header("content-type", "application/json");
            assert_eq!(
                request.headers.get("content-type").map(String::as_str),
                Some("application/json")
            );
        }
    }

    mod listener_registry_tests {
        use super::*;

        #[test]
        fn test_dispatch_reaches_all_listeners() {
            let registry = ListenerRegistry::new();
            let hits = Arc::new(AtomicUsize::new(0));
            for _ in 0..2 {
                let hits = Arc::clone(&hits);
                let _ = registry.add(Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }));
            }
            registry.dispatch(&NetworkActivity::Request(ObservedRequest::new(
                "u",
                "GET",
                ResourceType::Other,
            )));
            assert_eq!(hits.load(Ordering::SeqCst), 2);
        }

        #[test]
        fn test_remove() {
            let registry = ListenerRegistry::new();
            let id = registry.add(Arc::new(|_| {}));
            assert_eq!(registry.len(), 1);
            assert!(registry.remove(id));
            assert!(!registry.remove(id));
            assert!(registry.is_empty());
        }

        #[test]
        fn test_listener_may_deregister_itself_during_dispatch() {
            let registry = Arc::new(ListenerRegistry::new());
            let slot = Arc::new(AtomicU64::new(0));
            let id = {
                let registry = Arc::clone(&registry);
                let slot = Arc::clone(&slot);
                registry.clone().add(Arc::new(move |_| {
                    let _ = registry.remove(slot.load(Ordering::SeqCst));
                }))
            };
            slot.store(id, Ordering::SeqCst);
            registry.dispatch(&NetworkActivity::Request(ObservedRequest::new(
                "u",
                "GET",
                ResourceType::Other,
            )));
            assert!(registry.is_empty());
        }
    }

    #[test]
    fn test_cookie_builder() {
        let cookie = Cookie::new("session", "abc", "shop.test").http_only().secure();
        assert_eq!(cookie.path, "/");
        assert!(cookie.http_only);
        assert!(cookie.secure);
        assert_eq!(cookie.same_site, SameSite::Lax);
    }
}
