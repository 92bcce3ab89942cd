//! Chromium over CDP.
//!
//! [`LaunchOptions`] and the selector translation are always available; the
//! [`CdpBrowser`]/[`CdpPage`] pair needs the `browser` feature (chromiumoxide).
//!
//! Element operations go through `Runtime.evaluate` so that the harness's
//! `:has-text("...")` selectors work the same as plain CSS selectors.

use crate::config::ConfigManager;
use crate::page::Viewport;

/// How to launch Chromium
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Run without a window
    pub headless: bool,
    /// Viewport applied to every new page
    pub viewport: Viewport,
    /// Chromium sandbox (disable inside containers)
    pub sandbox: bool,
    /// Chromium binary, auto-detected when `None`
    pub executable: Option<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            sandbox: true,
            executable: None,
        }
    }
}

impl LaunchOptions {
    /// Read `browser.headless`, `browser.viewport.*`, `browser.sandbox`
    /// and `browser.executable`
    #[must_use]
    pub fn from_config(config: &ConfigManager) -> Self {
        let defaults = Self::default();
        let executable = config.get_str("browser.executable", "");
        Self {
            headless: config.get_bool("browser.headless", defaults.headless),
            viewport: Viewport::new(
                u32::try_from(config.get_u64("browser.viewport.width", 1280)).unwrap_or(1280),
                u32::try_from(config.get_u64("browser.viewport.height", 720)).unwrap_or(720),
            ),
            sandbox: config.get_bool("browser.sandbox", defaults.sandbox),
            executable: (!executable.is_empty()).then_some(executable),
        }
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Disable the Chromium sandbox
    #[must_use]
    pub const fn without_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Split `css:has-text("text")` into its CSS part and the text filter
#[must_use]
pub fn split_has_text(selector: &str) -> (&str, Option<&str>) {
    const MARKER: &str = ":has-text(";
    let Some(start) = selector.find(MARKER) else {
        return (selector, None);
    };
    let Some(argument) = selector[start + MARKER.len()..].strip_suffix(')') else {
        return (selector, None);
    };
    let text = argument
        .strip_prefix('"')
        .and_then(|a| a.strip_suffix('"'))
        .or_else(|| argument.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')))
        .unwrap_or(argument);
    let css = selector[..start].trim();
    (if css.is_empty() { "*" } else { css }, Some(text))
}

/// JavaScript expression evaluating to the first element matching
/// `selector`, or `null`
#[must_use]
pub fn locate_script(selector: &str) -> String {
    let (css, text) = split_has_text(selector);
    let css = serde_json::Value::from(css).to_string();
    let text = text.map_or_else(|| "null".to_string(), |t| serde_json::Value::from(t).to_string());
    format!(
        "(() => {{ const nodes = Array.from(document.querySelectorAll({css})); \
         const text = {text}; \
         return (text === null ? nodes[0] : nodes.find(n => (n.textContent || '').includes(text))) || null; }})()"
    )
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
/// Wrap `body` so it runs with `el` bound to the located element
fn element_script(selector: &str, body: &str) -> String {
    format!("(() => {{ const el = {}; {body} }})()", locate_script(selector))
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
const VISIBLE_BODY: &str = "if (!el) return false; \
    const style = window.getComputedStyle(el); \
    return el.getClientRects().length > 0 && style.visibility !== 'hidden' && style.display !== 'none';";

#[cfg(feature = "browser")]
pub use cdp::{CdpBrowser, CdpPage};

#[cfg(feature = "browser")]
#[allow(clippy::significant_drop_tightening, clippy::cast_possible_truncation)]
mod cdp {
    use super::{element_script, LaunchOptions, VISIBLE_BODY};
    use crate::page::{
        Browser, BrowserPage, Cookie, ListenerId, ListenerRegistry, NetworkActivity,
        NetworkListener, ObservedRequest, ObservedResponse, ResourceType, SameSite, Viewport,
    };
    use crate::result::{HarnessError, HarnessResult};
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser as ChromiumBrowser, BrowserConfig};
    use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
    use chromiumoxide::cdp::browser_protocol::network::{
        ClearBrowserCookiesParams, Cookie as CdpCookie, CookieSameSite, EventRequestWillBeSent,
        EventResponseReceived, Headers,
    };
    use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
    use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
    use chromiumoxide::cdp::browser_protocol::target::{
        CreateTargetParams, DisposeBrowserContextParams,
    };
    use chromiumoxide::page::{Page, ScreenshotParams};
    use futures::StreamExt;
    use serde_json::Value;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tracing::{debug, warn};

    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    type SharedBrowser = Arc<tokio::sync::Mutex<ChromiumBrowser>>;

    fn page_error(err: impl std::fmt::Display) -> HarnessError {
        HarnessError::page(err.to_string())
    }

    fn header_map(headers: &Headers) -> BTreeMap<String, String> {
        match serde_json::to_value(headers) {
            Ok(Value::Object(map)) => map
                .into_iter()
                .map(|(key, value)| {
                    let value = value.as_str().map_or_else(|| value.to_string(), str::to_string);
                    (key.to_ascii_lowercase(), value)
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    fn from_cdp_cookie(cookie: CdpCookie) -> Cookie {
        Cookie {
            name: cookie.name,
            value: cookie.value,
            domain: cookie.domain,
            path: cookie.path,
            expires: (cookie.expires > 0.0).then_some(cookie.expires),
            http_only: cookie.http_only,
            secure: cookie.secure,
            same_site: match cookie.same_site {
                Some(CookieSameSite::Strict) => SameSite::Strict,
                Some(CookieSameSite::None) => SameSite::None,
                _ => SameSite::Lax,
            },
        }
    }

    /// Chromium instance driven over CDP
    pub struct CdpBrowser {
        inner: SharedBrowser,
        options: LaunchOptions,
        handler: JoinHandle<()>,
        closed: AtomicBool,
    }

    impl std::fmt::Debug for CdpBrowser {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CdpBrowser")
                .field("options", &self.options)
                .field("closed", &self.closed.load(Ordering::SeqCst))
                .finish_non_exhaustive()
        }
    }

    impl CdpBrowser {
        /// Launch Chromium
        pub async fn launch(options: LaunchOptions) -> HarnessResult<Self> {
            let mut builder = BrowserConfig::builder()
                .window_size(options.viewport.width, options.viewport.height);
            if !options.headless {
                builder = builder.with_head();
            }
            if !options.sandbox {
                builder = builder.no_sandbox();
            }
            if let Some(path) = &options.executable {
                builder = builder.chrome_executable(path);
            }
            let config = builder
                .build()
                .map_err(|message| HarnessError::BrowserLaunch { message })?;

            let (browser, mut handler) = ChromiumBrowser::launch(config)
                .await
                .map_err(|e| HarnessError::BrowserLaunch {
                    message: e.to_string(),
                })?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });
            debug!(headless = options.headless, "Chromium launched");

            Ok(Self {
                inner: Arc::new(tokio::sync::Mutex::new(browser)),
                options,
                handler,
                closed: AtomicBool::new(false),
            })
        }

        /// Options the browser was launched with
        #[must_use]
        pub const fn options(&self) -> &LaunchOptions {
            &self.options
        }
    }

    impl Drop for CdpBrowser {
        fn drop(&mut self) {
            self.handler.abort();
        }
    }

    #[async_trait]
    impl Browser for CdpBrowser {
        async fn new_page(&self) -> HarnessResult<Arc<dyn BrowserPage>> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(HarnessError::page("Browser has been closed"));
            }
            let mut browser = self.inner.lock().await;
            let context = browser
                .create_browser_context(Default::default())
                .await
                .map_err(page_error)?;
            let params = CreateTargetParams::builder()
                .url("about:blank")
                .browser_context_id(context.clone())
                .build()
                .map_err(page_error)?;
            let page = browser.new_page(params).await.map_err(page_error)?;
            drop(browser);

            let page = CdpPage::attach(page)
                .await?
                .owned_by(Arc::clone(&self.inner), context);
            page.set_viewport(self.options.viewport).await?;
            Ok(Arc::new(page))
        }

        async fn close(&self) -> HarnessResult<()> {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let mut browser = self.inner.lock().await;
            let _ = browser.close().await.map_err(page_error)?;
            Ok(())
        }

        fn name(&self) -> &str {
            "chromium"
        }
    }

    /// One Chromium tab
    pub struct CdpPage {
        page: Page,
        context: Option<(SharedBrowser, BrowserContextId)>,
        closed: AtomicBool,
        listeners: Arc<ListenerRegistry>,
        tasks: Vec<JoinHandle<()>>,
        default_timeout: Mutex<Duration>,
        navigation_timeout: Mutex<Duration>,
    }

    impl std::fmt::Debug for CdpPage {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CdpPage")
                .field("listeners", &self.listeners.len())
                .finish_non_exhaustive()
        }
    }

    impl CdpPage {
        /// Wrap a chromiumoxide page and start forwarding its network events
        pub async fn attach(page: Page) -> HarnessResult<Self> {
            let listeners = Arc::new(ListenerRegistry::new());
            let methods: Arc<Mutex<HashMap<String, String>>> = Arc::default();

            let mut requests = page
                .event_listener::<EventRequestWillBeSent>()
                .await
                .map_err(page_error)?;
            let mut responses = page
                .event_listener::<EventResponseReceived>()
                .await
                .map_err(page_error)?;

            let request_task = {
                let listeners = Arc::clone(&listeners);
                let methods = Arc::clone(&methods);
                tokio::spawn(async move {
                    while let Some(event) = requests.next().await {
                        let resource_type = event
                            .r#type
                            .as_ref()
                            .map_or(ResourceType::Other, |t| ResourceType::from_name(t.as_ref()));
                        let _ = methods
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(event.request_id.inner().clone(), event.request.method.clone());
                        let mut request = ObservedRequest::new(
                            event.request.url.clone(),
                            event.request.method.clone(),
                            resource_type,
                        );
                        request.headers = header_map(&event.request.headers);
                        listeners.dispatch(&NetworkActivity::Request(request));
                    }
                })
            };

            let response_task = {
                let listeners = Arc::clone(&listeners);
                tokio::spawn(async move {
                    while let Some(event) = responses.next().await {
                        let method = methods
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(event.request_id.inner())
                            .unwrap_or_else(|| "GET".to_string());
                        let status = u16::try_from(event.response.status).unwrap_or_default();
                        let mut response = ObservedResponse::new(
                            event.response.url.clone(),
                            method,
                            status,
                            ResourceType::from_name(event.r#type.as_ref()),
                        )
                        .with_status_text(event.response.status_text.clone());
                        response.headers = header_map(&event.response.headers);
                        listeners.dispatch(&NetworkActivity::Response(response));
                    }
                })
            };

            Ok(Self {
                page,
                context: None,
                closed: AtomicBool::new(false),
                listeners,
                tasks: vec![request_task, response_task],
                default_timeout: Mutex::new(Duration::from_secs(30)),
                navigation_timeout: Mutex::new(Duration::from_secs(30)),
            })
        }

        /// Dispose `context` together with the page on close
        fn owned_by(mut self, browser: SharedBrowser, context: BrowserContextId) -> Self {
            self.context = Some((browser, context));
            self
        }

        fn default_timeout(&self) -> Duration {
            *self
                .default_timeout
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }

        async fn eval_value(&self, script: &str) -> HarnessResult<Value> {
            let result = self.page.evaluate(script).await.map_err(page_error)?;
            Ok(result.value().cloned().unwrap_or(Value::Null))
        }

        /// Poll until the element is visible, then run `body` against it
        async fn with_visible_element(&self, selector: &str, body: &str) -> HarnessResult<Value> {
            let timeout = self.default_timeout();
            let visible = element_script(selector, VISIBLE_BODY);
            let waited = tokio::time::timeout(timeout, async {
                loop {
                    if self.eval_value(&visible).await?.as_bool() == Some(true) {
                        return Ok::<_, HarnessError>(());
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            })
            .await;
            match waited {
                Ok(result) => result?,
                Err(_) => {
                    return Err(HarnessError::Timeout {
                        ms: timeout.as_millis() as u64,
                    })
                }
            }
            self.eval_value(&element_script(selector, body)).await
        }
    }

    impl Drop for CdpPage {
        fn drop(&mut self) {
            for task in &self.tasks {
                task.abort();
            }
        }
    }

    #[async_trait]
    impl BrowserPage for CdpPage {
        async fn goto(&self, url: &str) -> HarnessResult<()> {
            let timeout = *self
                .navigation_timeout
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let navigation_error = |message: String| HarnessError::Navigation {
                url: url.to_string(),
                message,
            };
            match tokio::time::timeout(timeout, self.page.goto(url)).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(navigation_error(e.to_string())),
                Err(_) => Err(navigation_error(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                ))),
            }
        }

        async fn click(&self, selector: &str) -> HarnessResult<()> {
            let _ = self
                .with_visible_element(selector, "el.scrollIntoView({block: 'center'}); el.click(); return true;")
                .await?;
            Ok(())
        }

        async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
            let body = format!(
                "el.focus(); el.value = {}; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;",
                Value::from(value)
            );
            let _ = self.with_visible_element(selector, &body).await?;
            Ok(())
        }

        async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
            let value = self.eval_value(&element_script(selector, VISIBLE_BODY)).await?;
            Ok(value.as_bool().unwrap_or(false))
        }

        async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>> {
            let value = self
                .eval_value(&element_script(selector, "return el ? el.textContent : null;"))
                .await?;
            Ok(value.as_str().map(str::to_string))
        }

        async fn evaluate(&self, script: &str) -> HarnessResult<Value> {
            self.eval_value(script).await
        }

        async fn screenshot(&self, full_page: bool) -> HarnessResult<Vec<u8>> {
            let params = ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(full_page)
                .build();
            self.page
                .screenshot(params)
                .await
                .map_err(|e| HarnessError::Screenshot {
                    message: e.to_string(),
                })
        }

        async fn title(&self) -> HarnessResult<String> {
            Ok(self
                .page
                .get_title()
                .await
                .map_err(page_error)?
                .unwrap_or_default())
        }

        async fn url(&self) -> HarnessResult<String> {
            Ok(self.page.url().await.map_err(page_error)?.unwrap_or_default())
        }

        async fn set_viewport(&self, viewport: Viewport) -> HarnessResult<()> {
            let params = SetDeviceMetricsOverrideParams::new(
                i64::from(viewport.width),
                i64::from(viewport.height),
                1.0,
                false,
            );
            let _ = self.page.execute(params).await.map_err(page_error)?;
            Ok(())
        }

        async fn cookies(&self) -> HarnessResult<Vec<Cookie>> {
            let cookies = self.page.get_cookies().await.map_err(page_error)?;
            Ok(cookies.into_iter().map(from_cdp_cookie).collect())
        }

        async fn clear_cookies(&self) -> HarnessResult<()> {
            let _ = self
                .page
                .execute(ClearBrowserCookiesParams::default())
                .await
                .map_err(page_error)?;
            Ok(())
        }

        fn set_default_timeout(&self, timeout: Duration) {
            *self
                .default_timeout
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = timeout;
        }

        fn set_default_navigation_timeout(&self, timeout: Duration) {
            *self
                .navigation_timeout
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = timeout;
        }

        async fn close(&self) -> HarnessResult<()> {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            for task in &self.tasks {
                task.abort();
            }
            let closed = self.page.clone().close().await.map_err(page_error);
            if let Some((browser, context)) = &self.context {
                let browser = browser.lock().await;
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context.clone()))
                    .await
                    .map_err(page_error)?;
                debug!("Browser context disposed");
            }
            closed
        }

        fn on_network_event(&self, listener: NetworkListener) -> ListenerId {
            self.listeners.add(listener)
        }

        fn remove_network_listener(&self, id: ListenerId) -> bool {
            let removed = self.listeners.remove(id);
            if !removed {
                warn!(id, "Network listener was not registered");
            }
            removed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod launch_options_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let options = LaunchOptions::default();
            assert!(options.headless);
            assert!(options.sandbox);
            assert_eq!(options.viewport, Viewport::new(1280, 720));
        }

        #[test]
        fn test_from_config() {
            let config = ConfigManager::from_value(json!({
                "browser": {
                    "headless": false,
                    "sandbox": false,
                    "executable": "/usr/bin/chromium",
                    "viewport": { "width": 1920, "height": 1080 }
                }
            }));
            let options = LaunchOptions::from_config(&config);
            assert!(!options.headless);
            assert!(!options.sandbox);
            assert_eq!(options.viewport, Viewport::new(1920, 1080));
            assert_eq!(options.executable.as_deref(), Some("/usr/bin/chromium"));
        }

        #[test]
        fn test_from_base_config() {
            let config = ConfigManager::from_value(ConfigManager::base_config().unwrap());
            let options = LaunchOptions::from_config(&config);
            assert!(options.headless);
            assert_eq!(options.executable, None);
        }

        #[test]
        fn test_builders() {
            let options = LaunchOptions::default().with_headless(false).without_sandbox();
            assert!(!options.headless);
            assert!(!options.sandbox);
        }
    }

    mod selector_tests {
        use super::*;

        #[test]
        fn test_plain_css() {
            assert_eq!(split_has_text("#login"), ("#login", None));
        }

        #[test]
        fn test_has_text_double_quotes() {
            assert_eq!(
                split_has_text(r#"a:has-text("Logged in as")"#),
                ("a", Some("Logged in as"))
            );
        }

        #[test]
        fn test_has_text_single_quotes_without_css() {
            assert_eq!(split_has_text(":has-text('Cart')"), ("*", Some("Cart")));
        }

        #[test]
        fn test_unterminated_has_text_is_css() {
            assert_eq!(split_has_text("a:has-text(\"x\""), ("a:has-text(\"x\"", None));
        }

        #[test]
        fn test_locate_script_quotes_arguments() {
            let script = locate_script(r#"a:has-text("say "hi"")"#);
            assert!(script.contains(r#"querySelectorAll("a")"#));
            assert!(script.contains(r#"const text = "say \"hi\"";"#));
            assert!(locate_script("#cart").contains("const text = null;"));
        }
    }
}
