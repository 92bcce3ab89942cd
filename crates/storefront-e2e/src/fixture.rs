//! Per-test context and suite execution.
//!
//! Each test gets a [`TestContext`]: its own browser page (decorated as a
//! [`TestPage`]), the shared configuration, and four fixtures created lazily
//! on first access, at most once per test:
//!
//! | Fixture | Accessor |
//! |---------|----------|
//! | step reporter | [`TestContext::reporter`] |
//! | network logger | [`TestContext::network_logger`] |
//! | retry helper | [`TestContext::retry_helper`] |
//! | assertions | [`TestContext::assertions`] |
//!
//! [`TestRunner`] drives a list of tests through suite-level and test-level
//! hooks and collects a [`SuiteSummary`].
//!
//! ```ignore
//! let summary = TestRunner::new(config)
//!     .test_setup(|ctx| async move { ctx.page().clear_cookies().await }.boxed())
//!     .test("search products", |ctx| {
//!         async move {
//!             let base = ctx.config().get_str("baseUrl", "");
//!             ctx.page().goto(&format!("{base}/products")).await?;
//!             ctx.reporter().await?.log_step("Opened products", true, Value::Null).await?;
//!             Ok(())
//!         }
//!         .boxed()
//!     })
//!     .run(&browser)
//!     .await?;
//! ```

use crate::assertions::CustomAssertions;
use crate::config::ConfigManager;
use crate::network::NetworkLogger;
use crate::page::{Browser, BrowserPage, Cookie};
use crate::reporter::{GeneratedReport, TestReporter};
use crate::result::HarnessResult;
use crate::retry::RetryHelper;
use crate::summary::{SuiteSummary, TestOutcome};
use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Test body or per-test hook
pub type TestFn =
    Arc<dyn for<'a> Fn(&'a TestContext) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync>;

/// Suite-level hook
pub type BrowserHook =
    Arc<dyn for<'a> Fn(&'a dyn Browser) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync>;

/// Identity of the running test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInfo {
    /// Test title
    pub title: String,
    /// Declaration index within the suite
    pub index: usize,
}

impl TestInfo {
    /// Create test info
    #[must_use]
    pub fn new(title: &str, index: usize) -> Self {
        Self {
            title: title.to_string(),
            index,
        }
    }
}

/// Page with configured timeouts and a few conveniences.
///
/// Dereferences to the underlying [`BrowserPage`].
#[derive(Clone)]
pub struct TestPage {
    inner: Arc<dyn BrowserPage>,
    screenshot_dir: PathBuf,
    full_page: bool,
}

impl std::fmt::Debug for TestPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPage")
            .field("screenshot_dir", &self.screenshot_dir)
            .finish_non_exhaustive()
    }
}

impl TestPage {
    /// Apply `timeouts.defaultTimeout` and `timeouts.navigationTimeout`
    #[must_use]
    pub fn decorate(page: Arc<dyn BrowserPage>, config: &ConfigManager) -> Self {
        page.set_default_timeout(Duration::from_millis(
            config.get_u64("timeouts.defaultTimeout", 30_000),
        ));
        page.set_default_navigation_timeout(Duration::from_millis(
            config.get_u64("timeouts.navigationTimeout", 45_000),
        ));
        Self {
            inner: page,
            screenshot_dir: PathBuf::from(config.get_str("screenshots.dir", "screenshots")),
            full_page: config.get_bool("screenshots.fullPage", true),
        }
    }

    /// Shared handle to the underlying page
    #[must_use]
    pub fn handle(&self) -> Arc<dyn BrowserPage> {
        Arc::clone(&self.inner)
    }

    /// Directory used by [`TestPage::capture_screenshot`]
    #[must_use]
    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    /// Screenshot saved as `<screenshots.dir>/<name>-<timestamp>.png`, full page
    /// unless `screenshots.fullPage` is off
    pub async fn capture_screenshot(&self, name: &str) -> HarnessResult<PathBuf> {
        let timestamp = Utc::now()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace(':', "-");
        tokio::fs::create_dir_all(&self.screenshot_dir).await?;
        let path = self.screenshot_dir.join(format!("{name}-{timestamp}.png"));
        let bytes = self.inner.screenshot(self.full_page).await?;
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "Screenshot captured");
        Ok(path)
    }

    /// Every cookie of the page's browsing context
    pub async fn all_cookies(&self) -> HarnessResult<Vec<Cookie>> {
        self.inner.cookies().await
    }

    /// Remove every cookie of the page's browsing context
    pub async fn clear_cookies(&self) -> HarnessResult<()> {
        self.inner.clear_cookies().await
    }
}

impl Deref for TestPage {
    type Target = dyn BrowserPage;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

/// Whether a lazy fixture has been created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    /// Not accessed yet
    Pending,
    /// Created
    Ready,
}

impl FixtureState {
    const fn of(ready: bool) -> Self {
        if ready {
            Self::Ready
        } else {
            Self::Pending
        }
    }
}

/// Everything a test body can reach
pub struct TestContext {
    info: TestInfo,
    config: Arc<ConfigManager>,
    page: TestPage,
    output_root: PathBuf,
    reporter: OnceCell<TestReporter>,
    network_logger: OnceLock<NetworkLogger>,
    retry_helper: OnceLock<RetryHelper>,
    assertions: OnceLock<CustomAssertions>,
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("info", &self.info)
            .field("output_root", &self.output_root)
            .field("fixtures", &self.fixture_states())
            .finish_non_exhaustive()
    }
}

impl TestContext {
    /// Build a context around a fresh page. Reports go under `reporting.outputDir`.
    #[must_use]
    pub fn new(info: TestInfo, config: Arc<ConfigManager>, page: Arc<dyn BrowserPage>) -> Self {
        let page = TestPage::decorate(page, &config);
        let output_root = PathBuf::from(config.get_str("reporting.outputDir", "test-results"));
        Self {
            info,
            config,
            page,
            output_root,
            reporter: OnceCell::new(),
            network_logger: OnceLock::new(),
            retry_helper: OnceLock::new(),
            assertions: OnceLock::new(),
        }
    }

    /// Override where the reporter creates its run directory
    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// Running test
    #[must_use]
    pub const fn info(&self) -> &TestInfo {
        &self.info
    }

    /// Shared configuration
    #[must_use]
    pub const fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    /// Decorated page
    #[must_use]
    pub const fn page(&self) -> &TestPage {
        &self.page
    }

    /// Step reporter; its directory is created on first access
    pub async fn reporter(&self) -> HarnessResult<&TestReporter> {
        self.reporter
            .get_or_try_init(|| async {
                TestReporter::new(self.page.handle(), &self.info.title, &self.output_root)
                    .map(|reporter| reporter.configured(&self.config))
            })
            .await
    }

    /// Network logger; recording starts on first access
    pub fn network_logger(&self) -> &NetworkLogger {
        self.network_logger
            .get_or_init(|| NetworkLogger::attach(self.page.handle()))
    }

    /// Retry helper configured from `retries.*`
    pub fn retry_helper(&self) -> &RetryHelper {
        self.retry_helper
            .get_or_init(|| RetryHelper::from_config(&self.config))
    }

    /// Storefront assertions bound to the page, waiting up to `timeouts.elementTimeout`
    pub fn assertions(&self) -> &CustomAssertions {
        self.assertions.get_or_init(|| {
            CustomAssertions::new(self.page.handle()).with_expect_timeout(Duration::from_millis(
                self.config.get_u64("timeouts.elementTimeout", 5_000),
            ))
        })
    }

    /// State of each lazy fixture, by fixture name
    #[must_use]
    pub fn fixture_states(&self) -> Vec<(&'static str, FixtureState)> {
        vec![
            ("testReporter", FixtureState::of(self.reporter.initialized())),
            ("networkLogger", FixtureState::of(self.network_logger.get().is_some())),
            ("retryHelper", FixtureState::of(self.retry_helper.get().is_some())),
            ("assertions", FixtureState::of(self.assertions.get().is_some())),
        ]
    }

    /// State of one lazy fixture
    #[must_use]
    pub fn fixture_state(&self, name: &str) -> Option<FixtureState> {
        self.fixture_states()
            .into_iter()
            .find(|(fixture, _)| *fixture == name)
            .map(|(_, state)| state)
    }

    /// Record a failure step with a screenshot when `screenshots.takeOnFailure`
    /// is set and the reporter is in use
    async fn record_failure(&self, message: &str) {
        let Some(reporter) = self.reporter.get() else {
            return;
        };
        if !self.config.get_bool("screenshots.takeOnFailure", true) {
            return;
        }
        if let Err(err) = reporter.log_failure(json!({ "error": message })).await
        {
            warn!(test = %self.info.title, error = %err, "Could not capture failure screenshot");
        }
    }

    /// End-of-test report generation, only if the reporter was used.
    ///
    /// With `reporting.includeNetworkLogs` and an active network logger, the
    /// captured traffic is appended as a final step first.
    pub async fn finish(&self) -> HarnessResult<Option<GeneratedReport>> {
        let Some(reporter) = self.reporter.get() else {
            return Ok(None);
        };
        if !self.config.get_bool("reporting.autoGenerate", true) {
            return Ok(None);
        }
        if self.config.get_bool("reporting.includeNetworkLogs", true) {
            if let Some(logger) = self.network_logger.get() {
                let _ = reporter.attach_network_log(logger).await?;
            }
        }
        reporter.generate_report().await.map(Some)
    }
}

struct TestCase {
    title: String,
    body: Option<TestFn>,
}

/// Suite of tests sharing hooks and configuration
pub struct TestRunner {
    suite_name: String,
    config: Arc<ConfigManager>,
    output_root: Option<PathBuf>,
    workers: usize,
    global_setup: Vec<BrowserHook>,
    global_teardown: Vec<BrowserHook>,
    test_setup: Vec<TestFn>,
    test_teardown: Vec<TestFn>,
    tests: Vec<TestCase>,
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("suite_name", &self.suite_name)
            .field("workers", &self.workers)
            .field("tests", &self.tests.len())
            .finish_non_exhaustive()
    }
}

impl TestRunner {
    /// Create a runner; concurrency comes from config `workers` (default 1)
    #[must_use]
    pub fn new(config: Arc<ConfigManager>) -> Self {
        let workers = config.get_u64("workers", 1).max(1) as usize;
        Self {
            suite_name: "storefront-e2e".to_string(),
            config,
            output_root: None,
            workers,
            global_setup: Vec::new(),
            global_teardown: Vec::new(),
            test_setup: Vec::new(),
            test_teardown: Vec::new(),
            tests: Vec::new(),
        }
    }

    /// Name used in the summary and JUnit output
    #[must_use]
    pub fn with_suite_name(mut self, name: &str) -> Self {
        self.suite_name = name.to_string();
        self
    }

    /// Maximum tests running at once (at least 1)
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Report root for every test, instead of `reporting.outputDir`
    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    /// Run once before any test; a failure aborts the run
    #[must_use]
    pub fn global_setup<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a dyn Browser) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync + 'static,
    {
        self.global_setup.push(Arc::new(hook));
        self
    }

    /// Run once after all tests, even when tests failed
    #[must_use]
    pub fn global_teardown<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a dyn Browser) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync + 'static,
    {
        self.global_teardown.push(Arc::new(hook));
        self
    }

    /// Run before each test body; a failure fails that test and skips its body
    #[must_use]
    pub fn test_setup<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a TestContext) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync + 'static,
    {
        self.test_setup.push(Arc::new(hook));
        self
    }

    /// Run after each test, whatever the body's outcome
    #[must_use]
    pub fn test_teardown<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a TestContext) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync + 'static,
    {
        self.test_teardown.push(Arc::new(hook));
        self
    }

    /// Declare a test
    #[must_use]
    pub fn test<F>(mut self, title: &str, body: F) -> Self
    where
        F: for<'a> Fn(&'a TestContext) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync + 'static,
    {
        self.tests.push(TestCase {
            title: title.to_string(),
            body: Some(Arc::new(body)),
        });
        self
    }

    /// Declare a test that is reported as skipped
    #[must_use]
    pub fn skip(mut self, title: &str) -> Self {
        self.tests.push(TestCase {
            title: title.to_string(),
            body: None,
        });
        self
    }

    /// Number of declared tests
    #[must_use]
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Run the suite against `browser`.
    ///
    /// Returns `Err` only when a global setup hook fails. Test failures and
    /// global teardown failures are recorded in the summary.
    pub async fn run(&self, browser: &dyn Browser) -> HarnessResult<SuiteSummary> {
        let started = Instant::now();
        info!(
            suite = %self.suite_name,
            tests = self.tests.len(),
            workers = self.workers,
            browser = browser.name(),
            "Suite started"
        );

        for hook in &self.global_setup {
            if let Err(err) = hook(browser).await {
                error!(suite = %self.suite_name, error = %err, "Global setup failed");
                return Err(err);
            }
        }

        let mut outcomes: Vec<(usize, TestOutcome)> = stream::iter(self.tests.iter().enumerate())
            .map(move |(index, case)| async move { (index, self.run_test(browser, index, case).await) })
            .buffer_unordered(self.workers)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut summary = SuiteSummary::new(
            self.suite_name.clone(),
            outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
            Duration::ZERO,
        );

        for hook in &self.global_teardown {
            if let Err(err) = hook(browser).await {
                error!(suite = %self.suite_name, error = %err, "Global teardown failed");
                summary.errors.push(format!("global teardown failed: {err}"));
            }
        }

        summary.duration = started.elapsed();
        info!(suite = %self.suite_name, "{}", summary.summary());
        Ok(summary)
    }

    async fn run_test(&self, browser: &dyn Browser, index: usize, case: &TestCase) -> TestOutcome {
        let Some(body) = &case.body else {
            info!(test = %case.title, "Test skipped");
            return TestOutcome::skipped(&case.title);
        };
        let started = Instant::now();

        let page = match browser.new_page().await {
            Ok(page) => page,
            Err(err) => {
                error!(test = %case.title, error = %err, "Could not open page");
                return TestOutcome::failed(&case.title, started.elapsed(), format!("page setup failed: {err}"));
            }
        };

        let mut ctx = TestContext::new(TestInfo::new(&case.title, index), Arc::clone(&self.config), page);
        if let Some(root) = &self.output_root {
            ctx = ctx.with_output_root(root);
        }
        info!(test = %case.title, "Test started");

        let mut failure: Option<String> = None;
        for hook in &self.test_setup {
            if let Err(err) = hook(&ctx).await {
                failure = Some(format!("test setup failed: {err}"));
                break;
            }
        }

        if failure.is_none() {
            if let Err(err) = body(&ctx).await {
                failure = Some(err.to_string());
            }
        }

        if let Some(message) = &failure {
            ctx.record_failure(message).await;
        }

        for hook in &self.test_teardown {
            if let Err(err) = hook(&ctx).await {
                warn!(test = %case.title, error = %err, "Test teardown failed");
                let _ = failure.get_or_insert_with(|| format!("test teardown failed: {err}"));
            }
        }

        let report_path = match ctx.finish().await {
            Ok(report) => report.map(|generated| generated.report_path),
            Err(err) => {
                warn!(test = %case.title, error = %err, "Report generation failed");
                let _ = failure.get_or_insert_with(|| format!("report generation failed: {err}"));
                None
            }
        };

        if let Err(err) = ctx.page().close().await {
            warn!(test = %case.title, error = %err, "Could not close page");
        }

        let outcome = match failure {
            None => {
                info!(test = %case.title, "Test passed");
                TestOutcome::passed(&case.title, started.elapsed())
            }
            Some(message) => {
                error!(test = %case.title, error = %message, "Test failed");
                TestOutcome::failed(&case.title, started.elapsed(), message)
            }
        };
        outcome.with_report(report_path)
    }
}
