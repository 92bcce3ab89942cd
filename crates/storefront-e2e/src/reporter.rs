//! Step-based test reports.
//!
//! A [`TestReporter`] owns a per-run directory
//! (`<output_root>/<test name>-<YYYY-MM-DDTHH-MM-SS>/screenshots`), created
//! eagerly by the constructor. Steps are appended with contiguous ordinals;
//! [`TestReporter::generate_report`] turns them into `report.json` and
//! `report.html`.

use crate::config::ConfigManager;
use crate::network::NetworkLogger;
use crate::page::BrowserPage;
use crate::result::HarnessResult;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Description of the pseudo-step holding navigation timings
pub const PERFORMANCE_STEP: &str = "Performance Metrics";

/// Description of the pseudo-step holding captured traffic
pub const NETWORK_STEP: &str = "Network Log";

/// Description of the step recorded when a test fails
pub const FAILURE_STEP: &str = "Test failed";

const NAVIGATION_TIMING_SCRIPT: &str = r"(() => {
  const entries = performance.getEntriesByType('navigation');
  if (entries.length === 0) return null;
  const nav = entries[0];
  return {
    domContentLoaded: nav.domContentLoadedEventEnd - nav.domContentLoadedEventStart,
    load: nav.loadEventEnd - nav.loadEventStart,
    domInteractive: nav.domInteractive - nav.startTime,
    responseTime: nav.responseEnd - nav.requestStart,
    totalDuration: nav.duration
  };
})()";

/// One recorded step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// 1-based ordinal
    pub step: u32,
    /// What happened
    pub description: String,
    /// When it was logged, RFC 3339 UTC
    pub timestamp: String,
    /// Arbitrary structured data
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Screenshot file, if one was captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn has_data(data: &Value) -> bool {
    match data {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Browser navigation timings, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// DOMContentLoaded handler duration
    pub dom_content_loaded: f64,
    /// Load handler duration
    pub load: f64,
    /// Time to interactive
    pub dom_interactive: f64,
    /// Request start to response end
    pub response_time: f64,
    /// Whole navigation
    pub total_duration: f64,
}

/// Materialised report of one test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Test name
    pub test_name: String,
    /// Reporter construction time
    pub start_time: String,
    /// Report generation time
    pub end_time: String,
    /// Elapsed seconds, two decimals
    pub duration_seconds: f64,
    /// Steps in ordinal order
    pub steps: Vec<Step>,
    /// Number of screenshots captured
    pub screenshots: u32,
}

impl Report {
    /// Read a `report.json`
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Render the HTML companion. Screenshot links are relative to `report_dir`.
    #[must_use]
    pub fn render_html(&self, report_dir: &Path) -> String {
        let name = escape_markup(&self.test_name);
        let mut html = String::new();

        html.push_str(&format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{name} - Test Report</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 0; padding: 20px; }}
        h1 {{ color: #333; }}
        .summary {{ background: #f5f5f5; padding: 15px; border-radius: 5px; margin-bottom: 20px; }}
        .summary p {{ margin: 5px 0; }}
        .step {{ margin-bottom: 10px; padding: 10px; background: #f9f9f9; border-left: 4px solid #ddd; }}
        .screenshot-container {{ margin: 20px 0; border: 1px solid #ddd; padding: 15px; border-radius: 5px; }}
        .screenshot-container img {{ max-width: 100%; border: 1px solid #eee; }}
        pre {{ background: #f0f0f0; padding: 10px; border-radius: 3px; overflow-x: auto; }}
    </style>
</head>
<body>
<h1>{name} - Test Report</h1>
"#
        ));

        html.push_str(&format!(
            r#"<div class="summary">
    <p><strong>Start Time:</strong> {}</p>
    <p><strong>End Time:</strong> {}</p>
    <p><strong>Duration:</strong> {:.2} seconds</p>
    <p><strong>Total Steps:</strong> {}</p>
    <p><strong>Screenshots:</strong> {}</p>
</div>
"#,
            escape_markup(&self.start_time),
            escape_markup(&self.end_time),
            self.duration_seconds,
            self.steps.len(),
            self.screenshots
        ));

        html.push_str("<h2>Test Steps</h2>\n<div class=\"steps\">\n");
        for step in &self.steps {
            html.push_str(&format!(
                r#"<div class="step">
    <p><strong>Step {}:</strong> {}</p>
    <p><small>Timestamp: {}</small></p>
"#,
                step.step,
                escape_markup(&step.description),
                escape_markup(&step.timestamp)
            ));
            push_data_block(&mut html, &step.data);
            html.push_str("</div>\n");
        }
        html.push_str("</div>\n");

        html.push_str("<h2>Screenshots</h2>\n");
        for step in &self.steps {
            let Some(screenshot) = &step.screenshot else {
                continue;
            };
            html.push_str(&format!(
                r#"<div class="screenshot-container">
    <h3>Step {}: {}</h3>
    <p>Timestamp: {}</p>
    <img src="{}" alt="Step {}" />
"#,
                step.step,
                escape_markup(&step.description),
                escape_markup(&step.timestamp),
                escape_markup(&relative_link(report_dir, screenshot)),
                step.step
            ));
            push_data_block(&mut html, &step.data);
            html.push_str("</div>\n");
        }

        html.push_str("</body>\n</html>\n");
        html
    }
}

fn push_data_block(html: &mut String, data: &Value) {
    if has_data(data) {
        let pretty = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        html.push_str(&format!("    <pre>{}</pre>\n", escape_markup(&pretty)));
    }
}

fn relative_link(report_dir: &Path, file: &str) -> String {
    let path = Path::new(file);
    let relative = path.strip_prefix(report_dir).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Escape text for HTML and XML output
pub(crate) fn escape_markup(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Screenshot file stem: every ASCII non-alphanumeric becomes `_`, then lowercase
#[must_use]
pub fn screenshot_slug(description: &str) -> String {
    description
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Paths and content returned by [`TestReporter::generate_report`]
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReport {
    /// `report.json`
    pub report_path: PathBuf,
    /// `report.html`
    pub html_report_path: PathBuf,
    /// In-memory report that was written
    pub report: Report,
}

#[derive(Debug, Default)]
struct ReporterState {
    steps: Vec<Step>,
    screenshot_count: u32,
}

fn iso(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Per-test step recorder
pub struct TestReporter {
    page: Arc<dyn BrowserPage>,
    test_name: String,
    report_dir: PathBuf,
    screenshot_dir: PathBuf,
    started: DateTime<Utc>,
    full_page: bool,
    step_screenshots: bool,
    performance_metrics: bool,
    state: Mutex<ReporterState>,
}

impl std::fmt::Debug for TestReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestReporter")
            .field("test_name", &self.test_name)
            .field("report_dir", &self.report_dir)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl TestReporter {
    /// Create the run directory and its `screenshots` sub-directory
    pub fn new(
        page: Arc<dyn BrowserPage>,
        test_name: &str,
        output_root: impl AsRef<Path>,
    ) -> HarnessResult<Self> {
        let started = Utc::now();
        let dir_name = format!(
            "{}-{}",
            test_name.replace(['/', '\\'], "_"),
            started.format("%Y-%m-%dT%H-%M-%S")
        );
        let report_dir = output_root.as_ref().join(dir_name);
        let screenshot_dir = report_dir.join("screenshots");
        std::fs::create_dir_all(&screenshot_dir)?;

        Ok(Self {
            page,
            test_name: test_name.to_string(),
            report_dir,
            screenshot_dir,
            started,
            full_page: true,
            step_screenshots: true,
            performance_metrics: true,
            state: Mutex::new(ReporterState::default()),
        })
    }

    /// Apply `screenshots.fullPage`, `screenshots.takeOnStep` and
    /// `reporting.includePerformanceMetrics`
    #[must_use]
    pub fn configured(self, config: &ConfigManager) -> Self {
        self.with_full_page(config.get_bool("screenshots.fullPage", true))
            .with_step_screenshots(config.get_bool("screenshots.takeOnStep", true))
            .with_performance_metrics(config.get_bool("reporting.includePerformanceMetrics", true))
    }

    /// Capture the whole page instead of the viewport
    #[must_use]
    pub const fn with_full_page(mut self, full_page: bool) -> Self {
        self.full_page = full_page;
        self
    }

    /// When disabled, `log_step` never captures screenshots
    #[must_use]
    pub const fn with_step_screenshots(mut self, enabled: bool) -> Self {
        self.step_screenshots = enabled;
        self
    }

    /// When disabled, `log_performance_metrics` records nothing
    #[must_use]
    pub const fn with_performance_metrics(mut self, enabled: bool) -> Self {
        self.performance_metrics = enabled;
        self
    }

    /// Test name
    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Run directory
    #[must_use]
    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Screenshot directory
    #[must_use]
    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    /// Snapshot of the recorded steps
    pub async fn steps(&self) -> Vec<Step> {
        self.state.lock().await.steps.clone()
    }

    /// Screenshots captured so far
    pub async fn screenshot_count(&self) -> u32 {
        self.state.lock().await.screenshot_count
    }

    /// Append a step, optionally capturing a screenshot first.
    ///
    /// Capture and write failures are returned; the step is not recorded.
    pub async fn log_step(
        &self,
        description: &str,
        take_screenshot: bool,
        data: Value,
    ) -> HarnessResult<Step> {
        if take_screenshot && !self.step_screenshots {
            debug!(test = %self.test_name, "Step screenshots disabled");
        }
        self.record_step(description, take_screenshot && self.step_screenshots, data)
            .await
    }

    /// `Test failed` step with a screenshot, regardless of step screenshot settings
    pub(crate) async fn log_failure(&self, data: Value) -> HarnessResult<Step> {
        self.record_step(FAILURE_STEP, true, data).await
    }

    async fn record_step(
        &self,
        description: &str,
        take_screenshot: bool,
        data: Value,
    ) -> HarnessResult<Step> {
        let mut state = self.state.lock().await;
        let timestamp = iso(Utc::now());
        let screenshot = if take_screenshot {
            state.screenshot_count += 1;
            let file_name = format!(
                "{}-{}.png",
                state.screenshot_count,
                screenshot_slug(description)
            );
            let path = self.screenshot_dir.join(file_name);
            let bytes = self.page.screenshot(self.full_page).await?;
            tokio::fs::write(&path, bytes).await?;
            Some(path.to_string_lossy().into_owned())
        } else {
            None
        };

        let step = Step {
            step: state.steps.len() as u32 + 1,
            description: description.to_string(),
            timestamp,
            data: if data.is_null() { empty_object() } else { data },
            screenshot,
        };
        info!(test = %self.test_name, step = step.step, "{description}");
        state.steps.push(step.clone());
        Ok(step)
    }

    async fn append_pseudo_step(&self, description: &str, data: Value) -> Step {
        let mut state = self.state.lock().await;
        let step = Step {
            step: state.steps.len() as u32 + 1,
            description: description.to_string(),
            timestamp: iso(Utc::now()),
            data,
            screenshot: None,
        };
        state.steps.push(step.clone());
        step
    }

    /// Record navigation timings as a `Performance Metrics` step.
    ///
    /// Best effort: failures are logged and `None` is returned.
    pub async fn log_performance_metrics(&self) -> Option<Step> {
        if !self.performance_metrics {
            debug!(test = %self.test_name, "Performance metrics disabled");
            return None;
        }
        let value = match self.page.evaluate(NAVIGATION_TIMING_SCRIPT).await {
            Ok(value) => value,
            Err(err) => {
                error!(test = %self.test_name, error = %err, "Error capturing performance metrics");
                return None;
            }
        };
        let data = match serde_json::from_value::<PerformanceMetrics>(value) {
            Ok(metrics) => match serde_json::to_value(metrics) {
                Ok(data) => data,
                Err(err) => {
                    error!(test = %self.test_name, error = %err, "Error capturing performance metrics");
                    return None;
                }
            },
            Err(_) => json!({ "note": "Performance metrics not available" }),
        };
        Some(self.append_pseudo_step(PERFORMANCE_STEP, data).await)
    }

    /// Record the logger's traffic as a `Network Log` step
    pub async fn attach_network_log(&self, logger: &NetworkLogger) -> HarnessResult<Step> {
        let mut data = logger.to_json()?;
        if let Value::Object(map) = &mut data {
            let _ = map.insert("requestCount".to_string(), json!(logger.request_count()));
            let _ = map.insert("responseCount".to_string(), json!(logger.response_count()));
        }
        Ok(self.append_pseudo_step(NETWORK_STEP, data).await)
    }

    /// Write `report.json` and `report.html`. Each call re-stamps `endTime`
    /// and overwrites both files.
    pub async fn generate_report(&self) -> HarnessResult<GeneratedReport> {
        let state = self.state.lock().await;
        let ended = Utc::now();
        let elapsed_ms = (ended - self.started).num_milliseconds().max(0) as f64;

        let report = Report {
            test_name: self.test_name.clone(),
            start_time: iso(self.started),
            end_time: iso(ended),
            duration_seconds: (elapsed_ms / 10.0).round() / 100.0,
            steps: state.steps.clone(),
            screenshots: state.screenshot_count,
        };
        drop(state);

        let report_path = self.report_dir.join("report.json");
        tokio::fs::write(&report_path, serde_json::to_string_pretty(&report)?).await?;

        let html_report_path = self.report_dir.join("report.html");
        tokio::fs::write(&html_report_path, report.render_html(&self.report_dir)).await?;

        info!(test = %self.test_name, path = %report_path.display(), "Test report generated");
        info!(test = %self.test_name, path = %html_report_path.display(), "HTML report generated");

        Ok(GeneratedReport {
            report_path,
            html_report_path,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPage, MOCK_PNG};
    use crate::page::ResourceType;
    use tempfile::TempDir;

    fn reporter(page: &Arc<MockPage>, dir: &TempDir, name: &str) -> TestReporter {
        TestReporter::new(page.clone(), name, dir.path()).unwrap()
    }

    mod construction_tests {
        use super::*;

        #[test]
        fn test_directories_are_created_eagerly() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let reporter = reporter(&page, &dir, "checkout");
            assert!(reporter.screenshot_dir().is_dir());
            let name = reporter
                .report_dir()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            assert!(name.starts_with("checkout-"));
            // checkout-YYYY-MM-DDTHH-MM-SS
            assert_eq!(name.len(), "checkout-".len() + 19);
            assert!(!name.contains(':'));
        }

        #[test]
        fn test_path_separators_in_name_are_replaced() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let reporter = reporter(&page, &dir, "suite/case");
            assert_eq!(reporter.report_dir().parent(), Some(dir.path()));
        }

        #[test]
        fn test_unwritable_root_fails() {
            let dir = TempDir::new().unwrap();
            let blocker = dir.path().join("file");
            std::fs::write(&blocker, "x").unwrap();
            let page = Arc::new(MockPage::new());
            assert!(TestReporter::new(page, "t", &blocker).is_err());
        }
    }

    mod step_tests {
        use super::*;

        #[tokio::test]
        async fn test_ordinals_are_contiguous() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let reporter = reporter(&page, &dir, "ordinals");
            for i in 0..5 {
                let _ = reporter
                    .log_step(&format!("step {i}"), false, Value::Null)
                    .await
                    .unwrap();
            }
            let ordinals: Vec<u32> = reporter.steps().await.iter().map(|s| s.step).collect();
            assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
        }

        #[tokio::test]
        async fn test_screenshot_naming_and_bytes() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let reporter = reporter(&page, &dir, "shots");

            let _ = reporter.log_step("no shot", false, Value::Null).await.unwrap();
            let step = reporter
                .log_step("Add Product #1 to Cart!", true, json!({"qty": 1}))
                .await
                .unwrap();

            let path = PathBuf::from(step.screenshot.unwrap());
            assert_eq!(
                path.file_name().unwrap().to_string_lossy(),
                "1-add_product__1_to_cart_.png"
            );
            assert_eq!(std::fs::read(&path).unwrap(), MOCK_PNG.to_vec());
            assert!(page.was_called("screenshot:full"));
            assert_eq!(reporter.screenshot_count().await, 1);
        }

        #[tokio::test]
        async fn test_failed_capture_propagates() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            page.close().await.unwrap();
            let reporter = reporter(&page, &dir, "closed");
            assert!(reporter.log_step("boom", true, Value::Null).await.is_err());
            assert!(reporter.steps().await.is_empty());
        }

        #[tokio::test]
        async fn test_configured_screenshot_options() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let config = ConfigManager::from_value(json!({
                "screenshots": { "takeOnStep": false, "fullPage": false }
            }));
            let reporter = reporter(&page, &dir, "quiet").configured(&config);

            let step = reporter.log_step("Opened cart", true, Value::Null).await.unwrap();
            assert!(step.screenshot.is_none());
            assert!(!page.was_called("screenshot"));

            let failure = reporter.log_failure(json!({ "error": "x" })).await.unwrap();
            assert_eq!(failure.description, FAILURE_STEP);
            assert!(failure.screenshot.is_some());
            assert!(page.was_called("screenshot:viewport"));
            assert_eq!(reporter.screenshot_count().await, 1);
        }

        #[test]
        fn test_slug() {
            assert_eq!(screenshot_slug("Login As User"), "login_as_user");
            assert_eq!(screenshot_slug("Total: Rs. 500"), "total__rs__500");
            assert_eq!(screenshot_slug("café"), "caf_");
        }
    }

    mod metrics_tests {
        use super::*;

        #[tokio::test]
        async fn test_metrics_step_takes_next_ordinal() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            page.push_evaluate_result(json!({
                "domContentLoaded": 12.5,
                "load": 3.0,
                "domInteractive": 420.0,
                "responseTime": 88.0,
                "totalDuration": 900.0
            }));
            let reporter = reporter(&page, &dir, "perf");
            let _ = reporter.log_step("open home", false, Value::Null).await.unwrap();

            let step = reporter.log_performance_metrics().await.unwrap();
            assert_eq!(step.step, 2);
            assert_eq!(step.description, PERFORMANCE_STEP);
            assert_eq!(step.data["domInteractive"], json!(420.0));
        }

        #[tokio::test]
        async fn test_unavailable_metrics_leave_a_note() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let reporter = reporter(&page, &dir, "perf");
            let step = reporter.log_performance_metrics().await.unwrap();
            assert_eq!(step.data, json!({"note": "Performance metrics not available"}));
        }

        #[tokio::test]
        async fn test_metrics_can_be_disabled_by_config() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let config = ConfigManager::from_value(json!({
                "reporting": { "includePerformanceMetrics": false }
            }));
            let reporter = reporter(&page, &dir, "perf").configured(&config);
            assert!(reporter.log_performance_metrics().await.is_none());
            assert!(!page.was_called("evaluate"));
            assert!(reporter.steps().await.is_empty());
        }

        #[tokio::test]
        async fn test_metrics_failure_is_swallowed() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            page.fail_next("evaluate", 1, "page crashed");
            let reporter = reporter(&page, &dir, "perf");
            assert!(reporter.log_performance_metrics().await.is_none());
            assert!(reporter.steps().await.is_empty());
        }
    }

    mod report_tests {
        use super::*;

        #[tokio::test]
        async fn test_json_file_matches_in_memory_report() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let reporter = reporter(&page, &dir, "roundtrip");
            for i in 0..5 {
                let _ = reporter
                    .log_step(&format!("step {i}"), i == 2, json!({ "i": i }))
                    .await
                    .unwrap();
            }

            let generated = reporter.generate_report().await.unwrap();
            assert_eq!(generated.report.steps.len(), 5);
            assert_eq!(generated.report.screenshots, 1);
            let parsed = Report::load(&generated.report_path).unwrap();
            assert_eq!(parsed, generated.report);
            assert!(generated.html_report_path.is_file());
        }

        #[tokio::test]
        async fn test_generating_twice_overwrites() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let reporter = reporter(&page, &dir, "twice");
            let first = reporter.generate_report().await.unwrap();
            let _ = reporter.log_step("later", false, Value::Null).await.unwrap();
            let second = reporter.generate_report().await.unwrap();
            assert_eq!(first.report_path, second.report_path);
            assert_eq!(Report::load(&second.report_path).unwrap().steps.len(), 1);
            assert_eq!(first.report.start_time, second.report.start_time);
        }

        #[tokio::test]
        async fn test_network_log_step() {
            let dir = TempDir::new().unwrap();
            let page = Arc::new(MockPage::new());
            let logger = NetworkLogger::attach(page.clone());
            page.emit_exchange("https://shop.test/api", "GET", 200, ResourceType::Fetch);
            let reporter = reporter(&page, &dir, "net");
            let step = reporter.attach_network_log(&logger).await.unwrap();
            assert_eq!(step.description, NETWORK_STEP);
            assert_eq!(step.data["requestCount"], json!(1));
            assert_eq!(step.data["responses"][0]["status"], json!(200));
        }
    }

    mod html_tests {
        use super::*;

        fn sample(report_dir: &Path) -> Report {
            Report {
                test_name: "Cart <total>".to_string(),
                start_time: "2024-05-01T10:00:00.000Z".to_string(),
                end_time: "2024-05-01T10:00:02.500Z".to_string(),
                duration_seconds: 2.5,
                steps: vec![
                    Step {
                        step: 1,
                        description: "Open \"home\"".to_string(),
                        timestamp: "2024-05-01T10:00:00.100Z".to_string(),
                        data: empty_object(),
                        screenshot: None,
                    },
                    Step {
                        step: 2,
                        description: "Add item".to_string(),
                        timestamp: "2024-05-01T10:00:01.000Z".to_string(),
                        data: json!({"price": "Rs. 500 & up"}),
                        screenshot: Some(
                            report_dir
                                .join("screenshots")
                                .join("1-add_item.png")
                                .to_string_lossy()
                                .into_owned(),
                        ),
                    },
                ],
                screenshots: 1,
            }
        }

        #[test]
        fn test_render_html_escapes_and_links_relatively() {
            let report_dir = Path::new("/tmp/results/cart-2024-05-01T10-00-00");
            let html = sample(report_dir).render_html(report_dir);

            assert!(html.contains("<title>Cart &lt;total&gt; - Test Report</title>"));
            assert!(html.contains("Open &quot;home&quot;"));
            assert!(html.contains(r#"<img src="screenshots/1-add_item.png" alt="Step 2" />"#));
            assert!(html.contains("Rs. 500 &amp; up"));
            assert!(html.contains("<strong>Duration:</strong> 2.50 seconds"));
            assert!(html.contains("<strong>Total Steps:</strong> 2"));
        }

        #[test]
        fn test_empty_data_has_no_block() {
            let report_dir = Path::new("/r");
            let mut report = sample(report_dir);
            report.steps.truncate(1);
            assert!(!report.render_html(report_dir).contains("<pre>"));
        }

        #[test]
        fn test_escape_markup() {
            assert_eq!(
                escape_markup("<a href=\"x\">'&'</a>"),
                "&lt;a href=&quot;x&quot;&gt;&apos;&amp;&apos;&lt;/a&gt;"
            );
            assert_eq!(escape_markup("plain"), "plain");
        }
    }
}
