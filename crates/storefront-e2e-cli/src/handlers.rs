//! Command implementations

use crate::commands::{CheckArgs, ConfigArgs};
use crate::error::{CliError, CliResult};
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};
use storefront_e2e::{ConfigManager, ConfigSources, Report, ENV_SELECTOR, FAILURE_STEP};
use tracing::debug;

/// Resolve the configuration the way a test run would, with CLI overrides
pub fn resolve_config(
    mut sources: ConfigSources,
    env: Option<&str>,
    config_dir: Option<&Path>,
) -> CliResult<ConfigManager> {
    if let Some(env) = env {
        sources = sources.with_var(ENV_SELECTOR, env);
    }
    if let Some(dir) = config_dir {
        sources = sources.with_config_dir(dir);
    }
    Ok(ConfigManager::from_sources(sources)?)
}

/// Pretty JSON of the whole configuration or one dotted key
pub fn render_config(config: &ConfigManager, key: Option<&str>) -> CliResult<String> {
    let value = match key {
        Some(key) => config
            .lookup(key)
            .ok_or_else(|| CliError::config(format!("no value at \"{key}\"")))?,
        None => config.all(),
    };
    Ok(serde_json::to_string_pretty(value)?)
}

/// `sfe2e config`
pub fn execute_config(args: &ConfigArgs) -> CliResult<String> {
    let config = resolve_config(
        ConfigSources::from_process()?,
        args.env.as_deref(),
        args.config_dir.as_deref(),
    )?;
    debug!(
        environment = config.environment(),
        overlay = ?config.overlay_path(),
        "Configuration resolved"
    );
    render_config(&config, args.key.as_deref())
}

/// `sfe2e report render`: writes the HTML and returns its path
pub fn render_report(report_path: &Path, output: Option<&Path>) -> CliResult<PathBuf> {
    let report = Report::load(report_path)
        .map_err(|e| CliError::report(format!("{}: {e}", report_path.display())))?;
    let report_dir = report_path.parent().unwrap_or_else(|| Path::new("."));
    let output = output.map_or_else(|| report_dir.join("report.html"), Path::to_path_buf);
    std::fs::write(&output, report.render_html(report_dir))?;
    Ok(output)
}

/// One row of `sfe2e report summary`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    /// Test name
    pub test_name: String,
    /// Start timestamp
    pub start_time: String,
    /// Elapsed seconds
    pub duration_seconds: f64,
    /// Step count
    pub steps: usize,
    /// Screenshot count
    pub screenshots: u32,
    /// Whether a "Test failed" step was recorded
    pub failed: bool,
    /// Location of report.json
    pub path: PathBuf,
}

impl ReportRow {
    fn new(path: PathBuf, report: &Report) -> Self {
        Self {
            test_name: report.test_name.clone(),
            start_time: report.start_time.clone(),
            duration_seconds: report.duration_seconds,
            steps: report.steps.len(),
            screenshots: report.screenshots,
            failed: report.steps.iter().any(|s| s.description == FAILURE_STEP),
            path,
        }
    }
}

fn find_reports(dir: &Path, found: &mut Vec<PathBuf>) -> CliResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            find_reports(&path, found)?;
        } else if path.file_name().is_some_and(|name| name == "report.json") {
            found.push(path);
        }
    }
    Ok(())
}

/// Every readable report under `dir`, oldest first. Unreadable files are skipped.
pub fn collect_reports(dir: &Path) -> CliResult<Vec<ReportRow>> {
    if !dir.is_dir() {
        return Err(CliError::invalid_argument(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let mut paths = Vec::new();
    find_reports(dir, &mut paths)?;

    let mut rows: Vec<ReportRow> = paths
        .into_iter()
        .filter_map(|path| match Report::load(&path) {
            Ok(report) => Some(ReportRow::new(path, &report)),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Skipping unreadable report");
                None
            }
        })
        .collect();
    rows.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.path.cmp(&b.path)));
    Ok(rows)
}

/// Text table of report rows
#[must_use]
pub fn render_summary_table(rows: &[ReportRow], use_color: bool) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        out.push_str("No reports found\n");
        return out;
    }
    let width = rows.iter().map(|r| r.test_name.len()).max().unwrap_or(4).max(4);
    out.push_str(&format!(
        "{:<width$}  {:>9}  {:>5}  {:>11}  {}\n",
        "Test", "Duration", "Steps", "Screenshots", "Status"
    ));
    for row in rows {
        let status = if row.failed { "FAILED" } else { "ok" };
        let status = match (use_color, row.failed) {
            (false, _) => status.to_string(),
            (true, true) => style(status).red().bold().force_styling(true).to_string(),
            (true, false) => style(status).green().force_styling(true).to_string(),
        };
        out.push_str(&format!(
            "{:<width$}  {:>8.2}s  {:>5}  {:>11}  {status}\n",
            row.test_name, row.duration_seconds, row.steps, row.screenshots
        ));
    }
    let failed = rows.iter().filter(|r| r.failed).count();
    out.push_str(&format!("\n{} report(s), {failed} with failures\n", rows.len()));
    out
}

/// `sfe2e check`: open the base URL and describe the main document response
#[cfg(feature = "browser")]
pub async fn execute_check(args: &CheckArgs) -> CliResult<String> {
    use storefront_e2e::{
        Browser, BrowserPage, CdpBrowser, LaunchOptions, NetworkFilter, NetworkLogger, ResourceType,
    };

    let config = resolve_config(ConfigSources::from_process()?, args.env.as_deref(), None)?;
    let url = args
        .url
        .clone()
        .unwrap_or_else(|| config.get_str("baseUrl", ""));
    if url.is_empty() {
        return Err(CliError::config("baseUrl is not set"));
    }

    let mut options = LaunchOptions::from_config(&config);
    if args.headed {
        options = options.with_headless(false);
    }
    let browser = CdpBrowser::launch(options).await?;
    let page = browser.new_page().await?;
    let logger = NetworkLogger::attach(page.clone());

    let result = page.goto(&url).await;
    let title = page.title().await.unwrap_or_default();
    let documents = logger.responses(&NetworkFilter::new().resource_type(ResourceType::Document));
    browser.close().await?;
    result?;

    let status = documents
        .first()
        .map_or_else(|| "no document response".to_string(), |r| format!("{} {}", r.status, r.status_text));
    Ok(format!(
        "{url}\n  title: {title}\n  status: {status}\n  requests: {}",
        logger.request_count()
    ))
}

/// `sfe2e check` without Chromium support
#[cfg(not(feature = "browser"))]
#[allow(clippy::unused_async)]
pub async fn execute_check(_args: &CheckArgs) -> CliResult<String> {
    Err(CliError::browser_check(
        "browser support not enabled. Rebuild with --features browser",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_report(dir: &Path, name: &str, start: &str, failed: bool) -> PathBuf {
        let run_dir = dir.join(format!("{name}-run"));
        std::fs::create_dir_all(&run_dir).unwrap();
        let description = if failed { "Test failed" } else { "Opened home" };
        let report = json!({
            "testName": name,
            "startTime": start,
            "endTime": start,
            "durationSeconds": 1.5,
            "steps": [{
                "step": 1,
                "description": description,
                "timestamp": start,
                "data": {}
            }],
            "screenshots": 0
        });
        let path = run_dir.join("report.json");
        std::fs::write(&path, serde_json::to_string_pretty(&report).unwrap()).unwrap();
        path
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_env_flag_selects_overlay() {
            let dir = TempDir::new().unwrap();
            std::fs::write(
                dir.path().join("test-config.staging.yaml"),
                "baseUrl: https://staging.shop.test\n",
            )
            .unwrap();
            let config = resolve_config(
                ConfigSources::new(dir.path()),
                Some("staging"),
                Some(dir.path()),
            )
            .unwrap();
            assert_eq!(config.environment(), "staging");
            assert_eq!(
                render_config(&config, Some("baseUrl")).unwrap(),
                "\"https://staging.shop.test\""
            );
        }

        #[test]
        fn test_missing_key_is_config_error() {
            let config = ConfigManager::from_value(json!({ "a": 1 }));
            let err = render_config(&config, Some("b.c")).unwrap_err();
            assert!(matches!(err, CliError::Config { .. }));
        }

        #[test]
        fn test_whole_document() {
            let config = ConfigManager::from_value(json!({ "workers": 2 }));
            let text = render_config(&config, None).unwrap();
            assert!(text.contains("\"workers\": 2"));
        }
    }

    mod report_tests {
        use super::*;

        #[test]
        fn test_render_writes_next_to_report() {
            let dir = TempDir::new().unwrap();
            let path = write_report(dir.path(), "login", "2026-01-01T10:00:00.000Z", false);
            let html = render_report(&path, None).unwrap();
            assert_eq!(html, path.parent().unwrap().join("report.html"));
            assert!(std::fs::read_to_string(html).unwrap().contains("login"));
        }

        #[test]
        fn test_render_rejects_garbage() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("report.json");
            std::fs::write(&path, "not json").unwrap();
            assert!(matches!(render_report(&path, None), Err(CliError::Report { .. })));
        }

        #[test]
        fn test_collect_sorts_by_start_and_skips_garbage() {
            let dir = TempDir::new().unwrap();
            let _ = write_report(dir.path(), "checkout", "2026-01-01T11:00:00.000Z", true);
            let _ = write_report(dir.path(), "login", "2026-01-01T10:00:00.000Z", false);
            let broken = dir.path().join("broken");
            std::fs::create_dir_all(&broken).unwrap();
            std::fs::write(broken.join("report.json"), "{").unwrap();

            let rows = collect_reports(dir.path()).unwrap();
            let names: Vec<&str> = rows.iter().map(|r| r.test_name.as_str()).collect();
            assert_eq!(names, vec!["login", "checkout"]);
            assert!(rows[1].failed);
        }

        #[test]
        fn test_collect_requires_directory() {
            let dir = TempDir::new().unwrap();
            assert!(matches!(
                collect_reports(&dir.path().join("missing")),
                Err(CliError::InvalidArgument { .. })
            ));
        }

        #[test]
        fn test_summary_table() {
            let dir = TempDir::new().unwrap();
            let _ = write_report(dir.path(), "checkout", "2026-01-01T11:00:00.000Z", true);
            let rows = collect_reports(dir.path()).unwrap();
            let table = render_summary_table(&rows, false);
            assert!(table.contains("checkout"));
            assert!(table.contains("FAILED"));
            assert!(table.contains("1 report(s), 1 with failures"));
            assert_eq!(render_summary_table(&[], false), "No reports found\n");
        }
    }
}
