//! Layered run configuration.
//!
//! Precedence, lowest first:
//!
//! 1. the base document compiled into the crate (`config/test-config.yaml`)
//! 2. `<config_dir>/test-config.<env>.{yaml,yml,json}` if present
//! 3. allow-listed `TEST_*` environment variables
//!
//! The result is immutable. Build one [`ConfigManager`] at process start and
//! share it as `Arc<ConfigManager>`.

use crate::result::{HarnessError, HarnessResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BASE_CONFIG: &str = include_str!("../config/test-config.yaml");

/// Prefix of recognised override variables
pub const ENV_PREFIX: &str = "TEST_";

/// Variable selecting the overlay environment
pub const ENV_SELECTOR: &str = "TEST_ENV";

/// Environment used when `TEST_ENV` is unset
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Overlay file extensions, in lookup order
const OVERLAY_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Inputs the configuration is built from
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Directory holding the optional `.env` file
    pub working_dir: PathBuf,
    /// Directory searched for overlay files
    pub config_dir: PathBuf,
    /// Environment variables
    pub env: HashMap<String, String>,
}

impl ConfigSources {
    /// Sources rooted at `working_dir`, overlays under `working_dir/test-data`
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            config_dir: working_dir.join("test-data"),
            working_dir,
            env: HashMap::new(),
        }
    }

    /// Snapshot the process: current directory, environment and `.env`.
    ///
    /// Values from `.env` only fill in variables the process does not set.
    pub fn from_process() -> HarnessResult<Self> {
        let mut sources = Self::new(std::env::current_dir()?);
        sources.env = std::env::vars().collect();
        sources.load_dotenv()?;
        Ok(sources)
    }

    /// Override the overlay directory
    #[must_use]
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Set one variable
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Merge `<working_dir>/.env` into `env` without overwriting
    pub fn load_dotenv(&mut self) -> HarnessResult<()> {
        let path = self.working_dir.join(".env");
        if !path.is_file() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&path)?;
        let mut added = 0usize;
        for (key, value) in parse_dotenv(&contents) {
            if !self.env.contains_key(&key) {
                let _ = self.env.insert(key, value);
                added += 1;
            }
        }
        debug!(path = %path.display(), added, "Loaded .env");
        Ok(())
    }

    fn environment(&self) -> String {
        self.env
            .get(ENV_SELECTOR)
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }
}

/// Parse dotenv text: `KEY=VALUE` lines, `#` comments, optional `export `
/// prefix, and single or double quotes around the value.
#[must_use]
pub fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    // Unquoted values may carry a trailing comment
    value
        .split_once(" #")
        .map_or(value, |(before, _)| before.trim_end())
}

/// Deep-merge `overlay` onto `base`.
///
/// Objects merge key by key, recursively. Anything else in the overlay,
/// arrays included, replaces the base value wholesale.
#[must_use]
pub fn merge_configs(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let value = match merged.get(key) {
                    Some(base_value) => merge_configs(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                let _ = merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

/// Set a dotted path, creating intermediate objects
fn set_path(root: &mut Value, dotted_key: &str, value: Value) {
    let mut current = root;
    let mut segments = dotted_key.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            let _ = map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Apply the allow-listed `TEST_*` overrides
fn apply_env_overrides(config: &mut Value, env: &HashMap<String, String>) {
    let mut keys: Vec<&String> = env.keys().collect();
    keys.sort();
    for key in keys {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let value = &env[key];
        match suffix.to_ascii_lowercase().as_str() {
            "baseurl" => {
                debug!(variable = %key, "Overriding baseUrl");
                set_path(config, "baseUrl", Value::String(value.clone()));
            }
            "timeout" => match value.trim().parse::<u64>() {
                Ok(ms) => {
                    debug!(variable = %key, ms, "Overriding timeouts.defaultTimeout");
                    set_path(config, "timeouts.defaultTimeout", Value::from(ms));
                }
                Err(err) => {
                    warn!(variable = %key, value = %value, error = %err, "Ignoring unparsable timeout override");
                }
            },
            _ => {}
        }
    }
}

fn overlay_candidates<'a>(config_dir: &'a Path, environment: &str) -> impl Iterator<Item = PathBuf> + 'a {
    let environment = environment.to_string();
    OVERLAY_EXTENSIONS
        .iter()
        .map(move |ext| config_dir.join(format!("test-config.{environment}.{ext}")))
}

fn read_overlay(path: &Path) -> HarnessResult<Value> {
    let contents = std::fs::read_to_string(path)?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let value = if is_json {
        serde_json::from_str(&contents)?
    } else {
        serde_yaml_ng::from_str(&contents)?
    };
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(HarnessError::config(format!(
            "overlay {} must be a mapping",
            path.display()
        ))),
    }
}

/// Merged, read-only run configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Value,
    environment: String,
    overlay_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load from the current process (working directory, environment, `.env`)
    pub fn load() -> HarnessResult<Self> {
        Self::from_sources(ConfigSources::from_process()?)
    }

    /// Build from explicit sources
    pub fn from_sources(sources: ConfigSources) -> HarnessResult<Self> {
        let environment = sources.environment();
        let base = Self::base_config()?;

        let mut overlay_path =
            overlay_candidates(&sources.config_dir, &environment).find(|path| path.is_file());
        let overlay = overlay_path.clone().map(|path| {
            let read = read_overlay(&path);
            (path, read)
        });
        let mut config = match overlay {
            Some((path, Ok(overlay))) => {
                info!(environment = %environment, overlay = %path.display(), "Applied environment overlay");
                merge_configs(&base, &overlay)
            }
            Some((path, Err(err))) => {
                warn!(
                    environment = %environment,
                    overlay = %path.display(),
                    error = %err,
                    "Could not load environment config, using base configuration"
                );
                overlay_path = None;
                base
            }
            None => {
                debug!(
                    environment = %environment,
                    dir = %sources.config_dir.display(),
                    "No environment overlay found, using base configuration"
                );
                base
            }
        };

        apply_env_overrides(&mut config, &sources.env);

        Ok(Self {
            config,
            environment,
            overlay_path,
        })
    }

    /// Wrap an already-merged document
    #[must_use]
    pub fn from_value(config: Value) -> Self {
        Self {
            config,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            overlay_path: None,
        }
    }

    /// The compiled-in base document
    pub fn base_config() -> HarnessResult<Value> {
        Ok(serde_yaml_ng::from_str(BASE_CONFIG)?)
    }

    /// Walk a dotted key. Numeric segments index into arrays.
    #[must_use]
    pub fn lookup(&self, dotted_key: &str) -> Option<&Value> {
        dotted_key
            .split('.')
            .try_fold(&self.config, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Value at `dotted_key`, or `default` when any segment is missing
    #[must_use]
    pub fn get(&self, dotted_key: &str, default: Value) -> Value {
        self.lookup(dotted_key).cloned().unwrap_or(default)
    }

    /// Typed value at `dotted_key`; `default` when missing or of another shape
    #[must_use]
    pub fn get_or<T: DeserializeOwned>(&self, dotted_key: &str, default: T) -> T {
        self.lookup(dotted_key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }

    /// String value
    #[must_use]
    pub fn get_str(&self, dotted_key: &str, default: &str) -> String {
        self.lookup(dotted_key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// Unsigned integer value
    #[must_use]
    pub fn get_u64(&self, dotted_key: &str, default: u64) -> u64 {
        self.lookup(dotted_key)
            .and_then(Value::as_u64)
            .unwrap_or(default)
    }

    /// Floating point value
    #[must_use]
    pub fn get_f64(&self, dotted_key: &str, default: f64) -> f64 {
        self.lookup(dotted_key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    /// Boolean value
    #[must_use]
    pub fn get_bool(&self, dotted_key: &str, default: bool) -> bool {
        self.lookup(dotted_key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// The whole merged document
    #[must_use]
    pub const fn all(&self) -> &Value {
        &self.config
    }

    /// Selected environment name
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Overlay file that was applied, if any
    #[must_use]
    pub fn overlay_path(&self) -> Option<&Path> {
        self.overlay_path.as_deref()
    }
}
