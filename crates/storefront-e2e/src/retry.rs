//! Resilience primitives for interacting with a flaky remote UI.
//!
//! Three related patterns, kept separate:
//!
//! - [`RetryHelper::retry`]: run the same action again under a bounded
//!   exponential backoff
//! - [`RetryHelper::wait_for_condition`]: poll a predicate until it holds or a
//!   deadline passes
//! - [`RetryHelper::try_strategies`]: run alternative actions in order until
//!   one succeeds
//!
//! Assertion failures ([`HarnessError::AssertionFailed`]) are never retried:
//! they end the call immediately with the original error.

use crate::config::ConfigManager;
use crate::result::{HarnessError, HarnessResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Bounded-attempt backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, at least 1
    pub max_attempts: u32,
    /// Sleep before the second attempt
    pub initial_interval_ms: u64,
    /// Growth factor applied after each sleep, at least 1.0
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 1000,
            backoff_multiplier: 1.5,
        }
    }
}

fn clamp_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    }
}

impl RetryPolicy {
    /// Create a policy; out-of-range values are clamped
    #[must_use]
    pub fn new(max_attempts: u32, initial_interval_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval_ms,
            backoff_multiplier: clamp_multiplier(backoff_multiplier),
        }
    }

    /// Set total attempts (at least 1)
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the first backoff interval
    #[must_use]
    pub const fn with_initial_interval_ms(mut self, ms: u64) -> Self {
        self.initial_interval_ms = ms;
        self
    }

    /// Set the backoff multiplier (at least 1.0)
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = clamp_multiplier(multiplier);
        self
    }

    /// No sleeping between attempts
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0, 1.0)
    }
}

/// Where the growing backoff interval lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    /// Every `retry` call starts from the policy's initial interval
    #[default]
    PerCall,
    /// The interval is stored on the helper and keeps growing across calls
    Escalating,
}

/// Per-call overrides of the helper's policy
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetryOptions {
    /// Override of total attempts
    pub max_attempts: Option<u32>,
    /// Override of the first backoff interval
    pub initial_interval_ms: Option<u64>,
    /// Override of the backoff multiplier
    pub backoff_multiplier: Option<f64>,
}

impl RetryOptions {
    /// Override total attempts
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Override the first backoff interval
    #[must_use]
    pub const fn initial_interval_ms(mut self, ms: u64) -> Self {
        self.initial_interval_ms = Some(ms);
        self
    }

    /// Override the backoff multiplier
    #[must_use]
    pub const fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }
}

/// Polling options for [`RetryHelper::wait_for_condition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitOptions {
    /// Deadline measured from the first poll
    pub timeout_ms: u64,
    /// Sleep between polls
    pub interval_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            interval_ms: 500,
        }
    }
}

impl WaitOptions {
    /// Create wait options
    #[must_use]
    pub const fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            interval_ms,
        }
    }
}

/// One alternative for [`RetryHelper::try_strategies`]
pub type Strategy<'a, T, E> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

/// Box an async closure into a [`Strategy`]
pub fn strategy<'a, T, E, F, Fut>(f: F) -> Strategy<'a, T, E>
where
    F: FnOnce() -> Fut + Send + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
{
    Box::new(move || f().boxed())
}

/// Pull a correctness failure out of an arbitrary error so it skips retrying
fn assertion_failure<E: 'static>(err: E) -> Option<HarnessError> {
    let boxed: Box<dyn Any> = Box::new(err);
    boxed
        .downcast::<HarnessError>()
        .ok()
        .map(|err| *err)
        .filter(HarnessError::is_assertion)
}

/// Retry, polling and fallback executor shared by page objects of one test
#[derive(Debug)]
pub struct RetryHelper {
    policy: RetryPolicy,
    mode: BackoffMode,
    escalated_interval_ms: Mutex<f64>,
}

impl Default for RetryHelper {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryHelper {
    /// Create a helper with per-call backoff
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            mode: BackoffMode::PerCall,
            escalated_interval_ms: Mutex::new(policy.initial_interval_ms as f64),
        }
    }

    /// Build the policy from `retries.*` configuration keys
    #[must_use]
    pub fn from_config(config: &ConfigManager) -> Self {
        let defaults = RetryPolicy::default();
        let policy = RetryPolicy::new(
            config.get_u64("retries.elementRetries", u64::from(defaults.max_attempts)) as u32,
            config.get_u64("retries.initialIntervalMs", defaults.initial_interval_ms),
            config.get_f64("retries.backoffMultiplier", defaults.backoff_multiplier),
        );
        let mode = config.get_or("retries.backoffMode", BackoffMode::PerCall);
        Self::new(policy).with_mode(mode)
    }

    /// Select where the backoff interval is kept
    #[must_use]
    pub fn with_mode(mut self, mode: BackoffMode) -> Self {
        self.mode = mode;
        self
    }

    /// Policy in use
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Backoff mode in use
    #[must_use]
    pub const fn mode(&self) -> BackoffMode {
        self.mode
    }

    /// Interval the next escalating `retry` call starts from
    #[must_use]
    pub fn current_interval_ms(&self) -> u64 {
        match self.mode {
            BackoffMode::PerCall => self.policy.initial_interval_ms,
            BackoffMode::Escalating => *self
                .escalated_interval_ms
                .lock()
                .unwrap_or_else(PoisonError::into_inner) as u64,
        }
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// Each failure is logged with the attempt number and `label`; the helper
    /// sleeps the current interval before the next attempt and then grows the
    /// interval by the multiplier. Nothing sleeps after the final attempt.
    pub async fn retry<T, E, F, Fut>(
        &self,
        mut operation: F,
        label: &str,
        options: RetryOptions,
    ) -> HarnessResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + 'static,
    {
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.policy.max_attempts)
            .max(1);
        let multiplier = clamp_multiplier(
            options
                .backoff_multiplier
                .unwrap_or(self.policy.backoff_multiplier),
        );
        let mut interval_ms = match (self.mode, options.initial_interval_ms) {
            (_, Some(ms)) => ms as f64,
            (BackoffMode::PerCall, None) => self.policy.initial_interval_ms as f64,
            (BackoffMode::Escalating, None) => *self
                .escalated_interval_ms
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        };

        let mut last_message = String::new();
        let mut outcome = None;
        for attempt in 1..=max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Succeeded after retry");
                    }
                    outcome = Some(Ok(value));
                    break;
                }
                Err(err) => {
                    last_message = err.to_string();
                    warn!(label, attempt, max_attempts, error = %last_message, "Attempt failed");
                    if let Some(assertion) = assertion_failure(err) {
                        outcome = Some(Err(assertion));
                        break;
                    }
                    if attempt < max_attempts {
                        sleep(Duration::from_millis(interval_ms as u64)).await;
                        interval_ms *= multiplier;
                    }
                }
            }
        }

        if self.mode == BackoffMode::Escalating {
            *self
                .escalated_interval_ms
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = interval_ms;
        }

        outcome.unwrap_or_else(|| {
            Err(HarnessError::RetryExhausted {
                label: label.to_string(),
                attempts: max_attempts,
                message: last_message,
            })
        })
    }

    /// Poll `predicate` every `interval_ms` until it yields `true` or
    /// `timeout_ms` has elapsed. Predicate errors are logged and count as
    /// `false` for that poll.
    pub async fn wait_for_condition<F, Fut, E>(
        &self,
        mut predicate: F,
        label: &str,
        options: WaitOptions,
    ) -> HarnessResult<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: Display,
    {
        let start = Instant::now();
        let timeout = Duration::from_millis(options.timeout_ms);
        let interval = Duration::from_millis(options.interval_ms);

        while start.elapsed() < timeout {
            match predicate().await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => warn!(label, error = %err, "Condition check errored"),
            }
            sleep(interval).await;
        }

        Err(HarnessError::ConditionTimeout {
            label: label.to_string(),
            timeout_ms: options.timeout_ms,
        })
    }

    /// Run alternative actions strictly in order; the first success wins
    pub async fn try_strategies<'a, T, E>(
        &self,
        strategies: Vec<Strategy<'a, T, E>>,
        label: &str,
    ) -> HarnessResult<T>
    where
        E: Display + 'static,
    {
        if strategies.is_empty() {
            return Err(HarnessError::AllStrategiesFailed {
                label: label.to_string(),
                attempts: 0,
                message: "no strategies provided".to_string(),
            });
        }

        let total = strategies.len();
        let mut last_message = String::new();
        for (index, strategy) in strategies.into_iter().enumerate() {
            match strategy().await {
                Ok(value) => {
                    if index > 0 {
                        debug!(label, strategy = index + 1, "Fallback strategy succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    last_message = err.to_string();
                    warn!(label, strategy = index + 1, total, error = %last_message, "Strategy failed");
                    if let Some(assertion) = assertion_failure(err) {
                        return Err(assertion);
                    }
                }
            }
        }

        Err(HarnessError::AllStrategiesFailed {
            label: label.to_string(),
            attempts: total,
            message: last_message,
        })
    }
}
