//! Result and error types for the harness.

use thiserror::Error;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while driving a test
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Every bounded attempt of a retried operation failed
    #[error("All {attempts} attempts failed for {label}: {message}")]
    RetryExhausted {
        /// Action label
        label: String,
        /// Number of attempts made
        attempts: u32,
        /// Message of the last underlying error
        message: String,
    },

    /// A polled condition never became true
    #[error("Timeout waiting for condition: {label} (after {timeout_ms}ms)")]
    ConditionTimeout {
        /// Condition label
        label: String,
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// Every fallback strategy failed
    #[error("All strategies failed for {label}: {message}")]
    AllStrategiesFailed {
        /// Action label
        label: String,
        /// Number of strategies tried
        attempts: usize,
        /// Message of the last underlying error
        message: String,
    },

    /// Assertion failed
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Error message
        message: String,
    },

    /// Browser executable could not be launched
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Page interaction error
    #[error("Page error: {message}")]
    Page {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Screenshot capture error
    #[error("Screenshot failed: {message}")]
    Screenshot {
        /// Error message
        message: String,
    },

    /// Browser operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// A network wait was bounded and the traffic never arrived
    #[error("No network traffic matching '{pattern}' within {ms}ms")]
    NetworkWaitTimeout {
        /// URL substring waited for
        pattern: String,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// A network wait was cancelled before it resolved
    #[error("Wait for network traffic matching '{pattern}' was cancelled")]
    NetworkWaitCancelled {
        /// URL substring waited for
        pattern: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Fixture error (setup/teardown failed)
    #[error("Fixture error: {message}")]
    Fixture {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl HarnessError {
    /// Create an assertion failure
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed {
            message: message.into(),
        }
    }

    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::Page {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error came from a correctness check rather than the interaction layer
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(self, Self::AssertionFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_message_carries_label_and_cause() {
        let err = HarnessError::RetryExhausted {
            label: "Click on #submit".to_string(),
            attempts: 3,
            message: "element detached".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("Click on #submit"));
        assert!(text.contains("element detached"));
        assert!(text.contains('3'));
    }

    #[test]
    fn test_condition_timeout_names_label() {
        let err = HarnessError::ConditionTimeout {
            label: "cart badge".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "Timeout waiting for condition: cart badge (after 250ms)"
        );
    }

    #[test]
    fn test_is_assertion() {
        assert!(HarnessError::assertion("nope").is_assertion());
        assert!(!HarnessError::page("gone").is_assertion());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: HarnessError = io.into();
        assert!(matches!(err, HarnessError::Io(_)));
    }
}
