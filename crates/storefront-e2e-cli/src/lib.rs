//! Storefront E2E CLI library
//!
//! ## Usage
//!
//! ```bash
//! sfe2e config --env ci --key timeouts     # Resolved configuration
//! sfe2e report render test-results/x/report.json
//! sfe2e report summary test-results        # One line per test run
//! sfe2e check                              # Open baseUrl in Chromium (feature `browser`)
//! ```

#![warn(missing_docs)]
#![allow(clippy::format_push_string)]

mod commands;
mod error;
pub mod handlers;

pub use commands::{
    CheckArgs, Cli, ColorArg, Commands, ConfigArgs, LogFormatArg, ReportArgs, ReportCommand,
};
pub use error::{CliError, CliResult};

impl ColorArg {
    /// Whether output should be styled
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => console::colors_enabled(),
        }
    }
}
