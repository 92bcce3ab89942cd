//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sfe2e: inspect Storefront E2E configuration and reports
#[derive(Parser, Debug)]
#[command(name = "sfe2e")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormatArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the resolved configuration
    Config(ConfigArgs),

    /// Render and summarise test reports
    Report(ReportArgs),

    /// Open the configured base URL in Chromium and report what loaded
    Check(CheckArgs),
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Environment overlay to apply (overrides TEST_ENV)
    #[arg(short, long)]
    pub env: Option<String>,

    /// Dotted key to print instead of the whole document
    #[arg(short, long)]
    pub key: Option<String>,

    /// Directory holding test-config.<env>.yaml overlays
    #[arg(long)]
    pub config_dir: Option<PathBuf>,
}

/// Arguments for the report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Report subcommand
    #[command(subcommand)]
    pub command: ReportCommand,
}

/// Report subcommands
#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    /// Re-render report.html from a report.json
    Render {
        /// Path to report.json
        report: PathBuf,

        /// Output file (default: report.html next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarise every report.json under a results directory
    Summary {
        /// Results directory (reporting.outputDir)
        #[arg(default_value = "test-results")]
        dir: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// Arguments for the check command
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Environment overlay to apply (overrides TEST_ENV)
    #[arg(short, long)]
    pub env: Option<String>,

    /// URL to open instead of baseUrl
    #[arg(long)]
    pub url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

/// Color argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorArg {
    /// Always use colors
    Always,
    /// Auto-detect
    #[default]
    Auto,
    /// Never use colors
    Never,
}

/// Log format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormatArg {
    /// Human readable
    #[default]
    Text,
    /// JSON lines
    Json,
}

impl From<LogFormatArg> for storefront_e2e::LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_config() {
        let cli = Cli::parse_from(["sfe2e", "config", "--env", "ci", "--key", "timeouts"]);
        match cli.command {
            Commands::Config(args) => {
                assert_eq!(args.env.as_deref(), Some("ci"));
                assert_eq!(args.key.as_deref(), Some("timeouts"));
                assert!(args.config_dir.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_report_summary_defaults() {
        let cli = Cli::parse_from(["sfe2e", "-vv", "report", "summary"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Report(ReportArgs {
                command: ReportCommand::Summary { dir, json },
            }) => {
                assert_eq!(dir, PathBuf::from("test-results"));
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_log_format() {
        let cli = Cli::parse_from(["sfe2e", "report", "render", "r.json", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormatArg::Json);
        assert_eq!(
            storefront_e2e::LogFormat::from(cli.log_format),
            storefront_e2e::LogFormat::Json
        );
    }
}
