//! sfe2e: Storefront E2E command line
//!
//! ```bash
//! sfe2e config --env ci
//! sfe2e report summary test-results --json
//! ```

use clap::Parser;
use std::process::ExitCode;
use storefront_e2e::init_tracing;
use storefront_e2e_cli::{handlers, Cli, CliResult, Commands, ReportCommand};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    if !cli.quiet {
        let _ = init_tracing(cli.log_format.into(), cli.verbose);
    }
    let use_color = cli.color.should_color();

    match cli.command {
        Commands::Config(args) => {
            println!("{}", handlers::execute_config(&args)?);
            Ok(())
        }
        Commands::Report(args) => match args.command {
            ReportCommand::Render { report, output } => {
                let html = handlers::render_report(&report, output.as_deref())?;
                if !cli.quiet {
                    println!("Wrote {}", html.display());
                }
                Ok(())
            }
            ReportCommand::Summary { dir, json } => {
                let rows = handlers::collect_reports(&dir)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else {
                    print!("{}", handlers::render_summary_table(&rows, use_color));
                }
                Ok(())
            }
        },
        Commands::Check(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            println!("{}", runtime.block_on(handlers::execute_check(&args))?);
            Ok(())
        }
    }
}
