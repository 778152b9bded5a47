//! `gov_scrape` binary: parse arguments, run one job, print its report.
//!
//! ```sh
//! RUST_LOG=debug gov_scrape --data-dir ./data crime-log
//! ```
//!
//! Exit status is 0 when the job succeeded (including runs that found
//! nothing new) and 1 when it failed.

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

use gov_scrape::cli::Cli;
use gov_scrape::config::Settings;
use gov_scrape::report::{FailureReport, Report};
use gov_scrape::runner;

#[tokio::main]
async fn main() -> ExitCode {
    // --- Tracing init ---
    // stdout is reserved for the JSON report
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let report = match Settings::resolve(&args.global).await {
        Ok(settings) => {
            info!(job = args.command.name(), data_dir = %settings.data_dir.display(), "gov_scrape starting");
            let report = runner::run(&args.command, &settings).await;
            if let Err(e) = report.emit(settings.summary_out.as_deref()).await {
                error!(error = %e, "Failed to emit report");
                return ExitCode::FAILURE;
            }
            report
        }
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            let report = Report::Failure(FailureReport::from_error(args.command.name(), &e));
            if let Err(e) = report.emit(args.global.summary_out.as_deref()).await {
                error!(error = %e, "Failed to emit report");
            }
            report
        }
    };

    let elapsed = start_time.elapsed();
    info!(?elapsed, secs = elapsed.as_secs(), millis = elapsed.subsec_millis(), "Execution complete");

    if report.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
