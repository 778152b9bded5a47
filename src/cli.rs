//! Command-line interface definitions.
//!
//! One subcommand per job plus two maintenance commands. Global options
//! override the values in the optional YAML config file.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::scrapers::agency_reports::FIRST_YEAR;

static CYCLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{4}$").expect("valid regex"));

/// Incrementally scrape public-records sites into append-only CSV datasets.
///
/// # Examples
///
/// ```sh
/// # Crime log into ./data/crime_log.csv
/// gov_scrape --data-dir ./data crime-log
///
/// # Lobbying filings for one registration cycle
/// gov_scrape lobbying 2021-2022
///
/// # Agency reports for 2015 through 2020, saving this run's additions
/// gov_scrape agency-reports --start-year 2015 --end-year 2021 --new-out new_reports.csv
///
/// # Board of Review decisions from a downloaded report
/// gov_scrape board-of-review --year 2020 "FY 2020 Report by Category and Decision.pdf"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Optional path to a YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the datasets
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Retries for failed fetches
    #[arg(long, global = true)]
    pub retries: Option<usize>,

    /// Also write the JSON report to this file
    #[arg(long, global = true)]
    pub summary_out: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// WVU campus crime log
    CrimeLog,

    /// WV Secretary of State meeting notices
    MeetingNotices,

    /// WV Ethics Commission lobbying filings for one registration cycle
    Lobbying {
        /// Registration cycle, e.g. 2021-2022
        #[arg(value_parser = parse_cycle)]
        cycle: String,
    },

    /// WV Legislature agency reports for a range of years
    AgencyReports {
        /// First year to fetch
        #[arg(long, default_value_t = FIRST_YEAR)]
        start_year: i32,

        /// Year to stop before [default: next year]
        #[arg(long)]
        end_year: Option<i32>,

        /// Also write only this run's new reports to this file
        #[arg(long)]
        new_out: Option<PathBuf>,
    },

    /// WVU Morgantown daily COVID-19 test results
    CovidTests,

    /// WV DHHR Board of Review decisions from one fiscal year's PDF report
    BoardOfReview {
        /// Fiscal year the report covers; 2015 and earlier use the older columns
        #[arg(long)]
        year: i32,

        /// Path or http(s) URL of the report PDF
        report: String,
    },

    /// Rewrite a dataset in canonical form
    Normalize {
        #[arg(value_enum)]
        dataset: DatasetKind,
    },

    /// Cache the PDFs linked from the lobbying dataset
    DownloadPdfs {
        /// Where to store the PDFs [default: <data-dir>/pdfs]
        #[arg(long)]
        asset_dir: Option<PathBuf>,
    },
}

/// Datasets the maintenance commands accept.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    CrimeLog,
    MeetingNotices,
    Lobbying,
    AgencyReports,
    CovidTests,
}

fn parse_cycle(s: &str) -> Result<String, String> {
    if !CYCLE.is_match(s) {
        return Err(format!("expected a cycle like 2021-2022, got '{s}'"));
    }
    let (start, end) = s.split_once('-').unwrap_or_default();
    match (start.parse::<i32>(), end.parse::<i32>()) {
        (Ok(a), Ok(b)) if b == a + 1 => Ok(s.to_string()),
        _ => Err(format!("cycle '{s}' must span two consecutive years")),
    }
}
