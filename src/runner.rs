//! Job dispatch: turns a parsed [`Command`] into a pipeline run (or a
//! maintenance task) and its [`Report`].
//!
//! The extractor is picked here, once, from the subcommand; everything
//! downstream is generic over [`SourceExtractor`].

use std::io;
use std::path::Path;

use chrono::{Datelike, Local};
use tracing::{error, info, instrument};

use crate::assets::download_all;
use crate::cli::{Command, DatasetKind};
use crate::config::Settings;
use crate::error::ScrapeError;
use crate::http::{HttpFetcher, RetryFetch};
use crate::models::Record;
use crate::pipeline::{Pipeline, RunOutcome};
use crate::report::{FailureReport, Report};
use crate::scrapers::agency_reports::{self, AgencyReport, AgencyReports};
use crate::scrapers::board_of_review::{self, BoardOfReview, Current, Layout, Pre2016};
use crate::scrapers::covid_tests::{self, CovidTests, TestDay};
use crate::scrapers::crime_log::{self, CrimeLog, Incident};
use crate::scrapers::lobbying::{self, Filing, LobbyingFilings};
use crate::scrapers::meeting_notices::{self, MeetingNotice, MeetingNotices};
use crate::scrapers::SourceExtractor;
use crate::store::Store;

type Fetcher = RetryFetch<HttpFetcher>;

impl Command {
    /// Job name used in failure reports raised before a pipeline exists.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CrimeLog => Incident::KIND,
            Command::MeetingNotices => MeetingNotice::KIND,
            Command::Lobbying { .. } => Filing::KIND,
            Command::AgencyReports { .. } => AgencyReport::KIND,
            Command::CovidTests => TestDay::KIND,
            Command::BoardOfReview { .. } => Current::KIND,
            Command::Normalize { .. } => "normalize",
            Command::DownloadPdfs { .. } => "download_pdfs",
        }
    }
}

fn dataset_file(kind: DatasetKind) -> &'static str {
    match kind {
        DatasetKind::CrimeLog => crime_log::DATASET,
        DatasetKind::MeetingNotices => meeting_notices::DATASET,
        DatasetKind::Lobbying => lobbying::DATASET,
        DatasetKind::AgencyReports => agency_reports::DATASET,
        DatasetKind::CovidTests => covid_tests::DATASET,
    }
}

fn build_fetcher(settings: &Settings) -> Result<Fetcher, ScrapeError> {
    let http = HttpFetcher::new(settings.timeout, settings.user_agent.as_deref())?;
    Ok(RetryFetch::new(http, settings.retries, settings.retry_base_delay))
}

/// Execute `command` and describe the outcome. Never panics on job failure;
/// failures come back as [`Report::Failure`].
#[instrument(level = "info", skip_all, fields(job = command.name()))]
pub async fn run(command: &Command, settings: &Settings) -> Report {
    match dispatch(command, settings).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Job failed before the pipeline ran");
            Report::Failure(FailureReport::from_error(command.name(), &e))
        }
    }
}

async fn dispatch(command: &Command, settings: &Settings) -> Result<Report, ScrapeError> {
    let report = match command {
        Command::CrimeLog => {
            let fetch = build_fetcher(settings)?;
            let path = settings.dataset_path(crime_log::DATASET);
            run_pipeline(CrimeLog::new(&fetch), &path).await.0
        }
        Command::MeetingNotices => {
            let fetch = build_fetcher(settings)?;
            let path = settings.dataset_path(meeting_notices::DATASET);
            run_pipeline(MeetingNotices::new(&fetch), &path).await.0
        }
        Command::Lobbying { cycle } => {
            let fetch = build_fetcher(settings)?;
            let path = settings.dataset_path(lobbying::DATASET);
            run_pipeline(LobbyingFilings::new(&fetch, cycle.as_str()), &path).await.0
        }
        Command::AgencyReports {
            start_year,
            end_year,
            new_out,
        } => {
            let end_year = end_year.unwrap_or_else(|| Local::now().year() + 1);
            if end_year <= *start_year {
                return Err(ScrapeError::Config(format!(
                    "end year {end_year} must be after start year {start_year}"
                )));
            }
            let fetch = build_fetcher(settings)?;
            let path = settings.dataset_path(agency_reports::DATASET);
            let (report, outcome) =
                run_pipeline(AgencyReports::new(&fetch, *start_year, end_year), &path).await;
            match (outcome, new_out) {
                (Some(outcome), Some(out)) => write_new_out(report, &outcome, out),
                _ => report,
            }
        }
        Command::CovidTests => {
            let fetch = build_fetcher(settings)?;
            let path = settings.dataset_path(covid_tests::DATASET);
            run_pipeline(CovidTests::new(&fetch), &path).await.0
        }
        Command::BoardOfReview { year, report } => {
            let fetch = build_fetcher(settings)?;
            let path = settings.dataset_path(&board_of_review::dataset_file(*year));
            if board_of_review::uses_pre2016_layout(*year) {
                run_pipeline(BoardOfReview::<_, Pre2016>::new(&fetch, *year, report.as_str()), &path)
                    .await
                    .0
            } else {
                run_pipeline(BoardOfReview::<_, Current>::new(&fetch, *year, report.as_str()), &path)
                    .await
                    .0
            }
        }
        Command::Normalize { dataset } => {
            let path = settings.dataset_path(dataset_file(*dataset));
            match dataset {
                DatasetKind::CrimeLog => normalize::<Incident>(&path)?,
                DatasetKind::MeetingNotices => normalize::<MeetingNotice>(&path)?,
                DatasetKind::Lobbying => normalize::<Filing>(&path)?,
                DatasetKind::AgencyReports => normalize::<AgencyReport>(&path)?,
                DatasetKind::CovidTests => normalize::<TestDay>(&path)?,
            }
        }
        Command::DownloadPdfs { asset_dir } => {
            let fetch = build_fetcher(settings)?;
            let filings = Store::<Filing>::new(settings.dataset_path(lobbying::DATASET)).load_all()?;
            let dir = asset_dir.as_deref().unwrap_or(settings.asset_dir.as_path());
            Report::Assets(download_all(&fetch, &filings, dir).await?)
        }
    };
    Ok(report)
}

/// Run one pipeline against the dataset at `path`.
pub async fn run_pipeline<E: SourceExtractor>(
    extractor: E,
    path: &Path,
) -> (Report, Option<RunOutcome<E::Record>>) {
    let pipeline = Pipeline::new(extractor, Store::new(path));
    match pipeline.run().await {
        Ok(outcome) => (Report::Success(outcome.summary.clone()), Some(outcome)),
        Err(failure) => {
            error!(stage = failure.stage.as_str(), error = %failure.error, "Run failed");
            (Report::Failure(FailureReport::from(&failure)), None)
        }
    }
}

/// Write this run's new agency reports to a side file.
///
/// The dataset append has already happened by now, so a failure here is
/// attached to the success report as a warning instead of failing the run.
fn write_new_out(report: Report, outcome: &RunOutcome<AgencyReport>, out: &Path) -> Report {
    match Store::<AgencyReport>::new(out).rewrite(&outcome.appended) {
        Ok(()) => {
            info!(path = %out.display(), rows = outcome.appended.len(), "Wrote new reports file");
            report
        }
        Err(e) => {
            error!(path = %out.display(), error = %e, "Failed to write new reports file");
            match report {
                Report::Success(mut summary) => {
                    summary.warnings.push(format!("--new-out not written: {e}"));
                    Report::Success(summary)
                }
                other => other,
            }
        }
    }
}

/// Rewrite a dataset in canonical form, under its lock.
pub fn normalize<R: Record>(path: &Path) -> Result<Report, ScrapeError> {
    let store = Store::<R>::new(path);
    let _lock = store.lock()?;
    if !store.exists() {
        return Err(ScrapeError::io(
            path,
            io::Error::new(io::ErrorKind::NotFound, "dataset does not exist"),
        ));
    }
    let records = store.load_all()?;
    store.rewrite(&records)?;
    info!(kind = R::KIND, rows = records.len(), "Normalized dataset");
    Ok(Report::Normalized {
        kind: R::KIND,
        dataset: path.display().to_string(),
        rows: records.len(),
    })
}
