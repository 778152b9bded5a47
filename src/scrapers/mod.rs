//! Source extractors, one per public-records site.
//!
//! Each submodule owns a record kind and an extractor for it. Extractors
//! fetch and parse; they never deduplicate or persist. Parsing is split into
//! pure `parse_*` functions over a response body so it can be tested against
//! fixture markup.
//!
//! # Supported Sources
//!
//! | Job | Module | Method | Natural key |
//! |-----|--------|--------|-------------|
//! | WVU campus crime log | [`crime_log`] | HTML list | case number |
//! | WV SoS meeting notices | [`meeting_notices`] | HTML table + detail pages | notice id |
//! | WV Ethics lobbying filings | [`lobbying`] | HTML links to PDFs | document URL |
//! | WV Legislature agency reports | [`agency_reports`] | form POST per year | report URL |
//! | WVU Morgantown COVID tests | [`covid_tests`] | HTML table | date |
//! | WV DHHR Board of Review | [`board_of_review`] | PDF table per year | year + category |

use crate::error::ScrapeError;
use crate::models::{RawRecord, Record};

pub mod agency_reports;
pub mod board_of_review;
pub mod crime_log;
pub mod lobbying;
pub mod meeting_notices;

/// Fetch-and-parse capability for one data source.
// runs on one task; callers never need the futures to be Send
#[allow(async_fn_in_trait)]
pub trait SourceExtractor {
    type Record: Record;

    /// Where the records come from, for logs and failure reports.
    fn source(&self) -> String;

    /// Produce the current extraction batch.
    ///
    /// Fails with [`ScrapeError::Fetch`] when the source is unreachable and
    /// [`ScrapeError::Parse`] when its structure is not recognized.
    async fn extract(&self) -> Result<Vec<RawRecord>, ScrapeError>;
}
