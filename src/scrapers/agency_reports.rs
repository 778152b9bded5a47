//! WV Legislature agency reports.
//!
//! The report listing is a form: POSTing `report_year=<year>` returns a table
//! whose first and last rows are header/footer chrome. Each remaining row is
//! `agency | title | year` with a link to the report when one was filed.

use futures::stream::{self, StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use super::SourceExtractor;
use crate::error::{ScrapeError, ShapeError};
use crate::http::{Fetch, Request};
use crate::models::{RawRecord, Record, Value};
use crate::utils::element_text;

pub const BASE_URL: &str = "http://www.wvlegislature.gov";
pub const REPORTS_PATH: &str = "/Reports/Agency_Reports/agencylist_all.cfm";
pub const DATASET: &str = "all_reports.csv";
/// First year the listing has data for.
pub const FIRST_YEAR: i32 = 2001;

static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("valid selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("valid selector"));
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgencyReport {
    pub agency: String,
    pub title: String,
    pub year: String,
    pub url: String,
}

impl Record for AgencyReport {
    const KIND: &'static str = "agency_reports";
    const FIELDS: &'static [&'static str] = &["agency", "title", "year", "url"];
    const KEY_FIELDS: &'static [&'static str] = &["url"];

    fn from_raw(raw: &RawRecord) -> Result<Self, ShapeError> {
        Ok(Self {
            agency: raw.required(Self::KIND, "agency")?,
            title: raw.required(Self::KIND, "title")?,
            year: raw.required(Self::KIND, "year")?,
            url: raw.required(Self::KIND, "url")?,
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            self.agency.clone().into(),
            self.title.clone().into(),
            self.year.clone().into(),
            self.url.clone().into(),
        ]
    }
}

/// Parse one year's listing.
pub fn parse_reports(html: &str, base: &str, source: &str) -> Result<Vec<RawRecord>, ScrapeError> {
    let base_url = Url::parse(base).map_err(|e| ScrapeError::Config(format!("bad base URL {base}: {e}")))?;
    let document = Html::parse_document(html);
    let rows: Vec<_> = document.select(&ROW).collect();
    if rows.is_empty() {
        return Err(ScrapeError::parse(source, "no table rows in report listing"));
    }

    let body = match rows.len() {
        0..=2 => &rows[..0],
        n => &rows[1..n - 1],
    };

    let mut reports = Vec::new();
    for row in body {
        let cells: Vec<String> = row.select(&CELL).map(element_text).collect();
        if cells.len() < 3 {
            continue;
        }
        let Some(href) = row.select(&LINK).next().and_then(|a| a.value().attr("href")) else {
            debug!(agency = %cells[0], title = %cells[1], "No report filed; skipping row");
            continue;
        };
        let Ok(url) = base_url.join(href.trim()) else {
            debug!(%href, "Unresolvable report link; skipping row");
            continue;
        };

        reports.push(
            RawRecord::new()
                .with("agency", cells[0].as_str())
                .with("title", cells[1].as_str())
                .with("year", cells[2].as_str())
                .with("url", url.as_str()),
        );
    }
    Ok(reports)
}

/// Extractor covering the years `start..end`.
#[derive(Debug)]
pub struct AgencyReports<'a, F> {
    fetch: &'a F,
    base: String,
    start_year: i32,
    end_year: i32,
}

impl<'a, F: Fetch> AgencyReports<'a, F> {
    pub fn new(fetch: &'a F, start_year: i32, end_year: i32) -> Self {
        Self::with_base(fetch, BASE_URL, start_year, end_year)
    }

    pub fn with_base(fetch: &'a F, base: impl Into<String>, start_year: i32, end_year: i32) -> Self {
        Self {
            fetch,
            base: base.into(),
            start_year,
            end_year,
        }
    }

    fn listing_url(&self) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), REPORTS_PATH)
    }
}

impl<F: Fetch> SourceExtractor for AgencyReports<'_, F> {
    type Record = AgencyReport;

    fn source(&self) -> String {
        self.listing_url()
    }

    #[instrument(level = "info", skip_all, fields(start = self.start_year, end = self.end_year))]
    async fn extract(&self) -> Result<Vec<RawRecord>, ScrapeError> {
        let url = self.listing_url();
        let per_year: Vec<Vec<RawRecord>> = stream::iter(self.start_year..self.end_year)
            .then(|year| {
                let url = url.clone();
                async move {
                    let request = Request::post_form(&url, &[("report_year", year.to_string())]);
                    let html = self.fetch.text(&request).await?;
                    let reports = parse_reports(&html, &self.base, &format!("{url} (report_year={year})"))?;
                    debug!(year, count = reports.len(), "Parsed report listing");
                    Ok::<_, ScrapeError>(reports)
                }
            })
            .try_collect()
            .await?;

        let reports: Vec<RawRecord> = per_year.into_iter().flatten().collect();
        info!(count = reports.len(), "Extracted agency reports");
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::FakeFetch;

    fn listing(rows: &str) -> String {
        format!(
            r#"<html><body><table>
              <tr><th>Agency</th><th>Title</th><th>Year</th></tr>
              {rows}
              <tr><td colspan="3">Footer</td></tr>
            </table></body></html>"#
        )
    }

    const ROWS_2020: &str = r#"
      <tr><td>Auditor</td><td><a href="/Reports/Agency_Reports/auditor_2020.pdf">Annual Report</a></td><td>2020</td></tr>
      <tr><td>Treasury</td><td>Quarterly Report</td><td>2020</td></tr>
      <tr><td>Short row</td></tr>
    "#;

    #[test]
    fn test_parse_skips_chrome_and_unlinked_rows() {
        let raws = parse_reports(&listing(ROWS_2020), BASE_URL, "test").unwrap();
        assert_eq!(raws.len(), 1);
        let report = AgencyReport::from_raw(&raws[0]).unwrap();
        assert_eq!(report.agency, "Auditor");
        assert_eq!(report.title, "Annual Report");
        assert_eq!(report.year, "2020");
        assert_eq!(
            report.url,
            "http://www.wvlegislature.gov/Reports/Agency_Reports/auditor_2020.pdf"
        );
    }

    #[test]
    fn test_page_without_rows_is_parse_error() {
        let err = parse_reports("<html><body>Service unavailable</body></html>", BASE_URL, "test")
            .unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn test_extract_posts_each_year_in_order() {
        let url = "http://leg.test/Reports/Agency_Reports/agencylist_all.cfm";
        let rows_2021 = r#"<tr><td>Auditor</td><td><a href="/r/a2021.pdf">Annual</a></td><td>2021</td></tr>"#;
        let fetch = FakeFetch::new()
            .page(Request::post_form(url, &[("report_year", "2020".to_string())]), &listing(ROWS_2020))
            .page(Request::post_form(url, &[("report_year", "2021".to_string())]), &listing(rows_2021));

        let raws = AgencyReports::with_base(&fetch, "http://leg.test", 2020, 2022)
            .extract()
            .await
            .unwrap();
        let years: Vec<_> = raws.iter().map(|r| r.get("year").unwrap()).collect();
        assert_eq!(years, vec!["2020", "2021"]);
    }

    #[tokio::test]
    async fn test_extract_fails_when_a_year_is_unreachable() {
        let url = "http://leg.test/Reports/Agency_Reports/agencylist_all.cfm";
        let fetch = FakeFetch::new()
            .page(Request::post_form(url, &[("report_year", "2020".to_string())]), &listing(ROWS_2020));
        let err = AgencyReports::with_base(&fetch, "http://leg.test", 2020, 2022)
            .extract()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "fetch");
    }
}
