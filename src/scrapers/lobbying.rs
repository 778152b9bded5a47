//! WV Ethics Commission lobbying filings.
//!
//! Each registration cycle has a page linking to the filed PDFs. Filing
//! links live under `SiteCollectionDocuments` and encode the period and the
//! lobbyist name in their path:
//!
//! ```text
//! /SiteCollectionDocuments/Lobbyist/Reports/2021-2022/Jane%20Doe%202021-2022.pdf
//!                                           ^ period  ^ name + period
//! ```

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{info, instrument, warn};
use url::Url;

use super::SourceExtractor;
use crate::error::{ScrapeError, ShapeError};
use crate::http::{Fetch, Request};
use crate::models::{RawRecord, Record, Value};
use crate::utils::collapse_whitespace;

pub const BASE_URL: &str = "https://ethics.wv.gov";
pub const DATASET: &str = "lobbying_filings.csv";

static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));

/// One filed lobbying report.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filing {
    pub name: String,
    pub period: String,
    /// Link to the PDF; also the natural key.
    pub url: String,
}

impl Filing {
    /// File name the PDF is cached under: the last URL path segment.
    pub fn file_name(&self) -> Option<String> {
        let parsed = Url::parse(&self.url).ok()?;
        let last = parsed.path_segments()?.next_back()?;
        (!last.is_empty()).then(|| last.to_string())
    }
}

impl Record for Filing {
    const KIND: &'static str = "lobbying_filings";
    const FIELDS: &'static [&'static str] = &["name", "period", "url"];
    const KEY_FIELDS: &'static [&'static str] = &["url"];

    fn from_raw(raw: &RawRecord) -> Result<Self, ShapeError> {
        Ok(Self {
            name: raw.required(Self::KIND, "name")?,
            period: raw.required(Self::KIND, "period")?,
            url: raw.required(Self::KIND, "url")?,
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            self.name.clone().into(),
            self.period.clone().into(),
            self.url.clone().into(),
        ]
    }
}

/// URL of the listing page for a registration cycle such as `2021-2022`.
pub fn cycle_url(base: &str, cycle: &str) -> String {
    let base = base.trim_end_matches('/');
    if cycle == "2019-2020" {
        format!("{base}/lobbyist/Pages/{cycle}.aspx")
    } else {
        format!("{base}/lobbyist/Pages/{cycle}-Registration-Cycle.aspx")
    }
}

/// Turn one filing link into a raw record. Links that do not follow the
/// expected layout keep only their URL and are rejected by the record model.
fn parse_filing_link(base: &Url, href: &str) -> RawRecord {
    let Ok(url) = base.join(href) else {
        return RawRecord::new();
    };
    let mut raw = RawRecord::new().with("url", url.as_str());

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();
    if segments.len() < 5 {
        warn!(%href, "Unexpected filing link layout");
        return raw;
    }

    let period = segments[3];
    let stem = segments[4].split('.').next().unwrap_or_default();
    let decoded = urlencoding::decode(stem)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| stem.to_string());
    let name = collapse_whitespace(&decoded.replace(period, "")).to_uppercase();

    raw.insert("period", period);
    raw.insert("name", name);
    raw
}

/// Parse a cycle listing page into raw filings.
pub fn parse_filings(html: &str, base: &str) -> Result<Vec<RawRecord>, ScrapeError> {
    let base_url = Url::parse(base).map_err(|e| ScrapeError::Config(format!("bad base URL {base}: {e}")))?;
    let document = Html::parse_document(html);

    let filings: Vec<RawRecord> = document
        .select(&LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.contains("SiteCollectionDocuments"))
        .map(|href| parse_filing_link(&base_url, href.trim()))
        .collect();

    if filings.is_empty() {
        warn!("Cycle page lists no filings");
    }
    Ok(filings)
}

/// Extractor for one registration cycle.
#[derive(Debug)]
pub struct LobbyingFilings<'a, F> {
    fetch: &'a F,
    base: String,
    cycle: String,
}

impl<'a, F: Fetch> LobbyingFilings<'a, F> {
    pub fn new(fetch: &'a F, cycle: impl Into<String>) -> Self {
        Self::with_base(fetch, BASE_URL, cycle)
    }

    pub fn with_base(fetch: &'a F, base: impl Into<String>, cycle: impl Into<String>) -> Self {
        Self {
            fetch,
            base: base.into(),
            cycle: cycle.into(),
        }
    }
}

impl<F: Fetch> SourceExtractor for LobbyingFilings<'_, F> {
    type Record = Filing;

    fn source(&self) -> String {
        cycle_url(&self.base, &self.cycle)
    }

    #[instrument(level = "info", skip_all, fields(cycle = %self.cycle))]
    async fn extract(&self) -> Result<Vec<RawRecord>, ScrapeError> {
        let url = self.source();
        let html = self.fetch.text(&Request::get(&url)).await?;
        let filings = parse_filings(&html, &self.base)?;
        info!(count = filings.len(), %url, "Extracted lobbying filings");
        Ok(filings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::FakeFetch;

    const PAGE: &str = r#"
    <html><body>
      <a href="/lobbyist/Pages/Home.aspx">Home</a>
      <a href="/SiteCollectionDocuments/Lobbyist/Reports/2021-2022/Jane%20Doe%202021-2022.pdf">Jane Doe</a>
      <a href="/SiteCollectionDocuments/Lobbyist/Reports/2021-2022/acme%20corp.pdf">Acme</a>
      <a href="/SiteCollectionDocuments/stray.pdf">Stray</a>
    </body></html>
    "#;

    #[test]
    fn test_cycle_url_special_cases_2019() {
        assert_eq!(
            cycle_url("https://ethics.wv.gov/", "2019-2020"),
            "https://ethics.wv.gov/lobbyist/Pages/2019-2020.aspx"
        );
        assert_eq!(
            cycle_url("https://ethics.wv.gov", "2021-2022"),
            "https://ethics.wv.gov/lobbyist/Pages/2021-2022-Registration-Cycle.aspx"
        );
    }

    #[test]
    fn test_parse_filings_extracts_name_and_period() {
        let raws = parse_filings(PAGE, BASE_URL).unwrap();
        assert_eq!(raws.len(), 3);

        let jane = Filing::from_raw(&raws[0]).unwrap();
        assert_eq!(jane.name, "JANE DOE");
        assert_eq!(jane.period, "2021-2022");
        assert_eq!(
            jane.url,
            "https://ethics.wv.gov/SiteCollectionDocuments/Lobbyist/Reports/2021-2022/Jane%20Doe%202021-2022.pdf"
        );
        assert_eq!(jane.file_name().as_deref(), Some("Jane%20Doe%202021-2022.pdf"));

        let acme = Filing::from_raw(&raws[1]).unwrap();
        assert_eq!(acme.name, "ACME CORP");
    }

    #[test]
    fn test_short_link_is_rejected_by_record_model() {
        let raws = parse_filings(PAGE, BASE_URL).unwrap();
        assert!(raws[2].get("url").is_some());
        let err = Filing::from_raw(&raws[2]).unwrap_err();
        assert_eq!(err.field, "name");
    }

    #[tokio::test]
    async fn test_extract_uses_cycle_page() {
        let fetch = FakeFetch::new().page(
            Request::get("http://ethics.test/lobbyist/Pages/2023-2024-Registration-Cycle.aspx"),
            PAGE,
        );
        let raws = LobbyingFilings::with_base(&fetch, "http://ethics.test", "2023-2024")
            .extract()
            .await
            .unwrap();
        assert_eq!(raws.len(), 3);
        assert!(raws[0].get("url").unwrap().starts_with("http://ethics.test/"));
    }
}
