//! WVU campus crime log.
//!
//! The [crime log](https://police.wvu.edu/clery-act/campus-safety/crime-log)
//! lists each incident as an `li.incident` element:
//!
//! ```html
//! <li class="incident">
//!   <h4>2020-01234: Larceny</h4>
//!   <p>2020</p>
//!   <p><strong>Date/Time Reported:</strong> 10/05/2020 3:15 PM</p>
//!   <p><strong>Building:</strong> Evansdale Library</p>   <!-- optional -->
//!   <p><strong>Address:</strong> 1 Main St</p>
//!   <p><strong>Outcome:</strong> Under investigation</p>
//! </li>
//! ```
//!
//! Paragraphs are matched by their label, not their position, because the
//! building line is only present for some incidents.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};

use super::SourceExtractor;
use crate::error::{ScrapeError, ShapeError};
use crate::http::{Fetch, Request};
use crate::models::{RawRecord, Record, Value};
use crate::utils::{collapse_whitespace, element_text, truncate_for_log};

pub const URL: &str = "https://police.wvu.edu/clery-act/campus-safety/crime-log";
pub const DATASET: &str = "crime_log.csv";

/// Date/time layouts seen in the log, tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y - %I:%M %p",
    "%m/%d/%Y - %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%B %d, %Y %I:%M %p",
    "%B %d, %Y - %I:%M %p",
    "%b %d, %Y %I:%M %p",
    "%A, %B %d, %Y - %I:%M %p",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

static INCIDENT: Lazy<Selector> = Lazy::new(|| Selector::parse("li.incident").expect("valid selector"));
static HEADING: Lazy<Selector> = Lazy::new(|| Selector::parse("h4").expect("valid selector"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("valid selector"));
static LABEL: Lazy<Selector> = Lazy::new(|| Selector::parse("strong").expect("valid selector"));

/// One crime log incident.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Incident {
    /// Case number.
    pub id: String,
    pub title: String,
    pub year: String,
    pub datetime: NaiveDateTime,
    /// Only some incidents name a building.
    pub building: Option<String>,
    pub address: String,
    pub outcome: String,
}

impl Record for Incident {
    const KIND: &'static str = "crime_log";
    const FIELDS: &'static [&'static str] =
        &["id", "title", "year", "datetime", "building", "address", "outcome"];
    const KEY_FIELDS: &'static [&'static str] = &["id"];

    fn from_raw(raw: &RawRecord) -> Result<Self, ShapeError> {
        Ok(Self {
            id: raw.required(Self::KIND, "id")?,
            title: raw.required(Self::KIND, "title")?,
            year: raw.required(Self::KIND, "year")?,
            datetime: raw.datetime(Self::KIND, "datetime", DATETIME_FORMATS)?,
            building: raw.optional("building"),
            address: raw.required(Self::KIND, "address")?,
            outcome: raw.required(Self::KIND, "outcome")?,
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            self.id.clone().into(),
            self.title.clone().into(),
            self.year.clone().into(),
            self.datetime.into(),
            self.building.clone().into(),
            self.address.clone().into(),
            self.outcome.clone().into(),
        ]
    }
}

/// Map a paragraph label like `"Date/Time Reported:"` to a field name.
fn field_for_label(label: &str) -> Option<&'static str> {
    let label = label.trim().trim_end_matches(':').to_lowercase();
    if label.contains("building") {
        Some("building")
    } else if label.contains("address") || label.contains("location") {
        Some("address")
    } else if label.contains("outcome") || label.contains("disposition") {
        Some("outcome")
    } else if label.contains("date") || label.contains("time") {
        Some("datetime")
    } else if label.contains("year") {
        Some("year")
    } else {
        None
    }
}

/// Parse the crime log page into raw incidents.
pub fn parse_incidents(html: &str) -> Result<Vec<RawRecord>, ScrapeError> {
    let document = Html::parse_document(html);
    let mut incidents = Vec::new();

    for element in document.select(&INCIDENT) {
        let mut raw = RawRecord::new();

        if let Some(heading) = element.select(&HEADING).next() {
            let text = element_text(heading);
            match text.split_once(": ") {
                Some((id, title)) => {
                    raw.insert("id", id);
                    raw.insert("title", title);
                }
                None => raw.insert("title", text),
            }
        }

        for p in element.select(&PARAGRAPH) {
            let text = element_text(p);
            let Some(label_el) = p.select(&LABEL).next() else {
                // the unlabelled paragraph carries the year
                if raw.get("year").is_none() && !text.is_empty() {
                    raw.insert("year", text);
                }
                continue;
            };

            let label = element_text(label_el);
            let value = text
                .strip_prefix(label.as_str())
                .unwrap_or(&text)
                .trim_start_matches(':');
            let value = collapse_whitespace(value);

            match field_for_label(&label) {
                Some(field) if raw.get(field).is_none() => raw.insert(field, value),
                Some(_) => {}
                None => debug!(%label, "Ignoring unrecognized crime log label"),
            }
        }

        incidents.push(raw);
    }

    if incidents.is_empty() {
        debug!(preview = %truncate_for_log(html, 300), "Crime log page without incidents");
        return Err(ScrapeError::parse(URL, "no li.incident elements found"));
    }
    Ok(incidents)
}

/// Extractor for the crime log page.
#[derive(Debug)]
pub struct CrimeLog<'a, F> {
    fetch: &'a F,
    url: String,
}

impl<'a, F: Fetch> CrimeLog<'a, F> {
    pub fn new(fetch: &'a F) -> Self {
        Self::with_url(fetch, URL)
    }

    pub fn with_url(fetch: &'a F, url: impl Into<String>) -> Self {
        Self {
            fetch,
            url: url.into(),
        }
    }
}

impl<F: Fetch> SourceExtractor for CrimeLog<'_, F> {
    type Record = Incident;

    fn source(&self) -> String {
        self.url.clone()
    }

    #[instrument(level = "info", skip_all, fields(url = %self.url))]
    async fn extract(&self) -> Result<Vec<RawRecord>, ScrapeError> {
        let html = self.fetch.text(&Request::get(&self.url)).await?;
        let incidents = parse_incidents(&html)?;
        info!(count = incidents.len(), "Extracted crime log incidents");
        Ok(incidents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::FakeFetch;

    const PAGE: &str = r#"
    <html><body><ul>
      <li class="incident">
        <h4>2020-01234: Larceny</h4>
        <p>2020</p>
        <p><strong>Date/Time Reported:</strong> 10/05/2020 3:15 PM</p>
        <p><strong>Building:</strong> Evansdale Library</p>
        <p><strong>Address:</strong> 1 Main   St</p>
        <p><strong>Outcome:</strong> Under investigation</p>
      </li>
      <li class="incident">
        <h4>2020-01235: Vandalism: Graffiti</h4>
        <p>2020</p>
        <p><strong>Date/Time Reported:</strong> 10/06/2020 09:00</p>
        <p><strong>Address:</strong> 2 High St</p>
        <p><strong>Outcome:</strong> Closed</p>
      </li>
      <li class="incident">
        <h4>No case number here</h4>
        <p><strong>Address:</strong> 3 Walnut St</p>
      </li>
    </ul></body></html>
    "#;

    #[test]
    fn test_parse_matches_fields_by_label() {
        let raws = parse_incidents(PAGE).unwrap();
        assert_eq!(raws.len(), 3);

        let first = Incident::from_raw(&raws[0]).unwrap();
        assert_eq!(first.id, "2020-01234");
        assert_eq!(first.title, "Larceny");
        assert_eq!(first.year, "2020");
        assert_eq!(first.building.as_deref(), Some("Evansdale Library"));
        assert_eq!(first.address, "1 Main St");
        assert_eq!(first.outcome, "Under investigation");
        assert_eq!(Value::from(first.datetime).to_cell(), "2020-10-05 15:15:00");
    }

    #[test]
    fn test_missing_building_is_null_and_fields_stay_aligned() {
        let raws = parse_incidents(PAGE).unwrap();
        let second = Incident::from_raw(&raws[1]).unwrap();
        assert_eq!(second.building, None);
        assert_eq!(second.address, "2 High St");
        assert_eq!(second.outcome, "Closed");
        assert_eq!(second.title, "Vandalism: Graffiti");
        assert_eq!(second.to_row()[4], Value::Null);
    }

    #[test]
    fn test_incomplete_incident_fails_shape_check() {
        let raws = parse_incidents(PAGE).unwrap();
        let err = Incident::from_raw(&raws[2]).unwrap_err();
        assert_eq!(err.field, "id");
    }

    #[test]
    fn test_page_without_incidents_is_parse_error() {
        let err = parse_incidents("<html><body><p>Maintenance</p></body></html>").unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(field_for_label("Building:"), Some("building"));
        assert_eq!(field_for_label("Date/Time Reported:"), Some("datetime"));
        assert_eq!(field_for_label("Location"), Some("address"));
        assert_eq!(field_for_label("Disposition:"), Some("outcome"));
        assert_eq!(field_for_label("Officer:"), None);
    }

    #[tokio::test]
    async fn test_extract_fetches_configured_url() {
        let fetch = FakeFetch::new().page(Request::get("http://log.test"), PAGE);
        let extractor = CrimeLog::with_url(&fetch, "http://log.test");
        let raws = extractor.extract().await.unwrap();
        assert_eq!(raws.len(), 3);
        assert_eq!(extractor.source(), "http://log.test");
    }

    #[tokio::test]
    async fn test_extract_surfaces_fetch_error() {
        let fetch = FakeFetch::new();
        let err = CrimeLog::with_url(&fetch, "http://down.test").extract().await.unwrap_err();
        assert_eq!(err.kind(), "fetch");
    }
}
