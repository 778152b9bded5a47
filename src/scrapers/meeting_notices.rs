//! WV Secretary of State meeting notices.
//!
//! The index page holds a `#tableResults` table of links such as
//! `<a href="view.aspx?id=12345">10/05/2020 -- 10:00 AM</a>`. Each link
//! leads to a detail page with the agency in a `th > h2` heading (subagency
//! lines in `<em>`) and location, purpose and notes in `td` cells.

use futures::stream::{self, StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::SourceExtractor;
use crate::error::{ScrapeError, ShapeError};
use crate::http::{Fetch, Request};
use crate::models::{RawRecord, Record, Value};
use crate::utils::{collapse_whitespace, element_text, truncate_for_log};

pub const BASE_URL: &str = "http://apps.sos.wv.gov/adlaw/meetingnotices/";
pub const DATASET: &str = "meeting_notices.csv";

static RESULTS_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table#tableResults a[href]").expect("valid selector"));
static RESULTS_TABLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table#tableResults").expect("valid selector"));
static HEADER_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th").expect("valid selector"));
static AGENCY_HEADING: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").expect("valid selector"));
static SUBAGENCY: Lazy<Selector> = Lazy::new(|| Selector::parse("em").expect("valid selector"));
static DETAIL_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("valid selector"));
static PREFORMATTED: Lazy<Selector> = Lazy::new(|| Selector::parse("pre").expect("valid selector"));

/// A public meeting notice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeetingNotice {
    pub id: String,
    pub date: String,
    pub time: String,
    pub agency: String,
    pub subagency: Option<String>,
    pub location: String,
    pub purpose: String,
    pub notes: Option<String>,
}

impl Record for MeetingNotice {
    const KIND: &'static str = "meeting_notices";
    const FIELDS: &'static [&'static str] =
        &["id", "date", "time", "agency", "subagency", "location", "purpose", "notes"];
    const KEY_FIELDS: &'static [&'static str] = &["id"];

    fn from_raw(raw: &RawRecord) -> Result<Self, ShapeError> {
        Ok(Self {
            id: raw.required(Self::KIND, "id")?,
            date: raw.required(Self::KIND, "date")?,
            time: raw.required(Self::KIND, "time")?,
            agency: raw.required(Self::KIND, "agency")?,
            subagency: raw.optional("subagency"),
            location: raw.required(Self::KIND, "location")?,
            purpose: raw.required(Self::KIND, "purpose")?,
            notes: raw.optional("notes"),
        })
    }

    fn to_row(&self) -> Vec<Value> {
        vec![
            self.id.clone().into(),
            self.date.clone().into(),
            self.time.clone().into(),
            self.agency.clone().into(),
            self.subagency.clone().into(),
            self.location.clone().into(),
            self.purpose.clone().into(),
            self.notes.clone().into(),
        ]
    }
}

/// A link from the index page, before its detail page is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeLink {
    pub url: String,
    pub id: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

/// Parse the index page into notice links.
pub fn parse_index(html: &str, base: &str) -> Result<Vec<NoticeLink>, ScrapeError> {
    let base_url = Url::parse(base).map_err(|e| ScrapeError::Config(format!("bad base URL {base}: {e}")))?;
    let document = Html::parse_document(html);
    if document.select(&RESULTS_TABLE).next().is_none() {
        debug!(preview = %truncate_for_log(html, 300), "Index page without results table");
        return Err(ScrapeError::parse(base, "could not find #tableResults"));
    }

    let mut links = Vec::new();
    for a in document.select(&RESULTS_LINK) {
        let Some(href) = a.value().attr("href") else { continue };
        let Ok(url) = base_url.join(href.trim()) else {
            warn!(%href, "Unresolvable notice link");
            continue;
        };
        let id = url
            .query()
            .and_then(|q| q.split_once('='))
            .map(|(_, v)| v.split('&').next().unwrap_or(v).to_string());

        let text = element_text(a);
        let (date, time) = match text.split_once(" -- ") {
            Some((d, t)) => (Some(d.trim().to_string()), Some(t.trim().to_string())),
            None => (None, None),
        };

        links.push(NoticeLink {
            url: url.to_string(),
            id,
            date,
            time,
        });
    }
    Ok(links)
}

/// Text of the heading before its first `<br>`.
fn leading_text(heading: ElementRef<'_>) -> String {
    let mut out = String::new();
    for child in heading.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) if e.name() == "br" => break,
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    out.push_str(&el.text().collect::<String>());
                }
            }
            _ => {}
        }
    }
    collapse_whitespace(&out)
}

const PURPOSE_LABEL: &str = "Purpose:";
const NOTES_LABEL: &str = "Notes:";

/// Fill `raw` with the fields found on a notice's detail page.
///
/// Purpose and notes are matched by their label, wherever their cells sit.
/// The location is the cell holding a `<pre>` block, or failing that the
/// first unlabelled cell after the date cell.
pub fn parse_detail(html: &str, raw: &mut RawRecord) {
    let document = Html::parse_document(html);

    if let Some(th) = document.select(&HEADER_CELL).next() {
        match th.select(&AGENCY_HEADING).next() {
            Some(h2) => {
                raw.insert("agency", leading_text(h2));
                let subagencies: Vec<String> = h2.select(&SUBAGENCY).map(element_text).collect();
                if !subagencies.is_empty() {
                    raw.insert("subagency", subagencies.join(" "));
                }
            }
            None => raw.insert("agency", element_text(th)),
        }
    }

    let mut preformatted = None;
    let mut unlabelled = None;
    for (i, cell) in document.select(&DETAIL_CELL).enumerate() {
        let text = element_text(cell);
        if let Some(purpose) = text.strip_prefix(PURPOSE_LABEL) {
            raw.insert("purpose", purpose.trim());
        } else if let Some(notes) = text.strip_prefix(NOTES_LABEL) {
            raw.insert("notes", notes.trim());
        } else if let Some(pre) = cell.select(&PREFORMATTED).next() {
            preformatted.get_or_insert_with(|| element_text(pre));
        } else if i > 0 && !text.is_empty() {
            unlabelled.get_or_insert(text);
        }
    }

    match preformatted.or(unlabelled) {
        Some(location) => raw.insert("location", location),
        None => warn!("Notice detail page has no location cell"),
    }
}

/// Extractor for the meeting notice index and its detail pages.
#[derive(Debug)]
pub struct MeetingNotices<'a, F> {
    fetch: &'a F,
    base: String,
}

impl<'a, F: Fetch> MeetingNotices<'a, F> {
    pub fn new(fetch: &'a F) -> Self {
        Self::with_base(fetch, BASE_URL)
    }

    pub fn with_base(fetch: &'a F, base: impl Into<String>) -> Self {
        Self {
            fetch,
            base: base.into(),
        }
    }

    async fn fetch_notice(&self, link: NoticeLink) -> Result<RawRecord, ScrapeError> {
        let mut raw = RawRecord::new();
        for (field, value) in [("id", link.id), ("date", link.date), ("time", link.time)] {
            if let Some(v) = value {
                raw.insert(field, v);
            }
        }
        let html = self.fetch.text(&Request::get(&link.url)).await?;
        parse_detail(&html, &mut raw);
        debug!(url = %link.url, fields = raw.len(), "Parsed notice detail");
        Ok(raw)
    }
}

impl<F: Fetch> SourceExtractor for MeetingNotices<'_, F> {
    type Record = MeetingNotice;

    fn source(&self) -> String {
        self.base.clone()
    }

    #[instrument(level = "info", skip_all, fields(url = %self.base))]
    async fn extract(&self) -> Result<Vec<RawRecord>, ScrapeError> {
        let index = self.fetch.text(&Request::get(&self.base)).await?;
        let links = parse_index(&index, &self.base)?;
        info!(count = links.len(), "Indexed meeting notice links");

        let notices: Vec<RawRecord> = stream::iter(links)
            .then(|link| self.fetch_notice(link))
            .try_collect()
            .await?;

        info!(count = notices.len(), "Extracted meeting notices");
        Ok(notices)
    }
}
