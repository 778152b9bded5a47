//! WV DHHR Board of Review decisions by category.
//!
//! Each fiscal year is published as a PDF report with one table: a category
//! per row followed by the count columns. Reports up to 2015 split the
//! withdrawn count in two, so those years use the [`Pre2016`] layout and the
//! rest use [`Current`]. Every year gets its own dataset file.
//!
//! The PDF can be a local file or an `http(s)` URL.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use tracing::{debug, info, instrument};

use super::SourceExtractor;
use crate::error::{ScrapeError, ShapeError};
use crate::http::{Fetch, Request};
use crate::models::{RawRecord, Record, Value};
use crate::utils::truncate_for_log;

/// First fiscal year published with the [`Current`] layout.
pub const FIRST_CURRENT_LAYOUT_YEAR: i32 = 2016;

/// Fields before the count columns.
const LEADING_FIELDS: usize = 2;

pub fn dataset_file(year: i32) -> String {
    format!("board_of_review_{year}.csv")
}

pub fn uses_pre2016_layout(year: i32) -> bool {
    year < FIRST_CURRENT_LAYOUT_YEAR
}

/// Column layout of one generation of reports.
pub trait Layout: Clone + Eq + Hash + fmt::Debug {
    const KIND: &'static str;
    /// `year`, `categories`, then the count columns in table order.
    const FIELDS: &'static [&'static str];

    fn count_fields() -> &'static [&'static str] {
        &Self::FIELDS[LEADING_FIELDS..]
    }
}

/// Reports from 2016 on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Current;

impl Layout for Current {
    const KIND: &'static str = "board_of_review";
    const FIELDS: &'static [&'static str] = &[
        "year",
        "categories",
        "total_received",
        "total_adjudicated",
        "upheld",
        "reversed",
        "total_written",
        "abandoned",
        "withdrawn",
        "dismissed",
        "remanded",
        "invalid",
    ];
}

/// Reports up to 2015.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pre2016;

impl Layout for Pre2016 {
    const KIND: &'static str = "board_of_review_pre2016";
    const FIELDS: &'static [&'static str] = &[
        "year",
        "categories",
        "total_received",
        "total_adjudicated",
        "upheld",
        "reversed",
        "total_written",
        "abandoned",
        "withdrawn_claimant_favor",
        "withdrawn_no_change",
        "dismissed",
        "remanded",
        "invalid",
    ];
}

/// Decisions for one category in one fiscal year.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decision<L> {
    pub year: i64,
    pub category: String,
    /// One entry per [`Layout::count_fields`]; `None` where the cell was empty.
    pub counts: Vec<Option<i64>>,
    layout: PhantomData<L>,
}

impl<L: Layout> Decision<L> {
    /// The count in column `field`, if the layout has it and it was filled.
    pub fn count(&self, field: &str) -> Option<i64> {
        L::count_fields()
            .iter()
            .position(|f| *f == field)
            .and_then(|i| self.counts.get(i).copied().flatten())
    }
}

impl<L: Layout> Record for Decision<L> {
    const KIND: &'static str = L::KIND;
    const FIELDS: &'static [&'static str] = L::FIELDS;
    const KEY_FIELDS: &'static [&'static str] = &["year", "categories"];

    fn from_raw(raw: &RawRecord) -> Result<Self, ShapeError> {
        let counts = L::count_fields()
            .iter()
            .map(|field| raw.optional_integer(L::KIND, field))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            year: raw.integer(L::KIND, "year")?,
            category: raw.required(L::KIND, "categories")?,
            counts,
            layout: PhantomData,
        })
    }

    fn to_row(&self) -> Vec<Value> {
        let mut row = vec![self.year.into(), self.category.clone().into()];
        row.extend(self.counts.iter().map(|c| Value::from(*c)));
        row
    }
}

fn is_count(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '%' | '$' | '(' | ')'))
}

/// Pull table rows out of a report's extracted text.
///
/// A row is a line ending in exactly as many count tokens as the layout has
/// columns, after a category label. Counts keep only their digits. Title,
/// header and total lines are skipped.
pub fn parse_report_text<L: Layout>(text: &str, year: i32) -> Vec<RawRecord> {
    let columns = L::count_fields();
    let mut rows = Vec::new();

    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let trailing = tokens.iter().rev().take_while(|t| is_count(t)).count();
        if trailing < columns.len() || tokens.len() == columns.len() {
            continue;
        }

        let split = tokens.len() - columns.len();
        let category = tokens[..split].join(" ");
        if !category.chars().any(char::is_alphabetic) {
            continue;
        }
        if category.to_ascii_lowercase().starts_with("total") {
            debug!(%category, "Skipping totals row");
            continue;
        }

        let mut raw = RawRecord::new()
            .with("year", year.to_string())
            .with("categories", category);
        for (field, token) in columns.iter().zip(&tokens[split..]) {
            let digits: String = token.chars().filter(char::is_ascii_digit).collect();
            if !digits.is_empty() {
                raw.insert(field, digits);
            }
        }
        rows.push(raw);
    }
    rows
}

/// Text content of a PDF document.
pub fn pdf_text(bytes: &[u8], source: &str) -> Result<String, ScrapeError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ScrapeError::parse(source, format!("unreadable PDF: {e}")))
}

/// Extractor for one fiscal year's report.
#[derive(Debug)]
pub struct BoardOfReview<'a, F, L> {
    fetch: &'a F,
    year: i32,
    report: String,
    layout: PhantomData<L>,
}

impl<'a, F: Fetch, L: Layout> BoardOfReview<'a, F, L> {
    /// # Arguments
    ///
    /// * `fetch` - Used only when `report` is a URL
    /// * `year` - Fiscal year the report covers
    /// * `report` - Path or `http(s)` URL of the PDF
    pub fn new(fetch: &'a F, year: i32, report: impl Into<String>) -> Self {
        Self {
            fetch,
            year,
            report: report.into(),
            layout: PhantomData,
        }
    }

    fn is_remote(&self) -> bool {
        self.report.starts_with("http://") || self.report.starts_with("https://")
    }

    async fn load(&self) -> Result<Vec<u8>, ScrapeError> {
        if self.is_remote() {
            self.fetch.bytes(&Request::get(&self.report)).await
        } else {
            tokio::fs::read(&self.report)
                .await
                .map_err(|e| ScrapeError::io(&self.report, e))
        }
    }
}

impl<F: Fetch, L: Layout> SourceExtractor for BoardOfReview<'_, F, L> {
    type Record = Decision<L>;

    fn source(&self) -> String {
        self.report.clone()
    }

    #[instrument(level = "info", skip_all, fields(report = %self.report, year = self.year))]
    async fn extract(&self) -> Result<Vec<RawRecord>, ScrapeError> {
        let bytes = self.load().await?;
        let text = pdf_text(&bytes, &self.report)?;
        let rows = parse_report_text::<L>(&text, self.year);
        if rows.is_empty() {
            debug!(preview = %truncate_for_log(&text, 300), "Report text without decision rows");
            return Err(ScrapeError::parse(&self.report, "no decision rows found"));
        }
        info!(count = rows.len(), "Extracted board of review rows");
        Ok(rows)
    }
}
