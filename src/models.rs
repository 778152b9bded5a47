//! Record model shared by every job.
//!
//! This module defines the pieces that every record kind is built from:
//! - [`RawRecord`]: an unvalidated field-name to text mapping, as produced by
//!   a source extractor or read back from a dataset row
//! - [`Value`]: one typed cell of a record, including an explicit null
//! - [`NaturalKey`]: the identity used for deduplication
//! - [`Record`]: the trait each record kind implements
//!
//! Optional fields that are absent upstream are [`Value::Null`], never an
//! empty string. On disk a null is written as an empty cell.
//!
//! The dataset format cannot tell a null from a present-but-blank text cell:
//! both are written as an empty cell, and an empty cell reads back as a null.
//! In memory the distinction holds for freshly extracted records only.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::ShapeError;

/// Canonical on-disk format for date/time cells.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Canonical on-disk format for date cells.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Separator between the parts of a composite natural key. Unit separator,
/// so it cannot collide with scraped text.
const KEY_SEPARATOR: char = '\u{1f}';

/// An unvalidated record: field name to raw text.
///
/// Absent fields are simply not in the map. A field that is present but
/// blank is kept as an empty string so the record model can tell the two
/// apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: HashMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<String>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build from a stored dataset row. Empty cells are nulls, so they are
    /// left out of the mapping.
    pub fn from_stored_row<'a>(
        headers: impl IntoIterator<Item = &'a str>,
        cells: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let fields = headers
            .into_iter()
            .zip(cells)
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(h, cell)| (h.to_string(), cell.to_string()))
            .collect();
        Self { fields }
    }

    /// A required text field: present and not blank, trimmed.
    pub fn required(&self, kind: &'static str, field: &str) -> Result<String, ShapeError> {
        match self.get(field).map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(ShapeError::missing(kind, field)),
        }
    }

    /// An optional text field, trimmed. `None` only when the field is absent.
    pub fn optional(&self, field: &str) -> Option<String> {
        self.get(field).map(|v| v.trim().to_string())
    }

    /// A required integer; thousands separators are tolerated.
    pub fn integer(&self, kind: &'static str, field: &str) -> Result<i64, ShapeError> {
        let raw = self.required(kind, field)?;
        parse_integer(&raw)
            .ok_or_else(|| ShapeError::malformed(kind, field, format!("not an integer: '{raw}'")))
    }

    /// An optional integer: `None` when absent or blank.
    pub fn optional_integer(&self, kind: &'static str, field: &str) -> Result<Option<i64>, ShapeError> {
        match self.get(field).map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_integer(raw)
                .map(Some)
                .ok_or_else(|| ShapeError::malformed(kind, field, format!("not an integer: '{raw}'"))),
        }
    }

    /// A required date/time, accepted in any of `formats`.
    pub fn datetime(
        &self,
        kind: &'static str,
        field: &str,
        formats: &[&str],
    ) -> Result<NaiveDateTime, ShapeError> {
        let raw = self.required(kind, field)?;
        parse_datetime(&raw, formats)
            .ok_or_else(|| ShapeError::malformed(kind, field, format!("unrecognized date/time: '{raw}'")))
    }

    /// A required date, accepted in any of `formats`.
    pub fn date(&self, kind: &'static str, field: &str, formats: &[&str]) -> Result<NaiveDate, ShapeError> {
        let raw = self.required(kind, field)?;
        parse_date(&raw, formats)
            .ok_or_else(|| ShapeError::malformed(kind, field, format!("unrecognized date: '{raw}'")))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    cleaned.trim().parse().ok()
}

fn parse_datetime(raw: &str, formats: &[&str]) -> Option<NaiveDateTime> {
    let raw = collapse_spaces(raw);
    std::iter::once(DATETIME_FORMAT)
        .chain(formats.iter().copied())
        .find_map(|fmt| NaiveDateTime::parse_from_str(&raw, fmt).ok())
}

fn parse_date(raw: &str, formats: &[&str]) -> Option<NaiveDate> {
    let raw = collapse_spaces(raw);
    std::iter::once(DATE_FORMAT)
        .chain(formats.iter().copied())
        .find_map(|fmt| NaiveDate::parse_from_str(&raw, fmt).ok())
        // stored datasets from older runs carry a midnight time component
        .or_else(|| parse_datetime(&raw, &[]).map(|dt| dt.date()))
}

fn collapse_spaces(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One typed cell of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Text(String),
    Integer(i64),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Null,
}

impl Value {
    /// The text written to the dataset cell.
    ///
    /// Nulls and blank text both become empty cells, so after a round trip
    /// through a dataset a blank optional field is `None`.
    pub fn to_cell(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Null => Ok(()),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Identity of a record across scrapes.
///
/// Built from the rendered cells of the key fields, so a key computed from a
/// freshly extracted record matches the key read back from its stored row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn from_cells<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::new();
        for (i, cell) in cells.into_iter().enumerate() {
            if i > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(cell.as_ref());
        }
        NaturalKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // composite keys print as "a|b"
        for (i, part) in self.0.split(KEY_SEPARATOR).enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

impl From<&str> for NaturalKey {
    fn from(s: &str) -> Self {
        NaturalKey(s.to_string())
    }
}

/// A typed record kind.
///
/// Implementors declare their ordered field list and the subset of fields
/// that forms the natural key; the key and the row layout are derived from
/// those declarations.
pub trait Record: Clone + Eq + Hash + fmt::Debug {
    /// Short name of the record kind, used in logs and reports.
    const KIND: &'static str;
    /// Ordered field names; also the dataset header.
    const FIELDS: &'static [&'static str];
    /// Fields that make up the natural key, in key order.
    const KEY_FIELDS: &'static [&'static str];

    /// Validate and coerce a raw record.
    fn from_raw(raw: &RawRecord) -> Result<Self, ShapeError>;

    /// Cells in [`Record::FIELDS`] order.
    fn to_row(&self) -> Vec<Value>;

    fn fields() -> &'static [&'static str] {
        Self::FIELDS
    }

    fn natural_key(&self) -> NaturalKey {
        let row = self.to_row();
        NaturalKey::from_cells(
            key_positions::<Self>()
                .into_iter()
                .map(|i| row.get(i).map(Value::to_cell).unwrap_or_default()),
        )
    }

    fn to_cells(&self) -> Vec<String> {
        self.to_row().iter().map(Value::to_cell).collect()
    }
}

/// Positions of the key fields within the field list.
pub fn key_positions<R: Record>() -> Vec<usize> {
    R::KEY_FIELDS
        .iter()
        .filter_map(|k| R::FIELDS.iter().position(|f| f == k))
        .collect()
}
