//! Error taxonomy shared by extractors, the store and the pipeline driver.
//!
//! Every failure a job can hit is one of the [`ScrapeError`] variants. Only
//! [`ShapeError`] is recoverable: the pipeline drops the offending raw record
//! and keeps going. Everything else aborts the run.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// What was wrong with a single field of a raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeProblem {
    /// The field was not present (or was blank where a value is required).
    Missing,
    /// The field was present but could not be coerced to its declared type.
    Malformed(String),
}

impl fmt::Display for ShapeProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeProblem::Missing => write!(f, "missing"),
            ShapeProblem::Malformed(reason) => write!(f, "malformed ({reason})"),
        }
    }
}

/// A raw record that could not be turned into a typed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} record: field '{field}' is {problem}")]
pub struct ShapeError {
    pub kind: &'static str,
    pub field: String,
    pub problem: ShapeProblem,
}

impl ShapeError {
    pub fn missing(kind: &'static str, field: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            problem: ShapeProblem::Missing,
        }
    }

    pub fn malformed(kind: &'static str, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            problem: ShapeProblem::Malformed(reason.into()),
        }
    }
}

/// Every way a job run can fail.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("could not parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("dataset {} is corrupt: {reason}", path.display())]
    CorruptDataset { path: PathBuf, reason: String },
    #[error("i/o error on {}: {err}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: io::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

impl ScrapeError {
    pub fn fetch(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        ScrapeError::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        ScrapeError::Parse {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ScrapeError::CorruptDataset {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        ScrapeError::Io {
            path: path.into(),
            err,
        }
    }

    /// Stable label used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Fetch { .. } => "fetch",
            ScrapeError::Parse { .. } => "parse",
            ScrapeError::Shape(_) => "shape",
            ScrapeError::CorruptDataset { .. } => "corrupt_dataset",
            ScrapeError::Io { .. } => "io",
            ScrapeError::Config(_) => "config",
        }
    }

    /// The URL, dataset path or record kind the error is about.
    pub fn source_name(&self) -> String {
        match self {
            ScrapeError::Fetch { url, .. } => url.clone(),
            ScrapeError::Parse { source_name, .. } => source_name.clone(),
            ScrapeError::Shape(e) => e.kind.to_string(),
            ScrapeError::CorruptDataset { path, .. } | ScrapeError::Io { path, .. } => {
                path.display().to_string()
            }
            ScrapeError::Config(_) => "config".to_string(),
        }
    }
}
