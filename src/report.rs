//! Structured run reports.
//!
//! Every invocation ends by printing exactly one JSON line to stdout (logs go
//! to stderr), for example:
//!
//! ```text
//! {"status":"success","kind":"crime_log","dataset":"./crime_log.csv","created":false,"extracted":25,"rejected":0,"deduplicated":24,"appended":1}
//! {"status":"failure","kind":"crime_log","stage":"loaded_keys","error_kind":"fetch","source":"https://...","message":"..."}
//! ```
//!
//! With `--summary-out` the same JSON is also written to that file.

use std::path::Path;

use serde::Serialize;
use tokio::fs;
use tracing::{error, info, instrument};

use crate::assets::AssetSummary;
use crate::error::ScrapeError;
use crate::pipeline::{RunFailure, RunSummary, Stage};

/// Why a job failed, in report form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub kind: String,
    pub stage: Option<Stage>,
    pub error_kind: &'static str,
    pub source: String,
    pub message: String,
}

impl FailureReport {
    /// A failure outside the pipeline, e.g. while loading configuration.
    pub fn from_error(kind: impl Into<String>, error: &ScrapeError) -> Self {
        Self {
            kind: kind.into(),
            stage: None,
            error_kind: error.kind(),
            source: error.source_name(),
            message: error.to_string(),
        }
    }
}

impl From<&RunFailure> for FailureReport {
    fn from(failure: &RunFailure) -> Self {
        Self {
            stage: Some(failure.stage),
            ..Self::from_error(failure.kind, &failure.error)
        }
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Report {
    Success(RunSummary),
    Failure(FailureReport),
    Normalized { kind: &'static str, dataset: String, rows: usize },
    Assets(AssetSummary),
}

impl Report {
    pub fn is_failure(&self) -> bool {
        matches!(self, Report::Failure(_))
    }

    pub fn to_json(&self) -> Result<String, ScrapeError> {
        serde_json::to_string(self).map_err(|e| ScrapeError::Config(format!("could not serialize report: {e}")))
    }

    /// Print the report to stdout and, if requested, write it to `out`.
    #[instrument(level = "info", skip_all)]
    pub async fn emit(&self, out: Option<&Path>) -> Result<(), ScrapeError> {
        let json = self.to_json()?;
        println!("{json}");

        if let Some(path) = out {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ScrapeError::io(parent, e))?;
            }
            if let Err(e) = fs::write(path, format!("{json}\n")).await {
                error!(path = %path.display(), error = %e, "Failed to write report");
                return Err(ScrapeError::io(path, e));
            }
            info!(path = %path.display(), "Wrote report");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn summary() -> RunSummary {
        RunSummary {
            kind: "crime_log",
            dataset: "data/crime_log.csv".to_string(),
            created: false,
            extracted: 3,
            rejected: 0,
            deduplicated: 2,
            appended: 1,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_success_json_is_flat_and_tagged() {
        let json: serde_json::Value = serde_json::from_str(&Report::Success(summary()).to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["extracted"], 3);
        assert_eq!(json["deduplicated"], 2);
        assert_eq!(json["appended"], 1);
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn test_failure_report_names_stage_and_source() {
        let failure = RunFailure {
            kind: "crime_log",
            stage: Stage::LoadedKeys,
            error: ScrapeError::fetch("https://police.example/log", "HTTP 503 Service Unavailable"),
        };
        let report = Report::Failure(FailureReport::from(&failure));
        assert!(report.is_failure());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["stage"], "loaded_keys");
        assert_eq!(json["error_kind"], "fetch");
        assert_eq!(json["source"], "https://police.example/log");
    }

    #[tokio::test]
    async fn test_emit_writes_summary_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports/last.json");
        Report::Success(summary()).emit(Some(&path)).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\"status\":\"success\""));
        assert!(text.ends_with("}\n"));
    }
}
