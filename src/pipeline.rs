//! Incremental ingestion driver.
//!
//! One run walks a fixed sequence of states:
//!
//! ```text
//! Init -> LoadedKeys -> Extracted -> Deduped -> Appended
//!   \________\______________\___________\________-> Failed
//! ```
//!
//! The dataset is only touched in the last step, so a failure anywhere
//! before it leaves the file exactly as it was. The dataset lock is held
//! from before the keys are loaded until the append has been committed.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::dedup::select_new;
use crate::error::ScrapeError;
use crate::models::Record;
use crate::scrapers::SourceExtractor;
use crate::store::Store;

/// Pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    LoadedKeys,
    Extracted,
    Deduped,
    Appended,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::LoadedKeys => "loaded_keys",
            Stage::Extracted => "extracted",
            Stage::Deduped => "deduped",
            Stage::Appended => "appended",
        }
    }
}

/// Counts reported by a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub kind: &'static str,
    pub dataset: String,
    /// True when this run created the dataset file.
    pub created: bool,
    /// Raw records produced by the extractor.
    pub extracted: usize,
    /// Raw records dropped for failing shape validation.
    pub rejected: usize,
    /// Valid records dropped as duplicates, within the batch or of stored rows.
    pub deduplicated: usize,
    pub appended: usize,
    /// Problems after the append that did not undo it, such as a side file
    /// that could not be written.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// A run that ended in the failed state.
#[derive(Debug, Error)]
#[error("{kind} run failed after {}: {error}", stage.as_str())]
pub struct RunFailure {
    pub kind: &'static str,
    /// Last state reached before failing.
    pub stage: Stage,
    #[source]
    pub error: ScrapeError,
}

/// Summary plus the rows this run appended, in append order.
#[derive(Debug, Clone)]
pub struct RunOutcome<R> {
    pub summary: RunSummary,
    pub appended: Vec<R>,
}

/// Binds one extractor to the dataset of its record kind.
#[derive(Debug)]
pub struct Pipeline<E: SourceExtractor> {
    extractor: E,
    store: Store<E::Record>,
}

impl<E: SourceExtractor> Pipeline<E> {
    pub fn new(extractor: E, store: Store<E::Record>) -> Self {
        Self { extractor, store }
    }

    pub fn store(&self) -> &Store<E::Record> {
        &self.store
    }

    /// Run the pipeline once: lock, load stored keys, extract, validate,
    /// deduplicate and append.
    ///
    /// The dataset is only written after extraction and deduplication have
    /// succeeded, and not at all when an existing dataset gets no new rows.
    ///
    /// # Returns
    ///
    /// The run's [`RunSummary`] and the appended records, or a [`RunFailure`]
    /// naming the last stage reached. On failure the dataset is unchanged.
    #[instrument(
        level = "info",
        skip_all,
        fields(kind = E::Record::KIND, dataset = %self.store.path().display())
    )]
    pub async fn run(&self) -> Result<RunOutcome<E::Record>, RunFailure> {
        let kind = E::Record::KIND;
        let fail = move |stage: Stage| move |error: ScrapeError| RunFailure { kind, stage, error };

        info!(stage = Stage::Init.as_str(), source = %self.extractor.source(), "Starting run");
        let _lock = self.store.lock().map_err(fail(Stage::Init))?;

        let existed = self.store.exists();
        let known = self.store.load_keys().map_err(fail(Stage::Init))?;
        info!(stage = Stage::LoadedKeys.as_str(), known = known.len(), existed, "Loaded known keys");

        let raws = self
            .extractor
            .extract()
            .await
            .map_err(fail(Stage::LoadedKeys))?;
        let extracted = raws.len();

        let mut valid = Vec::with_capacity(raws.len());
        let mut rejected = 0usize;
        for (index, raw) in raws.iter().enumerate() {
            match E::Record::from_raw(raw) {
                Ok(record) => valid.push(record),
                Err(e) => {
                    rejected += 1;
                    warn!(index, kind = e.kind, field = %e.field, reason = %e.problem, "Dropping raw record");
                }
            }
        }
        info!(stage = Stage::Extracted.as_str(), extracted, valid = valid.len(), rejected, "Extracted batch");

        let deduped = select_new(valid, &known);
        info!(
            stage = Stage::Deduped.as_str(),
            fresh = deduped.fresh.len(),
            removed = deduped.removed(),
            "Selected new records"
        );

        // a first run always creates the dataset, even with no rows
        if !deduped.fresh.is_empty() || !existed {
            self.store
                .append(&deduped.fresh)
                .map_err(fail(Stage::Deduped))?;
        } else {
            info!("Nothing new; dataset left untouched");
        }

        let summary = RunSummary {
            kind,
            dataset: self.store.path().display().to_string(),
            created: !existed,
            extracted,
            rejected,
            deduplicated: deduped.removed(),
            appended: deduped.fresh.len(),
            warnings: Vec::new(),
        };
        info!(
            stage = Stage::Appended.as_str(),
            appended = summary.appended,
            deduplicated = summary.deduplicated,
            "Run complete"
        );

        Ok(RunOutcome {
            summary,
            appended: deduped.fresh,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;

    use tempfile::tempdir;

    use super::*;
    use crate::models::tests::{raw_item, Item};
    use crate::models::RawRecord;

    /// Extractor serving a queue of canned batches, one per run.
    struct Canned {
        batches: Mutex<Vec<Result<Vec<RawRecord>, ScrapeError>>>,
    }

    impl Canned {
        fn new(batches: Vec<Result<Vec<RawRecord>, ScrapeError>>) -> Self {
            let mut batches = batches;
            batches.reverse();
            Self {
                batches: Mutex::new(batches),
            }
        }
    }

    impl SourceExtractor for Canned {
        type Record = Item;

        fn source(&self) -> String {
            "canned".to_string()
        }

        async fn extract(&self) -> Result<Vec<RawRecord>, ScrapeError> {
            self.batches
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn batch(ids: &[&str]) -> Vec<RawRecord> {
        ids.iter().map(|id| raw_item(id, &format!("name {id}"))).collect()
    }

    #[tokio::test]
    async fn test_bootstrap_writes_header_and_all_rows() {
        let dir = tempdir().unwrap();
        let canned = Canned::new(vec![Ok(batch(&["a", "b", "c"]))]);
        let pipeline = Pipeline::new(canned, Store::new(dir.path().join("items.csv")));

        let outcome = pipeline.run().await.unwrap();
        assert!(outcome.summary.created);
        assert_eq!(outcome.summary.appended, 3);
        assert_eq!(outcome.summary.deduplicated, 0);

        let text = fs::read_to_string(pipeline.store().path()).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert_eq!(text.lines().next(), Some("id,name,note"));
    }

    #[tokio::test]
    async fn test_bootstrap_with_empty_batch_creates_header_only() {
        let dir = tempdir().unwrap();
        let canned = Canned::new(vec![Ok(Vec::new())]);
        let pipeline = Pipeline::new(canned, Store::new(dir.path().join("items.csv")));

        let outcome = pipeline.run().await.unwrap();
        assert!(outcome.summary.created);
        assert_eq!(fs::read_to_string(pipeline.store().path()).unwrap(), "id,name,note\n");
    }

    #[tokio::test]
    async fn test_second_identical_run_is_a_no_op() {
        let dir = tempdir().unwrap();
        let canned = Canned::new(vec![Ok(batch(&["a", "b"])), Ok(batch(&["a", "b"]))]);
        let pipeline = Pipeline::new(canned, Store::new(dir.path().join("items.csv")));

        pipeline.run().await.unwrap();
        let before = fs::read(pipeline.store().path()).unwrap();
        let second = pipeline.run().await.unwrap();

        assert!(!second.summary.created);
        assert_eq!(second.summary.appended, 0);
        assert_eq!(second.summary.deduplicated, 2);
        assert_eq!(fs::read(pipeline.store().path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_incremental_run_appends_only_new_key() {
        let dir = tempdir().unwrap();
        let canned = Canned::new(vec![Ok(batch(&["A", "B"])), Ok(batch(&["A", "B", "C"]))]);
        let pipeline = Pipeline::new(canned, Store::new(dir.path().join("items.csv")));

        pipeline.run().await.unwrap();
        let outcome = pipeline.run().await.unwrap();

        assert_eq!(outcome.summary.extracted, 3);
        assert_eq!(outcome.summary.deduplicated, 2);
        assert_eq!(outcome.summary.appended, 1);
        assert_eq!(outcome.appended, vec![Item::new("C", "name C")]);
    }

    #[tokio::test]
    async fn test_identical_records_in_batch_collapse() {
        let dir = tempdir().unwrap();
        let canned = Canned::new(vec![Ok(batch(&["D", "D"]))]);
        let pipeline = Pipeline::new(canned, Store::new(dir.path().join("items.csv")));

        let outcome = pipeline.run().await.unwrap();
        assert_eq!(outcome.summary.appended, 1);
        assert_eq!(outcome.summary.deduplicated, 1);
    }

    #[tokio::test]
    async fn test_invalid_raw_record_is_dropped_and_siblings_kept() {
        let dir = tempdir().unwrap();
        let mut raws = batch(&["1", "3"]);
        raws.insert(1, RawRecord::new().with("id", "2"));
        let canned = Canned::new(vec![Ok(raws)]);
        let pipeline = Pipeline::new(canned, Store::new(dir.path().join("items.csv")));

        let outcome = pipeline.run().await.unwrap();
        assert_eq!(outcome.summary.extracted, 3);
        assert_eq!(outcome.summary.rejected, 1);
        assert_eq!(outcome.summary.appended, 2);
    }

    #[tokio::test]
    async fn test_corrupt_header_fails_before_extraction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.csv");
        fs::write(&path, "id,title\n1,x\n").unwrap();
        let canned = Canned::new(vec![Ok(batch(&["2"]))]);
        let pipeline = Pipeline::new(canned, Store::new(&path));

        let failure = pipeline.run().await.unwrap_err();
        assert_eq!(failure.stage, Stage::Init);
        assert_eq!(failure.error.kind(), "corrupt_dataset");
        assert_eq!(fs::read_to_string(&path).unwrap(), "id,title\n1,x\n");
    }

    #[tokio::test]
    async fn test_extractor_failure_leaves_dataset_byte_identical() {
        let dir = tempdir().unwrap();
        let canned = Canned::new(vec![
            Ok(batch(&["a"])),
            Err(ScrapeError::fetch("http://down.test", "timed out")),
        ]);
        let pipeline = Pipeline::new(canned, Store::new(dir.path().join("items.csv")));

        pipeline.run().await.unwrap();
        let before = fs::read(pipeline.store().path()).unwrap();

        let failure = pipeline.run().await.unwrap_err();
        assert_eq!(failure.stage, Stage::LoadedKeys);
        assert_eq!(failure.error.kind(), "fetch");
        assert_eq!(fs::read(pipeline.store().path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_failure_on_new_dataset_creates_nothing() {
        let dir = tempdir().unwrap();
        let canned = Canned::new(vec![Err(ScrapeError::parse("canned", "no table"))]);
        let pipeline = Pipeline::new(canned, Store::new(dir.path().join("items.csv")));

        assert!(pipeline.run().await.is_err());
        assert!(!pipeline.store().exists());
    }

    #[tokio::test]
    async fn test_held_lock_fails_run() {
        let dir = tempdir().unwrap();
        let canned = Canned::new(vec![Ok(batch(&["a"]))]);
        let pipeline = Pipeline::new(canned, Store::new(dir.path().join("items.csv")));

        let _held = pipeline.store().lock().unwrap();
        let failure = pipeline.run().await.unwrap_err();
        assert_eq!(failure.error.kind(), "io");
        assert!(!pipeline.store().exists());
    }
}
