//! Identity and deduplication.
//!
//! Given the keys already present in a dataset and a freshly extracted batch
//! of typed records, work out which records are new:
//!
//! 1. collapse records that are identical in every field,
//! 2. among records sharing a natural key, keep the first one seen
//!    (first-seen-wins; later variants are logged and dropped),
//! 3. drop records whose key is already in the dataset.
//!
//! Extraction order is preserved throughout so appends are deterministic for
//! a given extractor output.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use tracing::{debug, warn};

use crate::models::{NaturalKey, Record};

/// Outcome of deduplicating one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduped<R> {
    /// Records to append, in extraction order.
    pub fresh: Vec<R>,
    /// Exact repeats collapsed within the batch.
    pub identical: usize,
    /// Same key, different fields, dropped in favour of the first seen.
    pub conflicting: usize,
    /// Records whose key was already persisted.
    pub known: usize,
}

impl<R> Deduped<R> {
    /// Total records removed from the batch.
    pub fn removed(&self) -> usize {
        self.identical + self.conflicting + self.known
    }
}

/// Select the records of `batch` that are not yet in the dataset.
///
/// An empty `known` set is the bootstrap case: every distinct record is new.
pub fn select_new<R: Record>(batch: Vec<R>, known: &HashSet<NaturalKey>) -> Deduped<R> {
    let total = batch.len();
    let distinct: Vec<R> = batch.into_iter().unique().collect();
    let identical = total - distinct.len();

    let mut first_seen: HashMap<NaturalKey, usize> = HashMap::new();
    let mut unique_by_key: Vec<R> = Vec::with_capacity(distinct.len());
    let mut conflicting = 0usize;

    for record in distinct {
        let key = record.natural_key();
        if let Some(&idx) = first_seen.get(&key) {
            conflicting += 1;
            warn!(
                kind = R::KIND,
                key = %key,
                kept = ?unique_by_key[idx],
                dropped = ?record,
                "Same natural key with different fields in one batch; keeping first seen"
            );
            continue;
        }
        first_seen.insert(key, unique_by_key.len());
        unique_by_key.push(record);
    }

    let before_known = unique_by_key.len();
    let fresh: Vec<R> = unique_by_key
        .into_iter()
        .filter(|r| !known.contains(&r.natural_key()))
        .collect();
    let known_count = before_known - fresh.len();

    debug!(
        kind = R::KIND,
        total,
        identical,
        conflicting,
        known = known_count,
        fresh = fresh.len(),
        "Deduplicated batch"
    );

    Deduped {
        fresh,
        identical,
        conflicting,
        known: known_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::Item;

    fn keys(ids: &[&str]) -> HashSet<NaturalKey> {
        ids.iter().map(|id| NaturalKey::from(*id)).collect()
    }

    fn ids(records: &[Item]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_bootstrap_everything_is_new() {
        let batch = vec![Item::new("1", "a"), Item::new("2", "b"), Item::new("3", "c")];
        let out = select_new(batch, &HashSet::new());
        assert_eq!(ids(&out.fresh), vec!["1", "2", "3"]);
        assert_eq!(out.removed(), 0);
    }

    #[test]
    fn test_known_keys_are_filtered() {
        let batch = vec![Item::new("A", "a"), Item::new("B", "b"), Item::new("C", "c")];
        let out = select_new(batch, &keys(&["A", "B"]));
        assert_eq!(ids(&out.fresh), vec!["C"]);
        assert_eq!(out.known, 2);
        assert_eq!(out.removed(), 2);
    }

    #[test]
    fn test_identical_records_collapse() {
        let batch = vec![Item::new("D", "d"), Item::new("E", "e"), Item::new("D", "d")];
        let out = select_new(batch, &HashSet::new());
        assert_eq!(ids(&out.fresh), vec!["D", "E"]);
        assert_eq!(out.identical, 1);
        assert_eq!(out.conflicting, 0);
    }

    #[test]
    fn test_first_seen_wins_on_key_conflict() {
        let batch = vec![
            Item::new("X", "first"),
            Item::new("Y", "y"),
            Item::new("X", "second"),
        ];
        let out = select_new(batch, &HashSet::new());
        assert_eq!(out.fresh.len(), 2);
        assert_eq!(out.fresh[0].name, "first");
        assert_eq!(out.conflicting, 1);
    }

    #[test]
    fn test_extraction_order_is_preserved() {
        let batch = vec![Item::new("9", "z"), Item::new("1", "a"), Item::new("5", "m")];
        let out = select_new(batch, &keys(&["1"]));
        assert_eq!(ids(&out.fresh), vec!["9", "5"]);
    }

    #[test]
    fn test_empty_batch() {
        let out = select_new(Vec::<Item>::new(), &keys(&["1"]));
        assert!(out.fresh.is_empty());
        assert_eq!(out.removed(), 0);
    }
}
