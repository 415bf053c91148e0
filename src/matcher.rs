// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Streaming set intersection between observed records and staged identifiers.
//!
//! The staged set sits in memory and the records are streamed past it, so the
//! record source can be arbitrarily large. Each record costs one prefix lookup
//! and, when the bucket is populated, one exact hash lookup.

use crate::record::EventRecord;
use crate::staged::StagedIdentifiers;
use crate::types::id::{EphemeralId, Epoch};
use serde::{Deserialize, Serialize};

/// One observed record whose identifier was derived from a published key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureMatch {
    pub event_record: EventRecord,
    /// Earliest epoch the identifier was derived in.
    pub matched_epoch: Epoch,
    pub derived_id: EphemeralId,
}

/// Match a single record against the staged identifiers.
pub fn match_one(record: &EventRecord, staged: &StagedIdentifiers) -> Option<ExposureMatch> {
    let epoch = staged.lookup(&record.ephemeral_id)?;
    Some(ExposureMatch {
        event_record: record.clone(),
        matched_epoch: epoch,
        derived_id: record.ephemeral_id,
    })
}

/// Lazy matcher over a fallible record stream.
///
/// Errors from the source pass through untouched so the caller decides
/// whether to stop (I/O, cancellation) or keep going.
pub struct Matcher<'a, I> {
    records: I,
    staged: &'a StagedIdentifiers,
    scanned: u64,
    matched: u64,
}

impl<'a, I, E> Matcher<'a, I>
where
    I: Iterator<Item = Result<EventRecord, E>>,
{
    pub fn new(records: I, staged: &'a StagedIdentifiers) -> Self {
        Self {
            records,
            staged,
            scanned: 0,
            matched: 0,
        }
    }

    /// Records pulled from the source so far.
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    pub fn matched(&self) -> u64 {
        self.matched
    }
}

impl<'a, I, E> Iterator for Matcher<'a, I>
where
    I: Iterator<Item = Result<EventRecord, E>>,
{
    type Item = Result<ExposureMatch, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.staged.is_empty() {
            return None;
        }
        loop {
            let record = match self.records.next()? {
                Ok(r) => r,
                Err(e) => return Some(Err(e)),
            };
            self.scanned += 1;
            if let Some(m) = match_one(&record, self.staged) {
                self.matched += 1;
                return Some(Ok(m));
            }
        }
    }
}

/// Convenience for infallible sources.
pub fn match_all<'a, R>(records: R, staged: &'a StagedIdentifiers) -> impl Iterator<Item = ExposureMatch> + 'a
where
    R: IntoIterator<Item = EventRecord>,
    R::IntoIter: 'a,
{
    records
        .into_iter()
        .filter_map(move |record| match_one(&record, staged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn rec(b: u8, t: u64) -> EventRecord {
        EventRecord::new(EphemeralId([b; 16]), -50, t, None)
    }

    #[test]
    fn test_matcher_yields_only_staged_ids() {
        let mut staged = StagedIdentifiers::new();
        staged.insert(EphemeralId([2; 16]), Epoch(1));

        let source = vec![rec(1, 10), rec(2, 20), rec(3, 30), rec(2, 40)]
            .into_iter()
            .map(Ok::<_, Infallible>);
        let mut matcher = Matcher::new(source, &staged);
        let found: Vec<_> = matcher.by_ref().map(|m| m.unwrap().event_record.observed_at).collect();

        assert_eq!(found, vec![20, 40]);
        assert_eq!(matcher.scanned(), 4);
        assert_eq!(matcher.matched(), 2);
    }

    #[test]
    fn test_matcher_passes_errors_through() {
        let mut staged = StagedIdentifiers::new();
        staged.insert(EphemeralId([1; 16]), Epoch(1));

        let source = vec![Err("disk"), Ok(rec(1, 5))].into_iter();
        let out: Vec<_> = Matcher::new(source, &staged).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Err("disk"));
        assert!(out[1].is_ok());
    }

    #[test]
    fn test_empty_staged_set_matches_nothing() {
        let staged = StagedIdentifiers::new();
        assert_eq!(match_all(vec![rec(1, 1)], &staged).count(), 0);
    }
}
