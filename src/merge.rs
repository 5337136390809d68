//! K-way merge of sorted match cursors from several collections.
//!
//! Every input cursor yields records in 4-tuple key order. The merge keeps one
//! head record per open cursor in a min-heap, so memory is bounded by the
//! number of inputs and each emitted record costs `O(log k)` comparisons.
//! Heads sharing the minimum key are folded into a single record by
//! appending their match payloads, which makes the output strictly
//! increasing by key.
//!
//! The merge owns its cursors. A cursor is closed as soon as it runs dry,
//! and whatever is still open is closed when the merge finishes, fails, or
//! is dropped. Each cursor is closed exactly once.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::{error, trace};

use crate::collection::CollectionHandle;
use crate::cursor::{MatchCursor, SqliteCursor};
use crate::error::Result;
use crate::filter::Filter;
use crate::record::MatchRecord;
use crate::store::SqliteStore;

/// Current record of one input, ordered so that `BinaryHeap` pops the
/// smallest key first (ties go to the earlier input).
struct Head {
    record: MatchRecord,
    source: usize,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .record
            .compare_key(&self.record)
            .then_with(|| other.source.cmp(&self.source))
    }
}
impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Head {}

pub struct MergedMatches<C: MatchCursor> {
    cursors: Vec<Option<C>>,
    heads: BinaryHeap<Head>,
    emitted: u64,
}

impl<'db> MergedMatches<SqliteCursor<'db>> {
    /// Opens one filtered cursor per collection and primes the merge.
    ///
    /// If any cursor fails to open or to produce its first record, the ones
    /// already opened are closed before the error is returned.
    pub fn open(store: &'db SqliteStore, collections: &[CollectionHandle], filter: &Filter) -> Result<Self> {
        let mut merged = Self::with_capacity(collections.len());
        for collection in collections {
            merged.push(store.find(collection.name(), filter)?)?;
        }
        Ok(merged)
    }
}

impl<C: MatchCursor> MergedMatches<C> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cursors: Vec::with_capacity(capacity),
            heads: BinaryHeap::with_capacity(capacity),
            emitted: 0,
        }
    }
    pub fn from_cursors(cursors: impl IntoIterator<Item = C>) -> Result<Self> {
        let cursors = cursors.into_iter();
        let mut merged = Self::with_capacity(cursors.size_hint().0);
        for cursor in cursors {
            merged.push(cursor)?;
        }
        Ok(merged)
    }
    /// Takes ownership of a cursor and reads its first record. A cursor that
    /// is empty from the start is closed right away.
    pub fn push(&mut self, cursor: C) -> Result<()> {
        let source = self.cursors.len();
        self.cursors.push(Some(cursor));
        self.advance(source).inspect_err(|_| self.close_all())
    }
    /// Number of inputs that still have records.
    pub fn open_cursors(&self) -> usize {
        self.cursors.iter().filter(|cursor| cursor.is_some()).count()
    }
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        let next = match self.cursors[source].as_mut() {
            Some(cursor) => cursor.next_match()?,
            None => None,
        };
        match next {
            Some(record) => self.heads.push(Head { record, source }),
            None => self.close_cursor(source),
        }
        Ok(())
    }
    fn next_merged(&mut self) -> Result<Option<MatchRecord>> {
        let Some(Head { record: mut merged, source }) = self.heads.pop() else {
            return Ok(None);
        };
        self.advance(source)?;
        while self
            .heads
            .peek()
            .is_some_and(|head| head.record.compare_key(&merged) == Ordering::Equal)
        {
            if let Some(Head { record, source }) = self.heads.pop() {
                merged.append_matches(record)?;
                self.advance(source)?;
            }
        }
        self.emitted += 1;
        Ok(Some(merged))
    }
    fn close_cursor(&mut self, source: usize) {
        if let Some(mut cursor) = self.cursors[source].take() {
            match cursor.close() {
                Ok(()) => trace!(source, "closed exhausted cursor"),
                Err(e) => error!(error = %e, source, "failed to close cursor, ignoring"),
            }
        }
    }
    fn close_all(&mut self) {
        self.heads.clear();
        for source in 0..self.cursors.len() {
            self.close_cursor(source);
        }
    }
}

impl<C: MatchCursor> MatchCursor for MergedMatches<C> {
    fn next_match(&mut self) -> Result<Option<MatchRecord>> {
        self.next_merged().inspect_err(|_| self.close_all())
    }
    fn close(&mut self) -> Result<()> {
        self.close_all();
        Ok(())
    }
}

impl<C: MatchCursor> Drop for MergedMatches<C> {
    fn drop(&mut self) {
        self.close_all();
    }
}
