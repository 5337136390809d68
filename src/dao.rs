//! Data access for match collections.
//!
//! [`MatchDao`] resolves logical collection ids to physical collections,
//! builds the selection filters, streams results (merging across several
//! collections when asked to) and performs the idempotent bulk writes.

use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::time::Duration;

use tracing::{debug, warn};

use crate::collection::{CollectionHandle, CollectionId, CollectionMetadata};
use crate::cursor::{close_after, MatchCursor};
use crate::error::{MatchError, Result};
use crate::filter::{Field, Filter};
use crate::index::ensure_match_indexes;
use crate::merge::MergedMatches;
use crate::record::{MatchRecord, Matches};
use crate::settings::Settings;
use crate::store::{BulkWriteResult, SqliteStore};
use crate::stream::{write_json_array, DEFAULT_PROGRESS_INTERVAL};

pub struct MatchDao {
    store: SqliteStore,
    progress_interval: Duration,
}

impl MatchDao {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
    pub fn open(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self::new(SqliteStore::open(settings)?).with_progress_interval(settings.progress_interval()))
    }
    pub fn with_progress_interval(mut self, progress_interval: Duration) -> Self {
        self.progress_interval = progress_interval;
        self
    }
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    // ------------- Registry -------------
    /// Verifies that the collection exists.
    pub fn resolve(&self, collection_id: &CollectionId) -> Result<CollectionHandle> {
        if self.store.collection_exists(collection_id.db_collection_name())? {
            Ok(CollectionHandle::new(collection_id.clone()))
        } else {
            Err(MatchError::NotFound(format!("match collection {collection_id} does not exist")))
        }
    }
    /// Every match collection with its pair count.
    pub fn collection_metadata(&self) -> Result<Vec<CollectionMetadata>> {
        let mut list = Vec::new();
        for name in self.store.collection_names()? {
            match CollectionId::from_db_collection_name(&name) {
                Ok(collection_id) => {
                    let pair_count = self.store.count(&name)?;
                    list.push(CollectionMetadata::new(collection_id, pair_count));
                }
                Err(e) => warn!(collection = %name, error = %e, "skipping collection with foreign name"),
            }
        }
        Ok(list)
    }

    // ------------- Distinct group ids -------------
    pub fn distinct_p_group_ids(&self, collection_id: &CollectionId) -> Result<Vec<String>> {
        let collection = self.resolve(collection_id)?;
        self.store.distinct(collection.name(), Field::PGroupId)
    }
    pub fn distinct_q_group_ids(&self, collection_id: &CollectionId) -> Result<Vec<String>> {
        let collection = self.resolve(collection_id)?;
        self.store.distinct(collection.name(), Field::QGroupId)
    }
    /// Sorted union of the p and q group ids.
    pub fn distinct_group_ids(&self, collection_id: &CollectionId) -> Result<Vec<String>> {
        let mut group_ids: BTreeSet<String> = self.distinct_p_group_ids(collection_id)?.into_iter().collect();
        group_ids.extend(self.distinct_q_group_ids(collection_id)?);
        Ok(group_ids.into_iter().collect())
    }

    // ------------- Multi consensus -------------
    /// p groups of pairs that were split into consensus sets, sorted.
    pub fn multi_consensus_p_group_ids(&self, collection_id: &CollectionId) -> Result<Vec<String>> {
        let collection = self.resolve(collection_id)?;
        let keys = self
            .store
            .group_keys(collection.name(), &Filter::has_consensus_set(), &[Field::PGroupId])?;
        let group_ids: BTreeSet<String> = keys.into_iter().flatten().collect();
        debug!(collection = %collection_id, count = group_ids.len(), "found multi consensus p groups");
        Ok(group_ids.into_iter().collect())
    }
    /// `(pGroupId, qGroupId)` combinations of pairs that were split into
    /// consensus sets.
    pub fn multi_consensus_pair_group_ids(&self, collection_id: &CollectionId) -> Result<BTreeSet<(String, String)>> {
        let collection = self.resolve(collection_id)?;
        let keys = self.store.group_keys(
            collection.name(),
            &Filter::has_consensus_set(),
            &[Field::PGroupId, Field::QGroupId],
        )?;
        Ok(keys
            .into_iter()
            .filter_map(|key| match <[String; 2]>::try_from(key) {
                Ok([p_group_id, q_group_id]) => Some((p_group_id, q_group_id)),
                Err(_) => None,
            })
            .collect())
    }
    /// Both sides of every split pair, as one set.
    pub fn multi_consensus_group_ids(&self, collection_id: &CollectionId) -> Result<BTreeSet<String>> {
        Ok(self
            .multi_consensus_pair_group_ids(collection_id)?
            .into_iter()
            .flat_map(|(p_group_id, q_group_id)| [p_group_id, q_group_id])
            .collect())
    }

    // ------------- Streaming reads -------------
    pub fn write_matches_with_p_group<W: Write>(
        &self,
        collection_id: &CollectionId,
        merge_collection_ids: &[CollectionId],
        p_group_id: &str,
        sink: &mut W,
    ) -> Result<u64> {
        debug!(collection = %collection_id, merge = merge_collection_ids.len(), p_group_id, "write matches with p group");
        validate_required("pGroupId", p_group_id)?;
        self.write_matches(collection_id, merge_collection_ids, &Filter::with_p_group(p_group_id), sink)
    }
    pub fn write_matches_within_group<W: Write>(
        &self,
        collection_id: &CollectionId,
        merge_collection_ids: &[CollectionId],
        group_id: &str,
        sink: &mut W,
    ) -> Result<u64> {
        debug!(collection = %collection_id, merge = merge_collection_ids.len(), group_id, "write matches within group");
        validate_required("groupId", group_id)?;
        self.write_matches(collection_id, merge_collection_ids, &Filter::within_group(group_id), sink)
    }
    pub fn write_matches_outside_group<W: Write>(
        &self,
        collection_id: &CollectionId,
        merge_collection_ids: &[CollectionId],
        group_id: &str,
        sink: &mut W,
    ) -> Result<u64> {
        debug!(collection = %collection_id, merge = merge_collection_ids.len(), group_id, "write matches outside group");
        validate_required("groupId", group_id)?;
        self.write_matches(collection_id, merge_collection_ids, &Filter::outside_group(group_id), sink)
    }
    pub fn write_matches_between_groups<W: Write>(
        &self,
        collection_id: &CollectionId,
        merge_collection_ids: &[CollectionId],
        p_group_id: &str,
        q_group_id: &str,
        sink: &mut W,
    ) -> Result<u64> {
        debug!(collection = %collection_id, merge = merge_collection_ids.len(), p_group_id, q_group_id, "write matches between groups");
        validate_required("pGroupId", p_group_id)?;
        validate_required("qGroupId", q_group_id)?;
        let filter = normalized_between_groups(p_group_id, q_group_id);
        self.write_matches(collection_id, merge_collection_ids, &filter, sink)
    }
    pub fn write_matches_between_object_and_group<W: Write>(
        &self,
        collection_id: &CollectionId,
        merge_collection_ids: &[CollectionId],
        p_group_id: &str,
        p_id: &str,
        q_group_id: &str,
        sink: &mut W,
    ) -> Result<u64> {
        debug!(collection = %collection_id, merge = merge_collection_ids.len(), p_group_id, p_id, q_group_id, "write matches between object and group");
        validate_required("pGroupId", p_group_id)?;
        validate_required("pId", p_id)?;
        validate_required("qGroupId", q_group_id)?;
        let filter = Filter::involving_object_and_group(p_group_id, p_id, q_group_id);
        self.write_matches(collection_id, merge_collection_ids, &filter, sink)
    }
    pub fn write_matches_between_objects<W: Write>(
        &self,
        collection_id: &CollectionId,
        merge_collection_ids: &[CollectionId],
        p_group_id: &str,
        p_id: &str,
        q_group_id: &str,
        q_id: &str,
        sink: &mut W,
    ) -> Result<u64> {
        debug!(collection = %collection_id, merge = merge_collection_ids.len(), p_group_id, p_id, q_group_id, q_id, "write matches between objects");
        validate_pair(p_group_id, p_id, q_group_id, q_id)?;
        let filter = normalized_exact_pair(p_group_id, p_id, q_group_id, q_id);
        self.write_matches(collection_id, merge_collection_ids, &filter, sink)
    }
    pub fn write_matches_involving_object<W: Write>(
        &self,
        collection_id: &CollectionId,
        merge_collection_ids: &[CollectionId],
        group_id: &str,
        id: &str,
        sink: &mut W,
    ) -> Result<u64> {
        debug!(collection = %collection_id, merge = merge_collection_ids.len(), group_id, id, "write matches involving object");
        validate_required("groupId", group_id)?;
        validate_required("id", id)?;
        self.write_matches(collection_id, merge_collection_ids, &Filter::involving_object(group_id, id), sink)
    }

    /// Streams the filtered records of one collection, or the key-merged
    /// records of several.
    pub fn write_matches<W: Write>(
        &self,
        collection_id: &CollectionId,
        merge_collection_ids: &[CollectionId],
        filter: &Filter,
        sink: &mut W,
    ) -> Result<u64> {
        let collections = self.distinct_collection_list(collection_id, merge_collection_ids)?;
        match collections.as_slice() {
            [collection] => {
                let mut cursor = self.store.find(collection.name(), filter)?;
                write_json_array(&mut cursor, sink, self.progress_interval, collection.name())
            }
            _ => {
                let source = collections.iter().map(|c| c.name()).collect::<Vec<_>>().join("|");
                debug!(collections = %source, %filter, "merging matches");
                let mut merged = MergedMatches::open(&self.store, &collections, filter)?;
                write_json_array(&mut merged, sink, self.progress_interval, &source)
            }
        }
    }

    // ------------- Materialized reads -------------
    pub fn matches_outside_group(&self, collection_id: &CollectionId, group_id: &str) -> Result<Vec<MatchRecord>> {
        debug!(collection = %collection_id, group_id, "get matches outside group");
        validate_required("groupId", group_id)?;
        let collection = self.resolve(collection_id)?;
        self.collect_matches(&collection, &Filter::outside_group(group_id))
    }
    pub fn matches_within_group(&self, collection_id: &CollectionId, group_id: &str) -> Result<Vec<MatchRecord>> {
        debug!(collection = %collection_id, group_id, "get matches within group");
        validate_required("groupId", group_id)?;
        let collection = self.resolve(collection_id)?;
        self.collect_matches(&collection, &Filter::within_group(group_id))
    }
    /// The stored record for one tile pair, in either p/q order.
    pub fn matches_between_objects(
        &self,
        collection_id: &CollectionId,
        p_group_id: &str,
        p_id: &str,
        q_group_id: &str,
        q_id: &str,
    ) -> Result<MatchRecord> {
        validate_pair(p_group_id, p_id, q_group_id, q_id)?;
        let collection = self.resolve(collection_id)?;
        let filter = normalized_exact_pair(p_group_id, p_id, q_group_id, q_id);
        let mut cursor = self.store.find(collection.name(), &filter)?;
        let found = cursor.next_match();
        let found = close_after(&mut cursor, found, collection.name());
        match found? {
            Some(record) if !record.is_empty() => {
                debug!(collection = %collection_id, count = record.len(), %filter, "found matches between objects");
                Ok(record)
            }
            _ => Err(MatchError::NotFound(format!(
                "{collection_id} does not contain matches between {p_id} and {q_id}"
            ))),
        }
    }
    fn collect_matches(&self, collection: &CollectionHandle, filter: &Filter) -> Result<Vec<MatchRecord>> {
        let mut cursor = self.store.find(collection.name(), filter)?;
        let mut list = Vec::new();
        let outcome = drain(&mut cursor, &mut list);
        close_after(&mut cursor, outcome, collection.name())?;
        debug!(collection = collection.name(), count = list.len(), %filter, "collected matches");
        Ok(list)
    }

    // ------------- Deletes -------------
    pub fn remove_matches_involving_object(&self, collection_id: &CollectionId, group_id: &str, id: &str) -> Result<u64> {
        debug!(collection = %collection_id, group_id, id, "remove matches involving object");
        validate_required("groupId", group_id)?;
        validate_required("id", id)?;
        self.remove_matches(collection_id, &Filter::involving_object(group_id, id))
    }
    pub fn remove_matches_between_tiles(
        &self,
        collection_id: &CollectionId,
        p_group_id: &str,
        p_id: &str,
        q_group_id: &str,
        q_id: &str,
    ) -> Result<u64> {
        debug!(collection = %collection_id, p_group_id, p_id, q_group_id, q_id, "remove matches between tiles");
        validate_pair(p_group_id, p_id, q_group_id, q_id)?;
        self.remove_matches(collection_id, &normalized_exact_pair(p_group_id, p_id, q_group_id, q_id))
    }
    pub fn remove_matches_between_groups(&self, collection_id: &CollectionId, p_group_id: &str, q_group_id: &str) -> Result<u64> {
        debug!(collection = %collection_id, p_group_id, q_group_id, "remove matches between groups");
        validate_required("pGroupId", p_group_id)?;
        validate_required("qGroupId", q_group_id)?;
        self.remove_matches(collection_id, &normalized_between_groups(p_group_id, q_group_id))
    }
    pub fn remove_matches_outside_group(&self, collection_id: &CollectionId, group_id: &str) -> Result<u64> {
        debug!(collection = %collection_id, group_id, "remove matches outside group");
        validate_required("groupId", group_id)?;
        self.remove_matches(collection_id, &Filter::outside_group(group_id))
    }
    fn remove_matches(&self, collection_id: &CollectionId, filter: &Filter) -> Result<u64> {
        let collection = self.resolve(collection_id)?;
        let deleted = self.store.delete_many(collection.name(), filter)?;
        debug!(collection = collection.name(), deleted, %filter, "removed matches");
        Ok(deleted)
    }
    /// Drops the whole collection.
    pub fn remove_all_matches(&self, collection_id: &CollectionId) -> Result<()> {
        debug!(collection = %collection_id, "remove all matches");
        let collection = self.resolve(collection_id)?;
        self.store.drop_collection(collection.name())
    }

    // ------------- Writes -------------
    /// Normalizes and upserts every record; the collection and its indexes
    /// are created on first use.
    pub fn save_matches(&self, collection_id: &CollectionId, mut matches: Vec<MatchRecord>) -> Result<BulkWriteResult> {
        debug!(collection = %collection_id, count = matches.len(), "save matches");
        if matches.is_empty() {
            return Ok(BulkWriteResult::default());
        }
        let collection = collection_id.db_collection_name();
        for record in &mut matches {
            record.normalize();
        }
        ensure_match_indexes(&self.store, collection)?;
        let result = self.store.bulk_upsert(collection, &matches)?;
        debug!(
            collection,
            inserted = result.inserted,
            matched = result.matched,
            modified = result.modified,
            failed = result.write_errors.len(),
            "bulk write of {} matches",
            matches.len()
        );
        if !result.is_complete() {
            warn!(collection, failed = result.write_errors.len(), "some matches were not written");
        }
        Ok(result)
    }
    /// Renames a collection; fails if the source is missing or the target
    /// is taken.
    pub fn rename_match_collection(&self, from: &CollectionId, to: &CollectionId) -> Result<()> {
        debug!(from = %from, to = %to, "rename match collection");
        if !self.store.collection_exists(from.db_collection_name())? {
            return Err(MatchError::NotFound(format!("{from} does not exist")));
        }
        if self.store.collection_exists(to.db_collection_name())? {
            return Err(MatchError::AlreadyExists(format!("{to} already exists")));
        }
        self.store
            .rename_collection(from.db_collection_name(), to.db_collection_name())
    }

    fn distinct_collection_list(
        &self,
        collection_id: &CollectionId,
        merge_collection_ids: &[CollectionId],
    ) -> Result<Vec<CollectionHandle>> {
        let mut seen = HashSet::with_capacity(merge_collection_ids.len() + 1);
        seen.insert(collection_id);
        let mut collections = vec![self.resolve(collection_id)?];
        for merge_collection_id in merge_collection_ids {
            if seen.insert(merge_collection_id) {
                collections.push(self.resolve(merge_collection_id)?);
            } else {
                warn!(collection = %merge_collection_id, "filtered duplicate collection id");
            }
        }
        Ok(collections)
    }
}

fn drain<C: MatchCursor>(cursor: &mut C, list: &mut Vec<MatchRecord>) -> Result<()> {
    while let Some(record) = cursor.next_match()? {
        list.push(record);
    }
    Ok(())
}

fn validate_required(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MatchError::InvalidArgument(format!("{name} must be specified")));
    }
    Ok(())
}

fn validate_pair(p_group_id: &str, p_id: &str, q_group_id: &str, q_id: &str) -> Result<()> {
    validate_required("pGroupId", p_group_id)?;
    validate_required("pId", p_id)?;
    validate_required("qGroupId", q_group_id)?;
    validate_required("qId", q_id)
}

/// Criteria are normalized the same way stored records are.
fn normalized_exact_pair(p_group_id: &str, p_id: &str, q_group_id: &str, q_id: &str) -> Filter {
    let key = MatchRecord::new(p_group_id, p_id, q_group_id, q_id, Matches::default());
    Filter::exact_pair(key.p_group_id(), key.p_id(), key.q_group_id(), key.q_id())
}

fn normalized_between_groups(p_group_id: &str, q_group_id: &str) -> Filter {
    let key = MatchRecord::new(p_group_id, "", q_group_id, "", Matches::default());
    Filter::between_groups(key.p_group_id(), key.q_group_id())
}
