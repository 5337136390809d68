// used for persistence
use rusqlite::{params, params_from_iter, CachedStatement, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use std::time::Duration;

use crate::cursor::SqliteCursor;
use crate::error::{During, MatchError, Result};
use crate::filter::{Field, Filter};
use crate::index::IndexSpec;
use crate::record::MatchRecord;
use crate::settings::Settings;

const IN_MEMORY: &str = ":memory:";
const DEFAULT_BATCH_SIZE: usize = 1000;
/// Joins collection and index names. Collection names never contain it, so
/// index names cannot collide with tables.
const INDEX_SEPARATOR: char = '#';

// ------------- BulkWriteResult -------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteResult {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub write_errors: Vec<WriteError>,
}

impl BulkWriteResult {
    pub fn is_complete(&self) -> bool {
        self.write_errors.is_empty()
    }
}

/// Failure of one item of an unordered bulk write; siblings still ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteError {
    pub index: usize,
    pub message: String,
}

enum UpsertOutcome {
    Inserted,
    Matched { modified: bool },
}

// ------------- Persistence -------------
/// SQLite-backed document store holding one table per match collection.
pub struct SqliteStore {
    db: Connection,
    batch_size: usize,
}

impl SqliteStore {
    pub fn open(settings: &Settings) -> Result<Self> {
        let db = if settings.database_path == IN_MEMORY {
            Connection::open_in_memory().during("open")?
        } else {
            let db = Connection::open(&settings.database_path).during("open")?;
            // readers keep going while a bulk write is in progress
            let mode: String = db
                .query_row("pragma journal_mode = wal", [], |row| row.get(0))
                .during("open")?;
            debug!(path = %settings.database_path, journal_mode = %mode, "opened match database");
            db
        };
        db.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))
            .during("open")?;
        Ok(Self {
            db,
            batch_size: settings.cursor_batch_size,
        })
    }
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Connection::open_in_memory().during("open")?,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    // ------------- Collections -------------
    /// Names of every non-system collection, sorted.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        let mut statement = self
            .db
            .prepare_cached(
                "
                select name
                    from sqlite_master
                    where type = 'table'
                    and name not like 'sqlite\\_%' escape '\\'
                    and name not like 'system.%'
                    order by name
            ",
            )
            .during("list collections")?;
        statement
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
            .during("list collections")
    }
    pub fn collection_exists(&self, collection: &str) -> Result<bool> {
        let count: i64 = self
            .db
            .query_row(
                "select count(*) from sqlite_master where type = 'table' and name = ?",
                params![collection],
                |row| row.get(0),
            )
            .during("check collection")?;
        Ok(count > 0)
    }
    pub fn count(&self, collection: &str) -> Result<u64> {
        let count: i64 = self
            .db
            .query_row(&format!("select count(*) from {}", quoted(collection)), [], |row| {
                row.get(0)
            })
            .during("count")?;
        Ok(count as u64)
    }
    pub fn drop_collection(&self, collection: &str) -> Result<()> {
        self.db
            .execute(&format!("drop table if exists {}", quoted(collection)), [])
            .during("drop collection")?;
        info!(collection, "dropped collection");
        Ok(())
    }
    /// Renames a collection; indexes and records move with it.
    pub fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
        if !self.collection_exists(from)? {
            return Err(MatchError::NotFound(format!("collection {from} does not exist")));
        }
        if self.collection_exists(to)? {
            return Err(MatchError::AlreadyExists(format!("collection {to} already exists")));
        }
        let indexes = self
            .index_list(from)?
            .into_iter()
            .filter_map(|(name, unique)| {
                let suffix = name.strip_prefix(&format!("{from}{INDEX_SEPARATOR}"))?.to_owned();
                Some((name, suffix, unique))
            })
            .map(|(name, suffix, unique)| -> Result<(Vec<String>, String, String, bool)> {
                Ok((self.index_columns(&name)?, name, suffix, unique))
            })
            .collect::<Result<Vec<_>>>()?;
        let tx = self.db.unchecked_transaction().during("rename collection")?;
        tx.execute(
            &format!("alter table {} rename to {}", quoted(from), quoted(to)),
            [],
        )
        .during("rename collection")?;
        // index names carry the collection name, move them along
        for (columns, name, suffix, unique) in indexes {
            let columns = columns.iter().map(|column| quoted(column)).collect::<Vec<_>>().join(", ");
            tx.execute_batch(&format!(
                "
                drop index {};
                create {}index {} on {} ({columns});
            ",
                quoted(&name),
                if unique { "unique " } else { "" },
                quoted(&index_name(to, &suffix)),
                quoted(to)
            ))
            .during("rename collection")?;
        }
        tx.commit().during("rename collection")?;
        info!(from, to, "renamed collection");
        Ok(())
    }
    pub(crate) fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.db
            .execute_batch(&format!(
                "
                create table if not exists {} (
                    \"pGroupId\" text not null,
                    \"pId\" text not null,
                    \"qGroupId\" text not null,
                    \"qId\" text not null,
                    \"consensusSetData\" text null,
                    document text not null
                );
            ",
                quoted(collection)
            ))
            .during("create collection")
    }

    // ------------- Queries -------------
    /// Opens a cursor over the matching records in 4-tuple key order.
    pub fn find(&self, collection: &str, filter: &Filter) -> Result<SqliteCursor<'_>> {
        Ok(SqliteCursor::new(&self.db, collection, filter, self.batch_size))
    }
    /// Distinct values of one field, sorted.
    pub fn distinct(&self, collection: &str, field: Field) -> Result<Vec<String>> {
        let column = field.quoted();
        let mut statement = self
            .db
            .prepare_cached(&format!(
                "select distinct {column} from {} where {column} is not null order by {column}",
                quoted(collection)
            ))
            .during("distinct")?;
        statement
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
            .during("distinct")
    }
    /// Filters, then groups by the given fields and returns the group keys.
    pub fn group_keys(&self, collection: &str, filter: &Filter, fields: &[Field]) -> Result<Vec<Vec<String>>> {
        if fields.is_empty() {
            return Err(MatchError::InvalidArgument("group by requires at least one field".into()));
        }
        let columns = fields.iter().map(|field| field.quoted()).collect::<Vec<_>>().join(", ");
        let (predicate, values) = filter.to_sql();
        let mut statement = self
            .db
            .prepare_cached(&format!(
                "select {columns} from {} where {predicate} group by {columns} order by {columns}",
                quoted(collection)
            ))
            .during("aggregate")?;
        statement
            .query_map(params_from_iter(values.iter()), |row| {
                (0..fields.len())
                    .map(|i| row.get::<_, String>(i))
                    .collect::<rusqlite::Result<Vec<String>>>()
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<Vec<String>>>>())
            .during("aggregate")
    }
    pub fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let (predicate, values) = filter.to_sql();
        let deleted = self
            .db
            .execute(
                &format!("delete from {} where {predicate}", quoted(collection)),
                params_from_iter(values.iter()),
            )
            .during("delete")?;
        Ok(deleted as u64)
    }

    // ------------- Writes -------------
    /// Unordered insert-or-replace keyed by the 4-tuple. A failing record is
    /// reported in the result and does not stop the others.
    pub fn bulk_upsert(&self, collection: &str, records: &[MatchRecord]) -> Result<BulkWriteResult> {
        let mut result = BulkWriteResult::default();
        if records.is_empty() {
            return Ok(result);
        }
        self.ensure_collection(collection)?;
        let table = quoted(collection);
        let tx = self.db.unchecked_transaction().during("bulk write")?;
        {
            let mut select = tx
                .prepare_cached(&format!(
                    "
                    select document
                        from {table}
                        where \"pGroupId\" = ?
                        and \"qGroupId\" = ?
                        and \"pId\" = ?
                        and \"qId\" = ?
                "
                ))
                .during("bulk write")?;
            let mut insert = tx
                .prepare_cached(&format!(
                    "
                    insert into {table} (
                        \"pGroupId\",
                        \"qGroupId\",
                        \"pId\",
                        \"qId\",
                        \"consensusSetData\",
                        document
                    ) values (?, ?, ?, ?, ?, ?)
                "
                ))
                .during("bulk write")?;
            let mut update = tx
                .prepare_cached(&format!(
                    "
                    update {table}
                        set \"consensusSetData\" = ?, document = ?
                        where \"pGroupId\" = ?
                        and \"qGroupId\" = ?
                        and \"pId\" = ?
                        and \"qId\" = ?
                "
                ))
                .during("bulk write")?;
            for (index, record) in records.iter().enumerate() {
                match upsert_one(&mut select, &mut insert, &mut update, record) {
                    Ok(UpsertOutcome::Inserted) => result.inserted += 1,
                    Ok(UpsertOutcome::Matched { modified }) => {
                        result.matched += 1;
                        if modified {
                            result.modified += 1;
                        }
                    }
                    Err(error) => result.write_errors.push(WriteError {
                        index,
                        message: error.to_string(),
                    }),
                }
            }
        }
        tx.commit().during("bulk write")?;
        Ok(result)
    }

    // ------------- Indexes -------------
    /// Creates an index unless an identical one already exists.
    pub fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        self.ensure_collection(collection)?;
        let wanted: Vec<String> = spec.fields.iter().map(|field| field.column().to_owned()).collect();
        let index_name = index_name(collection, spec.name);
        for (existing_name, unique) in self.index_list(collection)? {
            let columns = self.index_columns(&existing_name)?;
            if columns == wanted {
                if unique != spec.unique {
                    return Err(MatchError::IndexConflict {
                        collection: collection.to_owned(),
                        message: format!(
                            "index {existing_name} on ({}) exists with unique={unique}, requested unique={}",
                            wanted.join(", "),
                            spec.unique
                        ),
                    });
                }
                debug!(collection, index = %existing_name, "index already exists");
                return Ok(());
            }
            if existing_name == index_name {
                return Err(MatchError::IndexConflict {
                    collection: collection.to_owned(),
                    message: format!(
                        "index {index_name} exists on ({}), requested ({})",
                        columns.join(", "),
                        wanted.join(", ")
                    ),
                });
            }
        }
        let columns = spec.fields.iter().map(|field| field.quoted()).collect::<Vec<_>>().join(", ");
        self.db
            .execute(
                &format!(
                    "create {}index {} on {} ({columns})",
                    if spec.unique { "unique " } else { "" },
                    quoted(&index_name),
                    quoted(collection)
                ),
                [],
            )
            .during("create index")?;
        // no background builds in SQLite, the build completes inline
        debug!(collection, index = %index_name, unique = spec.unique, background = spec.background, "created index");
        Ok(())
    }
    fn index_list(&self, collection: &str) -> Result<Vec<(String, bool)>> {
        let mut statement = self
            .db
            .prepare_cached("select name, \"unique\" from pragma_index_list(?) order by name")
            .during("list indexes")?;
        statement
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<(String, bool)>>>())
            .during("list indexes")
    }
    fn index_columns(&self, index: &str) -> Result<Vec<String>> {
        let mut statement = self
            .db
            .prepare_cached("select name from pragma_index_info(?) order by seqno")
            .during("list indexes")?;
        statement
            .query_map(params![index], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
            .during("list indexes")
    }
}

fn upsert_one(
    select: &mut CachedStatement<'_>,
    insert: &mut CachedStatement<'_>,
    update: &mut CachedStatement<'_>,
    record: &MatchRecord,
) -> Result<UpsertOutcome> {
    if !record.matches().is_finite() {
        return Err(MatchError::InvalidArgument(format!(
            "matches for {record} contain a non-finite coordinate or weight"
        )));
    }
    let (p_group_id, q_group_id, p_id, q_id) = record.key();
    let document = serde_json::to_string(record)?;
    let consensus_set_data = record
        .consensus_set_data()
        .map(serde_json::to_string)
        .transpose()?;
    let existing: Option<String> = select
        .query_row(params![p_group_id, q_group_id, p_id, q_id], |row| row.get(0))
        .optional()
        .during("bulk write")?;
    match existing {
        None => {
            insert
                .execute(params![p_group_id, q_group_id, p_id, q_id, consensus_set_data, document])
                .during("bulk write")?;
            Ok(UpsertOutcome::Inserted)
        }
        Some(previous) if previous == document => Ok(UpsertOutcome::Matched { modified: false }),
        Some(_) => {
            update
                .execute(params![consensus_set_data, document, p_group_id, q_group_id, p_id, q_id])
                .during("bulk write")?;
            Ok(UpsertOutcome::Matched { modified: true })
        }
    }
}

fn index_name(collection: &str, name: &str) -> String {
    format!("{collection}{INDEX_SEPARATOR}{name}")
}

pub(crate) fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
