//! Forward-only cursors over match records sorted by the 4-tuple key.

use std::collections::VecDeque;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::{error, trace};

use crate::error::{During, Result};
use crate::filter::{Filter, MATCH_ORDER_BY};
use crate::record::MatchRecord;
use crate::store::quoted;

/// A sorted stream of records that holds resources until closed.
///
/// `close` must be safe to call more than once; only the first call releases
/// anything.
pub trait MatchCursor {
    fn next_match(&mut self) -> Result<Option<MatchRecord>>;
    fn close(&mut self) -> Result<()>;
}

impl<C: MatchCursor + ?Sized> MatchCursor for Box<C> {
    fn next_match(&mut self) -> Result<Option<MatchRecord>> {
        self.as_mut().next_match()
    }
    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

/// Closes the cursor and hands back `outcome`. A close failure is logged
/// and never replaces the outcome.
pub(crate) fn close_after<T, C>(cursor: &mut C, outcome: Result<T>, source: &str) -> Result<T>
where
    C: MatchCursor + ?Sized,
{
    if let Err(e) = cursor.close() {
        error!(error = %e, source, "failed to close cursor, ignoring");
    }
    outcome
}

// ------------- SqliteCursor -------------
/// Keyset-paged cursor: each page restarts strictly after the last key seen,
/// so at most one batch of records is held at a time.
pub struct SqliteCursor<'db> {
    db: &'db Connection,
    collection: String,
    first_page: String,
    next_page: String,
    filter_params: Vec<String>,
    batch_size: usize,
    buffer: VecDeque<MatchRecord>,
    last_key: Option<[String; 4]>,
    exhausted: bool,
    closed: bool,
}

impl<'db> SqliteCursor<'db> {
    pub(crate) fn new(db: &'db Connection, collection: &str, filter: &Filter, batch_size: usize) -> Self {
        let (predicate, filter_params) = filter.to_sql();
        let order_by = MATCH_ORDER_BY
            .iter()
            .map(|field| field.quoted())
            .collect::<Vec<_>>()
            .join(", ");
        let table = quoted(collection);
        Self {
            db,
            collection: collection.to_owned(),
            first_page: format!(
                "select document from {table} where {predicate} order by {order_by} limit ?"
            ),
            next_page: format!(
                "select document from {table} where {predicate} and ({order_by}) > (?, ?, ?, ?) order by {order_by} limit ?"
            ),
            filter_params,
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            last_key: None,
            exhausted: false,
            closed: false,
        }
    }
    pub fn collection(&self) -> &str {
        &self.collection
    }
    fn fetch_page(&mut self) -> Result<()> {
        let mut values: Vec<Value> = self.filter_params.iter().cloned().map(Value::Text).collect();
        let sql = match &self.last_key {
            Some(key) => {
                values.extend(key.iter().cloned().map(Value::Text));
                &self.next_page
            }
            None => &self.first_page,
        };
        values.push(Value::Integer(self.batch_size as i64));

        let db = self.db;
        let mut statement = db.prepare_cached(sql).during("find")?;
        let documents = statement
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
            .during("find")?;

        if documents.len() < self.batch_size {
            self.exhausted = true;
        }
        for document in documents {
            self.buffer.push_back(serde_json::from_str(&document)?);
        }
        if let Some(last) = self.buffer.back() {
            let (p_group_id, q_group_id, p_id, q_id) = last.key();
            self.last_key = Some([
                p_group_id.to_owned(),
                q_group_id.to_owned(),
                p_id.to_owned(),
                q_id.to_owned(),
            ]);
        }
        trace!(collection = %self.collection, buffered = self.buffer.len(), "fetched cursor page");
        Ok(())
    }
}

impl MatchCursor for SqliteCursor<'_> {
    fn next_match(&mut self) -> Result<Option<MatchRecord>> {
        if self.closed {
            return Ok(None);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page()?;
        }
        Ok(self.buffer.pop_front())
    }
    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.buffer.clear();
            trace!(collection = %self.collection, "closed cursor");
        }
        Ok(())
    }
}
