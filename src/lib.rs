//! Matchstore – persistence and query layer for pairwise tile match records.
//!
//! A match record ties one tile `p` in group `pGroupId` to one tile `q` in
//! group `qGroupId` and carries the point correspondences found between
//! them. Records live in named collections, one SQLite table per
//! collection, and are always stored normalized so that a physical pair has
//! exactly one key:
//! * [`record::MatchRecord`] – the record, its payload and key ordering.
//! * [`collection::CollectionId`] – `owner/name` collection identity mapped to
//!   the physical `owner__name` table.
//! * [`filter::Filter`] – selection criteria, evaluated in SQL or in memory.
//!
//! ## Modules
//! * [`store`] – SQLite document store: collections, paged queries, deletes,
//!   unordered bulk upserts and index creation.
//! * [`index`] – the two match indexes every collection carries.
//! * [`cursor`] – the [`cursor::MatchCursor`] trait and the keyset paged
//!   SQLite cursor.
//! * [`merge`] – k-way merge of sorted cursors from several collections,
//!   folding equal keys into one record.
//! * [`stream`] – writes a cursor to any `io::Write` as one JSON array.
//! * [`dao`] – [`dao::MatchDao`], the operations callers use.
//! * [`settings`] – layered configuration (defaults, file, environment).
//! * [`error`] – the crate wide [`error::MatchError`].
//!
//! ## Ordering
//! Every query returns records sorted by `(pGroupId, qGroupId, pId, qId)`
//! compared as byte strings. Merging several collections keeps that order
//! and emits each key once.
//!
//! ## Quick Start
//! ```
//! use matchstore::{CollectionId, MatchDao, MatchRecord, Matches, SqliteStore};
//! let dao = MatchDao::new(SqliteStore::open_in_memory().unwrap());
//! let id = CollectionId::new("flyTEM", "m1").unwrap();
//! let matches = Matches::new(vec![vec![1.0], vec![2.0]], vec![vec![3.0], vec![4.0]], vec![1.0]);
//! dao.save_matches(&id, vec![MatchRecord::new("sec1", "t2", "sec1", "t1", matches)]).unwrap();
//! let mut json = Vec::new();
//! assert_eq!(dao.write_matches_within_group(&id, &[], "sec1", &mut json).unwrap(), 1);
//! ```

pub mod collection;
pub mod cursor;
pub mod dao;
pub mod error;
pub mod filter;
pub mod index;
pub mod merge;
pub mod record;
pub mod settings;
pub mod store;
pub mod stream;

pub use collection::{CollectionHandle, CollectionId, CollectionMetadata};
pub use cursor::MatchCursor;
pub use dao::MatchDao;
pub use error::{MatchError, Result};
pub use filter::{Field, Filter};
pub use merge::MergedMatches;
pub use record::{ConsensusSetData, MatchRecord, Matches};
pub use settings::Settings;
pub use store::{BulkWriteResult, SqliteStore, WriteError};
