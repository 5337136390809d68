use tracing::debug;

use crate::error::Result;
use crate::filter::Field;
use crate::store::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub fields: &'static [Field],
    pub unique: bool,
    pub background: bool,
}

/// At most one record per normalized pair; also serves exact-pair lookups.
pub const MATCH_A: IndexSpec = IndexSpec {
    name: "A",
    fields: &[Field::PGroupId, Field::QGroupId, Field::PId, Field::QId],
    unique: true,
    background: true,
};

/// q-side probes of outside-group and involving-object scans.
pub const MATCH_B: IndexSpec = IndexSpec {
    name: "B",
    fields: &[Field::QGroupId],
    unique: false,
    background: true,
};

pub const MATCH_INDEXES: [IndexSpec; 2] = [MATCH_A, MATCH_B];

/// Makes sure both match indexes exist, creating the collection if needed.
pub fn ensure_match_indexes(store: &SqliteStore, collection: &str) -> Result<()> {
    for spec in &MATCH_INDEXES {
        store.create_index(collection, spec)?;
    }
    debug!(collection, "match indexes in place");
    Ok(())
}
