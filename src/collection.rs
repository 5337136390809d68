use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde::ser::SerializeStruct;

use crate::error::{MatchError, Result};

const SEPARATOR: &str = "__";
const MAX_DB_COLLECTION_NAME_LENGTH: usize = 120;

lazy_static! {
    static ref NAME_PART: Regex = Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("name pattern compiles");
}

// ------------- CollectionId -------------
/// Logical match collection, owned by a namespace and mapped to exactly one
/// physical collection name. Identity is the physical name.
#[derive(Debug, Clone)]
pub struct CollectionId {
    owner: String,
    name: String,
    db_collection_name: String,
}

impl CollectionId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();
        validate_part("owner", &owner)?;
        validate_part("name", &name)?;
        if owner.contains(SEPARATOR) {
            return Err(MatchError::InvalidArgument(format!(
                "owner '{owner}' must not contain '{SEPARATOR}'"
            )));
        }
        let db_collection_name = format!("{owner}{SEPARATOR}{name}");
        if db_collection_name.len() > MAX_DB_COLLECTION_NAME_LENGTH {
            return Err(MatchError::InvalidArgument(format!(
                "collection name '{db_collection_name}' exceeds {MAX_DB_COLLECTION_NAME_LENGTH} characters"
            )));
        }
        Ok(Self {
            owner,
            name,
            db_collection_name,
        })
    }
    /// Rebuilds the id of a physical collection name such as `owner__name`.
    pub fn from_db_collection_name(db_collection_name: &str) -> Result<Self> {
        match db_collection_name.split_once(SEPARATOR) {
            Some((owner, name)) => Self::new(owner, name),
            None => Err(MatchError::InvalidArgument(format!(
                "'{db_collection_name}' is not a match collection name"
            ))),
        }
    }
    pub fn owner(&self) -> &str {
        &self.owner
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn db_collection_name(&self) -> &str {
        &self.db_collection_name
    }
}

fn validate_part(context: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(MatchError::InvalidArgument(format!("{context} must be specified")));
    }
    if !NAME_PART.is_match(value) {
        return Err(MatchError::InvalidArgument(format!(
            "{context} '{value}' may only contain letters, digits, '_', '.' and '-'"
        )));
    }
    Ok(())
}

impl PartialEq for CollectionId {
    fn eq(&self, other: &Self) -> bool {
        self.db_collection_name == other.db_collection_name
    }
}
impl Eq for CollectionId {}
impl Hash for CollectionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.db_collection_name.hash(state);
    }
}
impl Ord for CollectionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.db_collection_name.cmp(&other.db_collection_name)
    }
}
impl PartialOrd for CollectionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
impl Serialize for CollectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CollectionId", 2)?;
        state.serialize_field("owner", &self.owner)?;
        state.serialize_field("name", &self.name)?;
        state.end()
    }
}

// ------------- CollectionHandle -------------
/// A collection that was verified to exist when it was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    id: CollectionId,
}

impl CollectionHandle {
    pub(crate) fn new(id: CollectionId) -> Self {
        Self { id }
    }
    pub fn id(&self) -> &CollectionId {
        &self.id
    }
    pub fn name(&self) -> &str {
        self.id.db_collection_name()
    }
}

// ------------- CollectionMetadata -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMetadata {
    collection_id: CollectionId,
    pair_count: u64,
}

impl CollectionMetadata {
    pub fn new(collection_id: CollectionId, pair_count: u64) -> Self {
        Self {
            collection_id,
            pair_count,
        }
    }
    pub fn collection_id(&self) -> &CollectionId {
        &self.collection_id
    }
    pub fn pair_count(&self) -> u64 {
        self.pair_count
    }
}
