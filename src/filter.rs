//! Closed filter language for selecting match records.
//!
//! A [`Filter`] is a small tree of field constraints combined with AND/OR.
//! It renders to a parameterized SQL predicate for the store and can also be
//! evaluated directly against a [`MatchRecord`].

use std::fmt;

use crate::record::MatchRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    PGroupId,
    PId,
    QGroupId,
    QId,
    ConsensusSetData,
}

impl Field {
    pub fn column(self) -> &'static str {
        match self {
            Self::PGroupId => "pGroupId",
            Self::PId => "pId",
            Self::QGroupId => "qGroupId",
            Self::QId => "qId",
            Self::ConsensusSetData => "consensusSetData",
        }
    }
    pub(crate) fn quoted(self) -> String {
        format!("\"{}\"", self.column())
    }
    fn value_of(self, record: &MatchRecord) -> Option<&str> {
        match self {
            Self::PGroupId => Some(record.p_group_id()),
            Self::PId => Some(record.p_id()),
            Self::QGroupId => Some(record.q_group_id()),
            Self::QId => Some(record.q_id()),
            // only tested for presence
            Self::ConsensusSetData => record.consensus_set_data().map(|_| ""),
        }
    }
}

/// Sort order of every cursor and the uniqueness key of every collection.
pub const MATCH_ORDER_BY: [Field; 4] = [Field::PGroupId, Field::QGroupId, Field::PId, Field::QId];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(Field, String),
    Ne(Field, String),
    Exists(Field),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn equal(field: Field, value: impl Into<String>) -> Self {
        Self::Eq(field, value.into())
    }
    pub fn not_equal(field: Field, value: impl Into<String>) -> Self {
        Self::Ne(field, value.into())
    }

    // ------------- Selection criteria -------------
    pub fn with_p_group(p_group_id: &str) -> Self {
        Self::equal(Field::PGroupId, p_group_id)
    }
    pub fn exact_pair(p_group_id: &str, p_id: &str, q_group_id: &str, q_id: &str) -> Self {
        Self::And(vec![
            Self::equal(Field::PGroupId, p_group_id),
            Self::equal(Field::PId, p_id),
            Self::equal(Field::QGroupId, q_group_id),
            Self::equal(Field::QId, q_id),
        ])
    }
    pub fn within_group(group_id: &str) -> Self {
        Self::And(vec![
            Self::equal(Field::PGroupId, group_id),
            Self::equal(Field::QGroupId, group_id),
        ])
    }
    /// Exact on both sides; callers normalize the two groups beforehand.
    pub fn between_groups(p_group_id: &str, q_group_id: &str) -> Self {
        Self::And(vec![
            Self::equal(Field::PGroupId, p_group_id),
            Self::equal(Field::QGroupId, q_group_id),
        ])
    }
    pub fn outside_group(group_id: &str) -> Self {
        Self::Or(vec![
            Self::And(vec![
                Self::equal(Field::PGroupId, group_id),
                Self::not_equal(Field::QGroupId, group_id),
            ]),
            Self::And(vec![
                Self::equal(Field::QGroupId, group_id),
                Self::not_equal(Field::PGroupId, group_id),
            ]),
        ])
    }
    pub fn involving_object(group_id: &str, id: &str) -> Self {
        Self::Or(vec![
            Self::And(vec![Self::equal(Field::PGroupId, group_id), Self::equal(Field::PId, id)]),
            Self::And(vec![Self::equal(Field::QGroupId, group_id), Self::equal(Field::QId, id)]),
        ])
    }
    pub fn involving_object_and_group(group_id: &str, id: &str, other_group_id: &str) -> Self {
        Self::Or(vec![
            Self::And(vec![
                Self::equal(Field::PGroupId, group_id),
                Self::equal(Field::PId, id),
                Self::equal(Field::QGroupId, other_group_id),
            ]),
            Self::And(vec![
                Self::equal(Field::QGroupId, group_id),
                Self::equal(Field::QId, id),
                Self::equal(Field::PGroupId, other_group_id),
            ]),
        ])
    }
    pub fn has_consensus_set() -> Self {
        Self::Exists(Field::ConsensusSetData)
    }

    pub fn matches(&self, record: &MatchRecord) -> bool {
        match self {
            Self::Eq(field, value) => field.value_of(record) == Some(value.as_str()),
            Self::Ne(field, value) => field.value_of(record) != Some(value.as_str()),
            Self::Exists(field) => field.value_of(record).is_some(),
            Self::And(filters) => filters.iter().all(|f| f.matches(record)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(record)),
        }
    }

    /// Appends this filter as an SQL predicate, pushing one parameter per `?`.
    pub(crate) fn write_sql(&self, sql: &mut String, params: &mut Vec<String>) {
        match self {
            Self::Eq(field, value) => {
                sql.push_str(&field.quoted());
                sql.push_str(" = ?");
                params.push(value.clone());
            }
            Self::Ne(field, value) => {
                sql.push_str(&field.quoted());
                sql.push_str(" <> ?");
                params.push(value.clone());
            }
            Self::Exists(field) => {
                sql.push_str(&field.quoted());
                sql.push_str(" is not null");
            }
            Self::And(filters) => write_joined(filters, " and ", "1", sql, params),
            Self::Or(filters) => write_joined(filters, " or ", "0", sql, params),
        }
    }

    pub(crate) fn to_sql(&self) -> (String, Vec<String>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.write_sql(&mut sql, &mut params);
        (sql, params)
    }
}

fn write_joined(filters: &[Filter], separator: &str, empty: &str, sql: &mut String, params: &mut Vec<String>) {
    if filters.is_empty() {
        sql.push_str(empty);
        return;
    }
    sql.push('(');
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            sql.push_str(separator);
        }
        filter.write_sql(sql, params);
    }
    sql.push(')');
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Eq(field, value) => write!(f, "{} = '{}'", field.column(), value),
            Self::Ne(field, value) => write!(f, "{} != '{}'", field.column(), value),
            Self::Exists(field) => write!(f, "exists({})", field.column()),
            Self::And(filters) | Self::Or(filters) => {
                let separator = if matches!(self, Self::And(_)) { " and " } else { " or " };
                write!(f, "(")?;
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{separator}")?;
                    }
                    write!(f, "{filter}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ConsensusSetData, Matches};

    fn record(p_group: &str, p_id: &str, q_group: &str, q_id: &str) -> MatchRecord {
        MatchRecord::new(p_group, p_id, q_group, q_id, Matches::default())
    }

    #[test]
    fn outside_group_renders_or_of_two_clauses() {
        let (sql, params) = Filter::outside_group("sec1").to_sql();
        assert_eq!(
            sql,
            "((\"pGroupId\" = ? and \"qGroupId\" <> ?) or (\"qGroupId\" = ? and \"pGroupId\" <> ?))"
        );
        assert_eq!(params, vec!["sec1"; 4]);
    }

    #[test]
    fn outside_group_excludes_within_group_pairs() {
        let filter = Filter::outside_group("sec1");
        assert!(filter.matches(&record("sec1", "a", "sec2", "b")));
        assert!(filter.matches(&record("sec0", "a", "sec1", "b")));
        assert!(!filter.matches(&record("sec1", "a", "sec1", "b")));
        assert!(!filter.matches(&record("sec2", "a", "sec3", "b")));
    }

    #[test]
    fn involving_object_checks_both_sides() {
        let filter = Filter::involving_object("sec1", "tileA");
        assert!(filter.matches(&record("sec1", "tileA", "sec2", "x")));
        assert!(filter.matches(&record("sec0", "x", "sec1", "tileA")));
        assert!(!filter.matches(&record("sec1", "tileB", "sec2", "tileA")));

        let narrowed = Filter::involving_object_and_group("sec1", "tileA", "sec2");
        assert!(narrowed.matches(&record("sec1", "tileA", "sec2", "x")));
        assert!(!narrowed.matches(&record("sec1", "tileA", "sec3", "x")));
    }

    #[test]
    fn exists_tracks_consensus_data() {
        let plain = record("a", "1", "b", "1");
        let split = plain.clone().with_consensus_set_data(ConsensusSetData::new(0, "1", "1"));
        assert!(!Filter::has_consensus_set().matches(&plain));
        assert!(Filter::has_consensus_set().matches(&split));
        assert_eq!(Filter::has_consensus_set().to_sql().0, "\"consensusSetData\" is not null");
    }

    #[test]
    fn empty_combinations_are_constant() {
        assert_eq!(Filter::And(vec![]).to_sql().0, "1");
        assert_eq!(Filter::Or(vec![]).to_sql().0, "0");
    }
}
