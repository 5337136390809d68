//! Pairwise match records and their canonical key ordering.
//!
//! A [`MatchRecord`] ties one object (tile) `p` in group `pGroupId` to one
//! object `q` in group `qGroupId` and carries the point correspondences found
//! between them. Records are stored normalized: `(pGroupId, pId)` never sorts
//! after `(qGroupId, qId)`, so the same physical pair has exactly one key.
//!
//! The natural sort, merge and uniqueness key is the 4-tuple
//! `(pGroupId, qGroupId, pId, qId)`, compared field by field as byte strings.

use std::cmp::Ordering;
use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};

// ------------- Matches -------------
/// Point correspondences between the `p` and `q` objects of a pair.
///
/// `p[d][i]` and `q[d][i]` are coordinate `d` of correspondence `i` in the
/// local space of each object, `w[i]` is its weight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Matches {
    p: Vec<Vec<f64>>,
    q: Vec<Vec<f64>>,
    w: Vec<f64>,
}

impl Matches {
    pub fn new(p: Vec<Vec<f64>>, q: Vec<Vec<f64>>, w: Vec<f64>) -> Self {
        Self { p, q, w }
    }
    pub fn p(&self) -> &[Vec<f64>] {
        &self.p
    }
    pub fn q(&self) -> &[Vec<f64>] {
        &self.q
    }
    pub fn w(&self) -> &[f64] {
        &self.w
    }
    pub fn len(&self) -> usize {
        self.w.len()
    }
    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }
    /// False if any coordinate or weight is NaN or infinite; JSON cannot
    /// carry those.
    pub fn is_finite(&self) -> bool {
        self.p
            .iter()
            .chain(&self.q)
            .flatten()
            .chain(&self.w)
            .all(|value| value.is_finite())
    }
    /// Appends every correspondence of `other` after the ones already held.
    pub fn append(&mut self, other: Matches) {
        append_dimensions(&mut self.p, other.p);
        append_dimensions(&mut self.q, other.q);
        self.w.extend(other.w);
    }
    fn swap_sides(&mut self) {
        mem::swap(&mut self.p, &mut self.q);
    }
}

fn append_dimensions(target: &mut Vec<Vec<f64>>, source: Vec<Vec<f64>>) {
    if target.len() < source.len() {
        target.resize_with(source.len(), Vec::new);
    }
    for (values, more) in target.iter_mut().zip(source) {
        values.extend(more);
    }
}

// ------------- ConsensusSetData -------------
/// Present when matching split one tile pair into several consensus sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusSetData {
    index: u32,
    original_p_id: String,
    original_q_id: String,
}

impl ConsensusSetData {
    pub fn new(index: u32, original_p_id: impl Into<String>, original_q_id: impl Into<String>) -> Self {
        Self {
            index,
            original_p_id: original_p_id.into(),
            original_q_id: original_q_id.into(),
        }
    }
    pub fn index(&self) -> u32 {
        self.index
    }
    pub fn original_p_id(&self) -> &str {
        &self.original_p_id
    }
    pub fn original_q_id(&self) -> &str {
        &self.original_q_id
    }
}

// ------------- MatchRecord -------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    p_group_id: String,
    p_id: String,
    q_group_id: String,
    q_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    consensus_set_data: Option<ConsensusSetData>,
    #[serde(default)]
    matches: Matches,
}

impl MatchRecord {
    /// Builds a normalized record.
    pub fn new(
        p_group_id: impl Into<String>,
        p_id: impl Into<String>,
        q_group_id: impl Into<String>,
        q_id: impl Into<String>,
        matches: Matches,
    ) -> Self {
        let mut record = Self {
            p_group_id: p_group_id.into(),
            p_id: p_id.into(),
            q_group_id: q_group_id.into(),
            q_id: q_id.into(),
            consensus_set_data: None,
            matches,
        };
        record.normalize();
        record
    }
    pub fn with_consensus_set_data(mut self, data: ConsensusSetData) -> Self {
        self.consensus_set_data = Some(data);
        self
    }
    pub fn p_group_id(&self) -> &str {
        &self.p_group_id
    }
    pub fn p_id(&self) -> &str {
        &self.p_id
    }
    pub fn q_group_id(&self) -> &str {
        &self.q_group_id
    }
    pub fn q_id(&self) -> &str {
        &self.q_id
    }
    pub fn consensus_set_data(&self) -> Option<&ConsensusSetData> {
        self.consensus_set_data.as_ref()
    }
    pub fn matches(&self) -> &Matches {
        &self.matches
    }
    pub fn len(&self) -> usize {
        self.matches.len()
    }
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
    pub fn is_normalized(&self) -> bool {
        (self.p_group_id.as_str(), self.p_id.as_str()) <= (self.q_group_id.as_str(), self.q_id.as_str())
    }
    /// Puts the record in canonical p/q order, mirroring the payload when the
    /// sides are swapped. Returns true if a swap happened.
    pub fn normalize(&mut self) -> bool {
        if self.is_normalized() {
            return false;
        }
        mem::swap(&mut self.p_group_id, &mut self.q_group_id);
        mem::swap(&mut self.p_id, &mut self.q_id);
        self.matches.swap_sides();
        if let Some(data) = self.consensus_set_data.as_mut() {
            mem::swap(&mut data.original_p_id, &mut data.original_q_id);
        }
        true
    }
    /// The `(pGroupId, qGroupId, pId, qId)` key.
    pub fn key(&self) -> (&str, &str, &str, &str) {
        (&self.p_group_id, &self.q_group_id, &self.p_id, &self.q_id)
    }
    pub fn compare_key(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
    /// Unions the payload of a record with the same key into this one.
    pub fn append_matches(&mut self, other: MatchRecord) -> Result<()> {
        if self.compare_key(&other) != Ordering::Equal {
            return Err(MatchError::InvalidArgument(format!(
                "cannot merge matches for {self} with matches for {other}"
            )));
        }
        self.matches.append(other.matches);
        Ok(())
    }
}

impl fmt::Display for MatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}/{} -> {}/{}",
            self.p_group_id, self.p_id, self.q_group_id, self.q_id
        )
    }
}
