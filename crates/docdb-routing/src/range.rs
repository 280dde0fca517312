//! Partition key ranges over the effective-key hash space
//!
//! The hash space is the set of hex strings ordered lexicographically,
//! from `""` (inclusive) to `"FF"` (exclusive). Each physical
//! partition serves one half-open slice `[min, max)` of it.

use docdb_core::PartitionKeyRangeProperties;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive minimum of the full hash space
pub const FULL_RANGE_MIN: &str = "";
/// Exclusive maximum of the full hash space
pub const FULL_RANGE_MAX: &str = "FF";

/// A contiguous slice of the hashed key space mapped to one physical
/// partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    /// Range id, unique within the collection
    pub id: String,
    /// Inclusive minimum
    pub min_inclusive: String,
    /// Exclusive maximum
    pub max_exclusive: String,
}

impl PartitionKeyRange {
    /// Create a range
    pub fn new(
        id: impl Into<String>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
        }
    }

    /// Whether this range covers the whole hash space
    pub fn is_full_range(&self) -> bool {
        self.min_inclusive == FULL_RANGE_MIN && self.max_exclusive == FULL_RANGE_MAX
    }

    /// Whether an effective-key point falls inside `[min, max)`
    pub fn contains(&self, point: &str) -> bool {
        self.min_inclusive.as_str() <= point && point < self.max_exclusive.as_str()
    }

    /// Whether this range intersects a query range
    pub fn overlaps(&self, query: &QueryRange) -> bool {
        let below_upper = query.min.as_str() < self.max_exclusive.as_str();
        let above_lower = query.max.as_str() > self.min_inclusive.as_str()
            || (query.max_inclusive && query.max == self.min_inclusive);
        below_upper && above_lower
    }
}

impl From<PartitionKeyRangeProperties> for PartitionKeyRange {
    fn from(props: PartitionKeyRangeProperties) -> Self {
        Self {
            id: props.id,
            min_inclusive: props.min_inclusive,
            max_exclusive: props.max_exclusive,
        }
    }
}

impl fmt::Display for PartitionKeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "range {} [{:?}, {:?})",
            self.id, self.min_inclusive, self.max_exclusive
        )
    }
}

/// A caller-supplied range over the effective-key space.
///
/// The minimum is always inclusive; the maximum may be inclusive for
/// point lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRange {
    /// Inclusive minimum
    pub min: String,
    /// Maximum bound
    pub max: String,
    /// Whether `max` itself is part of the range
    pub max_inclusive: bool,
}

impl QueryRange {
    /// Half-open range `[min, max)`
    pub fn half_open(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
            max_inclusive: false,
        }
    }

    /// Single-point range for an effective partition key
    pub fn point(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            min: key.clone(),
            max: key,
            max_inclusive: true,
        }
    }

    /// The full hash space
    pub fn full() -> Self {
        Self::half_open(FULL_RANGE_MIN, FULL_RANGE_MAX)
    }
}

/// Whether a sorted range set is non-overlapping and exactly covers
/// the full hash space (the freshness invariant of a routing entry)
pub fn covers_full_space(ranges: &[PartitionKeyRange]) -> bool {
    if ranges.is_empty() {
        return false;
    }
    let mut expected_min = FULL_RANGE_MIN;
    for range in ranges {
        if range.min_inclusive != expected_min {
            return false;
        }
        if range.max_exclusive.as_str() <= range.min_inclusive.as_str() {
            return false;
        }
        expected_min = &range.max_exclusive;
    }
    expected_min == FULL_RANGE_MAX
}
