//! Query feature capability bitmask
//!
//! Advertised to the backend when requesting a query plan, so the
//! returned plan only relies on features this client can execute.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask of query features the client supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupportedFeatures(u64);

impl SupportedFeatures {
    pub const NONE: Self = Self(0);
    pub const AGGREGATE: Self = Self(1);
    pub const COMPOSITE_AGGREGATE: Self = Self(1 << 1);
    pub const DISTINCT: Self = Self(1 << 2);
    pub const GROUP_BY: Self = Self(1 << 3);
    pub const MULTIPLE_ORDER_BY: Self = Self(1 << 4);
    pub const MULTIPLE_AGGREGATES: Self = Self(1 << 5);
    pub const OFFSET_AND_LIMIT: Self = Self(1 << 6);
    pub const ORDER_BY: Self = Self(1 << 7);
    pub const TOP: Self = Self(1 << 8);
    pub const NON_VALUE_AGGREGATE: Self = Self(1 << 9);
    pub const NON_STREAMING_ORDER_BY: Self = Self(1 << 10);
    pub const HYBRID_SEARCH: Self = Self(1 << 11);
    pub const WEIGHTED_RANK_FUSION: Self = Self(1 << 12);
    pub const COUNT_IF: Self = Self(1 << 13);

    /// Every feature this client version can execute
    pub fn all() -> Self {
        Self::AGGREGATE
            | Self::COMPOSITE_AGGREGATE
            | Self::DISTINCT
            | Self::GROUP_BY
            | Self::MULTIPLE_ORDER_BY
            | Self::MULTIPLE_AGGREGATES
            | Self::OFFSET_AND_LIMIT
            | Self::ORDER_BY
            | Self::TOP
            | Self::NON_VALUE_AGGREGATE
            | Self::NON_STREAMING_ORDER_BY
            | Self::HYBRID_SEARCH
            | Self::WEIGHTED_RANK_FUSION
            | Self::COUNT_IF
    }

    /// Whether every flag in `other` is set
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Remove the given flags. Used to narrow the advertised bitmask
    /// when an optimization is disabled; computed once per query and
    /// never re-negotiated mid-query.
    pub fn narrow_by(self, disabled: Self) -> Self {
        Self(self.0 & !disabled.0)
    }

    /// Raw bits, as sent on the capability header
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Header value form
    pub fn header_value(&self) -> String {
        self.0.to_string()
    }
}

impl BitOr for SupportedFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SupportedFeatures {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for SupportedFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_contains_each_flag() {
        let all = SupportedFeatures::all();
        assert!(all.contains(SupportedFeatures::AGGREGATE));
        assert!(all.contains(SupportedFeatures::NON_STREAMING_ORDER_BY));
        assert!(all.contains(SupportedFeatures::HYBRID_SEARCH));
    }

    #[test]
    fn test_narrow_by_removes_flags() {
        let narrowed = SupportedFeatures::all()
            .narrow_by(SupportedFeatures::NON_STREAMING_ORDER_BY | SupportedFeatures::HYBRID_SEARCH);
        assert!(!narrowed.contains(SupportedFeatures::NON_STREAMING_ORDER_BY));
        assert!(!narrowed.contains(SupportedFeatures::HYBRID_SEARCH));
        assert!(narrowed.contains(SupportedFeatures::ORDER_BY));
    }

    #[test]
    fn test_header_value_is_decimal_bits() {
        let features = SupportedFeatures::AGGREGATE | SupportedFeatures::DISTINCT;
        assert_eq!(features.header_value(), "5");
    }
}
