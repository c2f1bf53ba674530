// =============================================================================
// Syncwave Matrix Sliding Sync Proxy - Range Set Module
// =============================================================================
//
// Project: Syncwave - High Performance Matrix Sliding Sync Proxy
// Author: Syncwave Development Team
// Date: 2026-06-15
// Version: 0.2.0
// License: Apache 2.0
//
// Description:
//   The set of index ranges a connection currently tracks. Stored
//   canonicalised: sorted by lower bound, touching or overlapping intervals
//   merged.
//
// =============================================================================

use serde::{Deserialize, Serialize};

/// An ordered set of inclusive `[lo, hi]` index intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[u64; 2]>", into = "Vec<[u64; 2]>")]
pub struct SliceRanges(Vec<[u64; 2]>);

impl TryFrom<Vec<[u64; 2]>> for SliceRanges {
    type Error = String;

    fn try_from(ranges: Vec<[u64; 2]>) -> Result<Self, Self::Error> {
        for r in &ranges {
            if r[0] > r[1] {
                return Err(format!("rooms: invalid range [{}, {}]: lo > hi", r[0], r[1]));
            }
        }
        Ok(Self::canonicalise(ranges))
    }
}

impl From<SliceRanges> for Vec<[u64; 2]> {
    fn from(ranges: SliceRanges) -> Self {
        ranges.0
    }
}

impl SliceRanges {
    fn canonicalise(mut ranges: Vec<[u64; 2]>) -> Self {
        ranges.sort_unstable_by_key(|r| r[0]);
        let mut merged: Vec<[u64; 2]> = Vec::with_capacity(ranges.len());
        for r in ranges {
            match merged.last_mut() {
                // merge when overlapping or touching
                Some(prev) if r[0] <= prev[1].saturating_add(1) => {
                    prev[1] = prev[1].max(r[1]);
                }
                _ => merged.push(r),
            }
        }
        Self(merged)
    }

    pub fn new(ranges: Vec<[u64; 2]>) -> Self {
        Self::canonicalise(ranges.into_iter().filter(|r| r[0] <= r[1]).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = [u64; 2]> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Is `index` inside some tracked interval?
    pub fn contains(&self, index: u64) -> bool {
        self.0.iter().any(|r| r[0] <= index && index <= r[1])
    }

    /// The interval containing `index`, if any.
    pub fn range_containing(&self, index: u64) -> Option<[u64; 2]> {
        self.0.iter().copied().find(|r| r[0] <= index && index <= r[1])
    }

    /// Intervals present in `self` but not in `prev`.
    ///
    /// This is an exact-interval set difference: a window that merely grew
    /// is treated as a fresh interval and re-SYNCed in full, which keeps the
    /// client's bookkeeping trivial.
    pub fn added_since(&self, prev: &SliceRanges) -> Vec<[u64; 2]> {
        self.0.iter().copied().filter(|r| !prev.0.contains(r)).collect()
    }

    /// Intervals present in `prev` but not in `self`.
    pub fn removed_since(&self, prev: &SliceRanges) -> Vec<[u64; 2]> {
        prev.added_since(self)
    }

    /// All intervals intersected with `[0, len - 1]`, empties dropped.
    pub fn clamp(&self, len: u64) -> SliceRanges {
        if len == 0 {
            return SliceRanges::default();
        }
        Self(
            self.0
                .iter()
                .filter(|r| r[0] < len)
                .map(|r| [r[0], r[1].min(len - 1)])
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(v: Vec<[u64; 2]>) -> SliceRanges {
        SliceRanges::new(v)
    }

    #[test]
    fn test_canonicalise_sorts_and_merges() {
        let r = ranges(vec![[4, 6], [0, 2], [2, 3]]);
        assert_eq!(Vec::<[u64; 2]>::from(r), vec![[0, 6]]);

        let r = ranges(vec![[0, 2], [4, 6]]);
        assert_eq!(Vec::<[u64; 2]>::from(r), vec![[0, 2], [4, 6]]);
    }

    #[test]
    fn test_contains() {
        let r = ranges(vec![[0, 2], [4, 6]]);
        assert!(r.contains(0));
        assert!(r.contains(2));
        assert!(!r.contains(3));
        assert!(r.contains(6));
        assert!(!r.contains(7));
    }

    #[test]
    fn test_added_and_removed_since() {
        let prev = ranges(vec![[0, 2]]);
        let next = ranges(vec![[0, 2], [4, 6]]);
        assert_eq!(next.added_since(&prev), vec![[4, 6]]);
        assert!(next.removed_since(&prev).is_empty());
        assert_eq!(prev.removed_since(&next), vec![[4, 6]]);

        // everything is new on a first request
        assert_eq!(next.added_since(&SliceRanges::default()), vec![[0, 2], [4, 6]]);
    }

    #[test]
    fn test_clamp() {
        let r = ranges(vec![[0, 9], [20, 30]]);
        assert_eq!(Vec::<[u64; 2]>::from(r.clamp(3)), vec![[0, 2]]);
        assert!(r.clamp(0).is_empty());
    }

    #[test]
    fn test_rejects_inverted_interval() {
        let err = serde_json::from_value::<SliceRanges>(serde_json::json!([[5, 2]]));
        assert!(err.is_err());

        // negative indices fail u64 deserialisation
        let err = serde_json::from_value::<SliceRanges>(serde_json::json!([[-1, 2]]));
        assert!(err.is_err());
    }

    #[test]
    fn test_range_containing() {
        let r = ranges(vec![[0, 2], [4, 6]]);
        assert_eq!(r.range_containing(5), Some([4, 6]));
        assert_eq!(r.range_containing(3), None);
    }
}
