//! Acknowledgement sequence ranges.
//!
//! A receiver reports the sequence numbers it holds as a collection of
//! inclusive ranges. `SequenceRangeSet` normalizes such a report into a
//! sorted, coalesced, disjoint form that the controller can query.

use crate::error::{Result, SendError};

/// An inclusive range of sequence numbers, `lower..=upper`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    pub lower: u64,
    pub upper: u64,
}

impl SequenceRange {
    pub fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    /// A range covering a single sequence number.
    pub fn single(seq: u64) -> Self {
        Self { lower: seq, upper: seq }
    }

    /// Number of sequence numbers in the range.
    pub fn len(&self) -> u64 {
        self.upper - self.lower + 1
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.lower <= seq && seq <= self.upper
    }
}

/// A normalized set of acknowledged sequence numbers.
///
/// Ranges are sorted by lower bound, non-overlapping, and adjacent ranges
/// are merged, so every query is a binary search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceRangeSet {
    ranges: Vec<SequenceRange>,
}

impl SequenceRangeSet {
    /// Build a normalized set from an arbitrary (possibly overlapping,
    /// unordered) report. Rejects ranges with `lower > upper` and ranges
    /// touching sequence number 0, which no sender ever assigns.
    pub fn from_ranges(input: &[SequenceRange]) -> Result<Self> {
        for r in input {
            if r.lower == 0 || r.lower > r.upper {
                return Err(SendError::InvalidRange {
                    lower: r.lower,
                    upper: r.upper,
                });
            }
        }

        let mut sorted = input.to_vec();
        sorted.sort_by_key(|r| r.lower);

        let mut ranges: Vec<SequenceRange> = Vec::with_capacity(sorted.len());
        for r in sorted {
            match ranges.last_mut() {
                // Merge overlapping or adjacent ranges.
                Some(prev) if r.lower <= prev.upper.saturating_add(1) => {
                    prev.upper = prev.upper.max(r.upper);
                }
                _ => ranges.push(r),
            }
        }

        Ok(Self { ranges })
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether `seq` is acknowledged by this report.
    pub fn contains(&self, seq: u64) -> bool {
        self.range_containing(seq).is_some()
    }

    /// The normalized range that contains `seq`, if any.
    pub fn range_containing(&self, seq: u64) -> Option<SequenceRange> {
        let idx = self
            .ranges
            .partition_point(|r| r.upper < seq);
        self.ranges
            .get(idx)
            .filter(|r| r.contains(seq))
            .copied()
    }

    /// Whether the whole interval `lower..=upper` is acknowledged.
    ///
    /// Because the set is coalesced, full coverage means a single range
    /// contains both endpoints.
    pub fn covers(&self, lower: u64, upper: u64) -> bool {
        self.range_containing(lower)
            .is_some_and(|r| r.upper >= upper)
    }

    /// The highest acknowledged sequence number in the report.
    pub fn max_upper(&self) -> Option<u64> {
        self.ranges.last().map(|r| r.upper)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SequenceRange> {
        self.ranges.iter()
    }
}
