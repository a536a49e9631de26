//! Half-open time intervals and the arithmetic used to track which ranges of
//! a snapshot's data have been materialized.

use crate::error::{CoreError, CoreResult};
use crate::time::{Timestamp, DAY_MS, HOUR_MS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cadence at which a model's data is partitioned and backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    /// One interval per UTC day
    #[default]
    Day,
    /// One interval per hour
    Hour,
}

impl IntervalUnit {
    /// Length of a single unit in milliseconds.
    pub fn millis(&self) -> i64 {
        match self {
            IntervalUnit::Day => DAY_MS,
            IntervalUnit::Hour => HOUR_MS,
        }
    }

    /// Round `ts` down to the unit boundary.
    pub fn floor(&self, ts: Timestamp) -> Timestamp {
        ts.div_euclid(self.millis()) * self.millis()
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalUnit::Day => write!(f, "day"),
            IntervalUnit::Hour => write!(f, "hour"),
        }
    }
}

/// A half-open `[start, end)` range of epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    /// Create an interval, rejecting empty or inverted bounds.
    pub fn new(start: Timestamp, end: Timestamp) -> CoreResult<Self> {
        if start >= end {
            return Err(CoreError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// True when the two intervals share at least one instant.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `other` lies entirely within `self`.
    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            crate::time::to_ts(self.start),
            crate::time::to_ts(self.end)
        )
    }
}

/// Sort and coalesce overlapping or adjacent intervals.
pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort();
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Add `new` to a merged interval list, keeping it merged.
pub fn add_interval(intervals: &mut Vec<Interval>, new: Interval) {
    let mut all = std::mem::take(intervals);
    all.push(new);
    *intervals = merge_intervals(all);
}

/// Remove `removed` from a merged interval list, splitting where needed.
pub fn remove_interval(intervals: &mut Vec<Interval>, removed: Interval) {
    let mut result = Vec::with_capacity(intervals.len() + 1);
    for interval in intervals.drain(..) {
        if !interval.overlaps(&removed) {
            result.push(interval);
            continue;
        }
        if interval.start < removed.start {
            result.push(Interval {
                start: interval.start,
                end: removed.start,
            });
        }
        if removed.end < interval.end {
            result.push(Interval {
                start: removed.end,
                end: interval.end,
            });
        }
    }
    *intervals = result;
}

/// Parts of `range` not covered by `covered`.
pub fn subtract(covered: &[Interval], range: Interval) -> Vec<Interval> {
    let mut remaining = vec![range];
    for interval in covered {
        remove_interval(&mut remaining, *interval);
    }
    remaining
}

/// True when every instant of `range` is covered.
pub fn is_covered(covered: &[Interval], range: Interval) -> bool {
    subtract(covered, range).is_empty()
}

/// Unit-sized intervals inside `[start, end)` that are not fully covered.
///
/// `start` is rounded down to the unit boundary; a trailing partial unit is
/// never returned because its data is not complete yet.
pub fn missing_intervals(
    covered: &[Interval],
    start: Timestamp,
    end: Timestamp,
    unit: IntervalUnit,
) -> Vec<Interval> {
    let step = unit.millis();
    let mut cursor = unit.floor(start);
    let mut missing = Vec::new();
    while cursor + step <= end {
        let candidate = Interval {
            start: cursor,
            end: cursor + step,
        };
        if !is_covered(covered, candidate) {
            missing.push(candidate);
        }
        cursor += step;
    }
    missing
}

/// Group unit-sized intervals into backfill batches.
///
/// With `batch_size = None` every contiguous run becomes a single batch;
/// otherwise runs are split into batches of at most `batch_size` units.
pub fn chunk(intervals: &[Interval], unit: IntervalUnit, batch_size: Option<usize>) -> Vec<Interval> {
    let runs = merge_intervals(intervals.to_vec());
    let Some(size) = batch_size.filter(|s| *s > 0) else {
        return runs;
    };
    let width = unit.millis() * size as i64;
    let mut batches = Vec::new();
    for run in runs {
        let mut cursor = run.start;
        while cursor < run.end {
            let end = (cursor + width).min(run.end);
            batches.push(Interval { start: cursor, end });
            cursor = end;
        }
    }
    batches
}

/// Smallest interval spanning every element, if any.
pub fn span(intervals: &[Interval]) -> Option<Interval> {
    let start = intervals.iter().map(|i| i.start).min()?;
    let end = intervals.iter().map(|i| i.end).max()?;
    Some(Interval { start, end })
}

#[cfg(test)]
#[path = "interval_test.rs"]
mod tests;
