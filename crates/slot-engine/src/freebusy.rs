//! Merge busy periods and compute the free time between them.
//!
//! Busy intervals are sorted by start, then overlapping or touching intervals
//! are merged. Free time is the complement of the merged set within a window.

use crate::interval::{BusyInterval, TimeRange};

/// Merge overlapping or adjacent busy intervals.
///
/// Two intervals merge when one's start is `<=` the other's end. The result is
/// sorted by start and non-overlapping; merging an already merged list returns
/// it unchanged.
pub fn merge_busy(intervals: &[BusyInterval]) -> Vec<BusyInterval> {
    let mut sorted: Vec<BusyInterval> = intervals
        .iter()
        .filter(|b| b.start < b.end)
        .copied()
        .collect();

    // Sort by start time (then by end time for stability).
    sorted.sort_by_key(|b| (b.start, b.end));

    let mut merged: Vec<BusyInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        if let Some(last) = merged.last_mut() {
            if interval.start <= last.end {
                last.end = last.end.max(interval.end);
                continue;
            }
        }
        merged.push(interval);
    }

    merged
}

/// Clip busy intervals to `window`, discarding those entirely outside it, and
/// merge the remainder.
pub fn merge_busy_within(intervals: &[BusyInterval], window: &TimeRange) -> Vec<BusyInterval> {
    let clipped: Vec<BusyInterval> = intervals
        .iter()
        .filter_map(|b| {
            b.range()
                .clip(window)
                .map(|r| BusyInterval::new(r, b.source))
        })
        .collect();
    merge_busy(&clipped)
}

/// Free ranges inside `window` not covered by any busy interval.
///
/// Busy input may be unsorted or overlapping; it is merged first.
pub fn free_intervals(busy: &[BusyInterval], window: &TimeRange) -> Vec<TimeRange> {
    let merged = merge_busy_within(busy, window);

    let mut free = Vec::with_capacity(merged.len() + 1);
    let mut cursor = window.start;

    for b in &merged {
        if cursor < b.start {
            free.push(TimeRange {
                start: cursor,
                end: b.start,
            });
        }
        cursor = cursor.max(b.end);
    }

    // Trailing free range after the last busy period.
    if cursor < window.end {
        free.push(TimeRange {
            start: cursor,
            end: window.end,
        });
    }

    free
}

/// Remove every `hole` from a sorted list of disjoint ranges.
pub fn subtract_ranges(ranges: &[TimeRange], holes: &[TimeRange]) -> Vec<TimeRange> {
    if holes.is_empty() {
        return ranges.to_vec();
    }

    let mut holes = holes.to_vec();
    holes.sort();

    let mut out = Vec::with_capacity(ranges.len());
    for range in ranges {
        let mut cursor = range.start;
        for hole in holes.iter().filter(|h| h.overlaps(range)) {
            if cursor < hole.start {
                out.push(TimeRange {
                    start: cursor,
                    end: hole.start,
                });
            }
            cursor = cursor.max(hole.end);
        }
        if cursor < range.end {
            out.push(TimeRange {
                start: cursor,
                end: range.end,
            });
        }
    }
    out
}

/// First free range of at least `min_duration_minutes` inside the window.
pub fn find_first_free(
    busy: &[BusyInterval],
    window: &TimeRange,
    min_duration_minutes: i64,
) -> Option<TimeRange> {
    free_intervals(busy, window)
        .into_iter()
        .find(|r| r.duration_minutes() >= min_duration_minutes)
}
