use super::*;

fn iv(start: i64, end: i64) -> Interval {
    Interval::new(start, end).unwrap()
}

#[test]
fn test_interval_rejects_inverted_bounds() {
    assert!(matches!(
        Interval::new(5, 5),
        Err(CoreError::InvalidInterval { .. })
    ));
}

#[test]
fn test_merge_coalesces_adjacent_and_overlapping() {
    let merged = merge_intervals(vec![iv(10, 20), iv(0, 5), iv(5, 8), iv(15, 30)]);
    assert_eq!(merged, vec![iv(0, 8), iv(10, 30)]);
}

#[test]
fn test_add_interval_keeps_list_merged() {
    let mut intervals = vec![iv(0, 10)];
    add_interval(&mut intervals, iv(10, 20));
    add_interval(&mut intervals, iv(30, 40));
    assert_eq!(intervals, vec![iv(0, 20), iv(30, 40)]);
}

#[test]
fn test_remove_interval_splits() {
    let mut intervals = vec![iv(0, 100)];
    remove_interval(&mut intervals, iv(40, 60));
    assert_eq!(intervals, vec![iv(0, 40), iv(60, 100)]);

    remove_interval(&mut intervals, iv(0, 50));
    assert_eq!(intervals, vec![iv(60, 100)]);
}

#[test]
fn test_missing_intervals_skips_covered_days() {
    let covered = vec![iv(DAY_MS, 2 * DAY_MS)];
    let missing = missing_intervals(&covered, 0, 3 * DAY_MS, IntervalUnit::Day);
    assert_eq!(missing, vec![iv(0, DAY_MS), iv(2 * DAY_MS, 3 * DAY_MS)]);
}

#[test]
fn test_missing_intervals_excludes_partial_trailing_unit() {
    let missing = missing_intervals(&[], 0, DAY_MS + HOUR_MS, IntervalUnit::Day);
    assert_eq!(missing, vec![iv(0, DAY_MS)]);
}

#[test]
fn test_missing_intervals_hourly() {
    let missing = missing_intervals(&[iv(0, HOUR_MS)], 0, 3 * HOUR_MS, IntervalUnit::Hour);
    assert_eq!(missing.len(), 2);
    assert_eq!(missing[0], iv(HOUR_MS, 2 * HOUR_MS));
}

#[test]
fn test_chunk_without_batch_size_merges_runs() {
    let units = vec![iv(0, DAY_MS), iv(DAY_MS, 2 * DAY_MS), iv(3 * DAY_MS, 4 * DAY_MS)];
    let batches = chunk(&units, IntervalUnit::Day, None);
    assert_eq!(batches, vec![iv(0, 2 * DAY_MS), iv(3 * DAY_MS, 4 * DAY_MS)]);
}

#[test]
fn test_chunk_with_batch_size() {
    let units: Vec<Interval> = (0..5).map(|d| iv(d * DAY_MS, (d + 1) * DAY_MS)).collect();
    let batches = chunk(&units, IntervalUnit::Day, Some(2));
    assert_eq!(
        batches,
        vec![iv(0, 2 * DAY_MS), iv(2 * DAY_MS, 4 * DAY_MS), iv(4 * DAY_MS, 5 * DAY_MS)]
    );
}

#[test]
fn test_subtract_and_coverage() {
    let covered = vec![iv(0, 10), iv(20, 30)];
    assert_eq!(subtract(&covered, iv(5, 25)), vec![iv(10, 20)]);
    assert!(is_covered(&covered, iv(0, 10)));
    assert!(!is_covered(&covered, iv(0, 11)));
}

#[test]
fn test_span() {
    assert_eq!(span(&[iv(5, 10), iv(0, 3)]), Some(iv(0, 10)));
    assert_eq!(span(&[]), None);
}
