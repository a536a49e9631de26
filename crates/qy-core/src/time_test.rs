use super::*;

fn ts(s: &str) -> Timestamp {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

#[test]
fn test_parse_date_as_start_is_midnight() {
    let now = ts("2024-03-10 12:00:00");
    assert_eq!(parse_start("2024-01-05", now).unwrap(), ts("2024-01-05 00:00:00"));
}

#[test]
fn test_parse_date_as_end_is_next_midnight() {
    let now = ts("2024-03-10 12:00:00");
    assert_eq!(parse_end("2024-01-05", now).unwrap(), ts("2024-01-06 00:00:00"));
}

#[test]
fn test_parse_datetime_is_exact_for_both_bounds() {
    let now = ts("2024-03-10 12:00:00");
    let expected = ts("2024-01-05 03:30:00");
    assert_eq!(parse_start("2024-01-05 03:30:00", now).unwrap(), expected);
    assert_eq!(parse_end("2024-01-05T03:30:00", now).unwrap(), expected);
}

#[test]
fn test_relative_keywords() {
    let now = ts("2024-03-10 12:00:00");
    assert_eq!(parse_start("now", now).unwrap(), now);
    assert_eq!(parse_start("today", now).unwrap(), ts("2024-03-10 00:00:00"));
    assert_eq!(parse_start("yesterday", now).unwrap(), ts("2024-03-09 00:00:00"));
    assert_eq!(parse_end("yesterday", now).unwrap(), ts("2024-03-10 00:00:00"));
}

#[test]
fn test_invalid_time_is_rejected() {
    let err = parse_start("next tuesday", 0).unwrap_err();
    assert!(matches!(err, CoreError::InvalidTime { .. }));
}

#[test]
fn test_formatting() {
    let t = ts("2024-01-05 03:30:00");
    assert_eq!(to_ds(t), "2024-01-05");
    assert_eq!(to_ts(t), "2024-01-05 03:30:00");
    assert_eq!(day_start(t), ts("2024-01-05 00:00:00"));
}
