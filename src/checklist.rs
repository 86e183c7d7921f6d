//! Pure checklist mutations shared by the façade and the reconciliation job.

use chrono::{DateTime, Duration, Utc};

use crate::models::{stored_precision, ChecklistEntry};

/// Record a dose as taken at `now`, to the millisecond.
pub fn mark_taken(entry: &mut ChecklistEntry, now: DateTime<Utc>) {
    entry.checked = Some(true);
    entry.timestamp = Some(stored_precision(now));
}

/// Undo a tick. The slot looks as if it had been reset.
pub fn mark_not_taken(entry: &mut ChecklistEntry) {
    entry.checked = Some(false);
    entry.timestamp = None;
}

/// Oldest check time that still counts as current.
/// A threshold reaching past the representable range makes nothing stale.
pub fn stale_cutoff(now: DateTime<Utc>, stale_after_days: i64) -> DateTime<Utc> {
    Duration::try_days(stale_after_days)
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A checked entry whose timestamp is strictly older than `cutoff`.
pub fn is_stale(entry: &ChecklistEntry, cutoff: DateTime<Utc>) -> bool {
    entry.is_checked() && entry.timestamp.is_some_and(|ts| ts < cutoff)
}

/// Reset stale entries in place, keeping their times. Returns how many changed.
pub fn reset_stale(entries: &mut [ChecklistEntry], cutoff: DateTime<Utc>) -> usize {
    let mut reset = 0;
    for entry in entries.iter_mut().filter(|e| is_stale(e, cutoff)) {
        mark_not_taken(entry);
        reset += 1;
    }
    reset
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn checked_at(ts: DateTime<Utc>) -> ChecklistEntry {
        ChecklistEntry {
            time: NaiveTime::from_hms_opt(8, 0, 0),
            checked: Some(true),
            timestamp: Some(ts),
        }
    }

    #[test]
    fn mark_taken_sets_flag_and_time() {
        let mut e = ChecklistEntry::default();
        mark_taken(&mut e, now());
        assert_eq!(e.checked, Some(true));
        assert_eq!(e.timestamp, Some(now()));
    }

    #[test]
    fn tick_time_survives_storage_unchanged() {
        use crate::db::repository::{format_ts, parse_ts};

        let precise = now() + Duration::nanoseconds(214_631_002);
        let mut e = ChecklistEntry::default();
        mark_taken(&mut e, precise);

        let ts = e.timestamp.unwrap();
        assert_eq!(ts, now() + Duration::milliseconds(214));
        assert_eq!(parse_ts("timestamp", &format_ts(&ts)).unwrap(), ts);
    }

    #[test]
    fn huge_threshold_marks_nothing_stale() {
        let cutoff = stale_cutoff(now(), i64::MAX);
        assert!(!is_stale(&checked_at(now() - Duration::days(3650)), cutoff));
    }

    #[test]
    fn threshold_is_strict() {
        let cutoff = stale_cutoff(now(), 7);
        assert!(is_stale(&checked_at(now() - Duration::days(7) - Duration::seconds(1)), cutoff));
        assert!(!is_stale(&checked_at(now() - Duration::days(7)), cutoff));
        assert!(!is_stale(&checked_at(now() - Duration::days(6) - Duration::hours(23)), cutoff));
    }

    #[test]
    fn unchecked_or_untimed_entries_never_stale() {
        let cutoff = stale_cutoff(now(), 7);
        let old = now() - Duration::days(30);
        assert!(!is_stale(&ChecklistEntry::default(), cutoff));
        assert!(!is_stale(
            &ChecklistEntry { time: None, checked: Some(false), timestamp: Some(old) },
            cutoff
        ));
        assert!(!is_stale(&ChecklistEntry { time: None, checked: Some(true), timestamp: None }, cutoff));
    }

    #[test]
    fn reset_keeps_time_and_counts() {
        let cutoff = stale_cutoff(now(), 7);
        let mut entries = vec![
            checked_at(now() - Duration::days(9)),
            checked_at(now() - Duration::days(2)),
            ChecklistEntry::default(),
        ];
        assert_eq!(reset_stale(&mut entries, cutoff), 1);
        assert_eq!(entries[0].time, NaiveTime::from_hms_opt(8, 0, 0));
        assert_eq!(entries[0].checked, Some(false));
        assert_eq!(entries[0].timestamp, None);
        assert_eq!(entries[1].checked, Some(true));
        assert_eq!(reset_stale(&mut entries, cutoff), 0);
    }
}
