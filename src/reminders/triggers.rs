//! Trigger-time arithmetic. Pure functions over an explicit `now` and time zone.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::config::{ReminderSettings, MAX_SNOOZE_MINUTES};
use crate::models::enums::Weekday;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderTimes {
    pub day_before: NaiveTime,
    pub day_of: NaiveTime,
    pub snooze: Duration,
}

impl Default for ReminderTimes {
    fn default() -> Self {
        Self::from_settings(&ReminderSettings::default())
    }
}

impl ReminderTimes {
    pub fn from_settings(settings: &ReminderSettings) -> Self {
        Self {
            day_before: settings.day_before_time,
            day_of: settings.day_of_time,
            snooze: Duration::minutes(settings.snooze_minutes.clamp(1, MAX_SNOOZE_MINUTES)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppointmentTriggers {
    pub day_before: DateTime<Utc>,
    pub day_of: DateTime<Utc>,
}

/// Wall-clock `date time` in `tz` as an instant.
///
/// Ambiguous times (clocks going back) take the earlier instant. Times that
/// do not exist (clocks going forward) move forward by the gap.
pub fn local_instant<Tz: TimeZone>(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    resolve(tz, date.and_time(time))
}

fn resolve<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Walk forward out of the gap; real gaps are at most a couple of hours
            let mut candidate = naive;
            for _ in 0..(4 * 60) {
                candidate += Duration::minutes(1);
                if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            naive.and_utc()
        }
    }
}

pub fn appointment_triggers<Tz: TimeZone>(
    tz: &Tz,
    date: NaiveDate,
    times: &ReminderTimes,
) -> AppointmentTriggers {
    let eve = date.pred_opt().unwrap_or(date);
    AppointmentTriggers {
        day_before: local_instant(tz, eve, times.day_before),
        day_of: local_instant(tz, date, times.day_of),
    }
}

/// Next `day` at `time` in `tz`, strictly after `after`.
pub fn next_weekly_occurrence<Tz: TimeZone>(
    tz: &Tz,
    day: Weekday,
    time: NaiveTime,
    after: DateTime<Utc>,
) -> DateTime<Utc> {
    let today = after.with_timezone(tz).date_naive();
    let target = day.to_chrono().num_days_from_monday();
    let current = today.weekday().num_days_from_monday();
    let days_ahead = (7 + target - current) % 7;

    let mut date = today + Duration::days(i64::from(days_ahead));
    loop {
        let candidate = local_instant(tz, date, time);
        if candidate > after {
            return candidate;
        }
        date += Duration::days(7);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn snooze_setting_is_clamped() {
        let settings = ReminderSettings {
            snooze_minutes: i64::MAX,
            ..ReminderSettings::default()
        };
        assert_eq!(ReminderTimes::from_settings(&settings).snooze, Duration::days(1));
    }

    #[test]
    fn appointment_on_march_10_triggers_eve_and_morning() {
        let triggers = appointment_triggers(&Utc, d(2025, 3, 10), &ReminderTimes::default());
        assert_eq!(triggers.day_before, Utc.with_ymd_and_hms(2025, 3, 9, 13, 20, 0).unwrap());
        assert_eq!(triggers.day_of, Utc.with_ymd_and_hms(2025, 3, 10, 6, 0, 0).unwrap());
    }

    #[test]
    fn triggers_follow_local_wall_clock() {
        let nairobi = FixedOffset::east_opt(3 * 3600).unwrap();
        let triggers = appointment_triggers(&nairobi, d(2025, 3, 10), &ReminderTimes::default());
        // 13:20 and 06:00 at UTC+3
        assert_eq!(triggers.day_before, Utc.with_ymd_and_hms(2025, 3, 9, 10, 20, 0).unwrap());
        assert_eq!(triggers.day_of, Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap());
    }

    #[test]
    fn day_before_crosses_month_boundary() {
        let triggers = appointment_triggers(&Utc, d(2025, 3, 1), &ReminderTimes::default());
        assert_eq!(triggers.day_before.date_naive(), d(2025, 2, 28));
    }

    #[test]
    fn defaults_come_from_settings() {
        let times = ReminderTimes::default();
        assert_eq!(times.day_before, t(13, 20));
        assert_eq!(times.day_of, t(6, 0));
        assert_eq!(times.snooze, Duration::minutes(5));
    }

    #[test]
    fn next_occurrence_later_today() {
        // 2025-03-10 is a Monday
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap();
        let next = next_weekly_occurrence(&Utc, Weekday::Monday, t(8, 0), now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap());
    }

    #[test]
    fn next_occurrence_rolls_a_week_when_passed() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let next = next_weekly_occurrence(&Utc, Weekday::Monday, t(8, 0), now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 17, 8, 0, 0).unwrap());
    }

    #[test]
    fn next_occurrence_earlier_weekday_is_next_week() {
        let now = Utc.with_ymd_and_hms(2025, 3, 12, 9, 0, 0).unwrap(); // Wednesday
        let next = next_weekly_occurrence(&Utc, Weekday::Tuesday, t(20, 0), now);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 18, 20, 0, 0).unwrap());
    }
}
