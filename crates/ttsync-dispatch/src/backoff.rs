//! Refresh backoff policy.
//!
//! Weeks near the current week are refreshed every `base_delay_minutes`;
//! each week of distance into the future adds another base delay. Weeks
//! already in the past fall back to a fixed slow cadence instead of a
//! negative interval.

use chrono::{DateTime, Utc};
use ttsync_upstream::Week;

use crate::config::DispatchConfig;
use crate::error::DispatchError;

/// Index of the first week whose end is still in the future.
///
/// Fails with [`DispatchError::WeekOutOfRange`] when every week has ended,
/// rather than scanning past the end of the list.
pub fn current_week_index(weeks: &[Week], now: DateTime<Utc>) -> Result<usize, DispatchError> {
    weeks
        .iter()
        .position(|week| now < week.end_date)
        .ok_or(DispatchError::WeekOutOfRange)
}

/// Delay until a week's timetable should next be refreshed.
pub fn refresh_delay(week: u32, current_week: usize, config: &DispatchConfig) -> chrono::Duration {
    let base = config.base_delay_minutes;
    let minutes = base + base * (i64::from(week) - current_week as i64);
    if minutes <= 0 {
        chrono::Duration::minutes(config.stale_delay_minutes)
    } else {
        chrono::Duration::minutes(minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn week(id: u32, end_day: u32) -> Week {
        Week {
            id,
            start_date: Utc.with_ymd_and_hms(2024, 1, end_day - 4, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 1, end_day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn current_week_is_first_unfinished_week() {
        let weeks = vec![week(0, 5), week(1, 12), week(2, 19)];

        let now = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        assert_eq!(current_week_index(&weeks, now).unwrap(), 1);

        let before_all = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(current_week_index(&weeks, before_all).unwrap(), 0);
    }

    #[test]
    fn scan_past_all_weeks_fails_explicitly() {
        let weeks = vec![week(0, 5), week(1, 12)];
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            current_week_index(&weeks, now),
            Err(DispatchError::WeekOutOfRange)
        ));
        assert!(matches!(
            current_week_index(&[], now),
            Err(DispatchError::WeekOutOfRange)
        ));
    }

    #[test]
    fn delay_grows_with_distance_from_current_week() {
        let config = DispatchConfig::default();

        // Current week: refreshed at the base rate.
        assert_eq!(refresh_delay(2, 2, &config), chrono::Duration::minutes(30));
        // Three weeks ahead.
        assert_eq!(refresh_delay(5, 2, &config), chrono::Duration::minutes(120));
        // Past weeks fall back to the slow cadence.
        assert_eq!(refresh_delay(0, 2, &config), chrono::Duration::minutes(2880));
        assert_eq!(refresh_delay(1, 2, &config), chrono::Duration::minutes(2880));
    }
}
