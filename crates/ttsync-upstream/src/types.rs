//! Domain types for upstream timetable data.
//!
//! All timestamps are UTC instants; the site reports wall-clock times in
//! its own timezone and the client converts on the way in. Field names in
//! the serialized form are camelCase because that is the shape consumers
//! of the cached records expect.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// Timezone the site reports wall-clock times in.
pub(crate) const SITE_TZ: Tz = chrono_tz::Europe::Zurich;

/// Parse a `YYYY-MM-DD HH:MM:SS` site timestamp into a UTC instant.
pub(crate) fn parse_site_datetime(raw: &str) -> Result<DateTime<Utc>, UpstreamError> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| UpstreamError::Parse(format!("bad timestamp {raw:?}: {e}")))?;
    SITE_TZ
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| UpstreamError::Parse(format!("nonexistent local time {raw:?}")))
        .map(|dt| dt.with_timezone(&Utc))
}

/// A semester as listed by the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    pub id: String,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// One schedulable week of a semester. Ids are positional, starting at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Week {
    pub id: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// A class (student group) within a semester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolClass {
    pub id: String,
    pub name: String,
}

/// One slot of the site's time grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: String,
    pub end: String,
}

/// Lesson status, persisted as a plain string.
///
/// Statuses the site may grow that we do not know about surface as
/// [`LessonStatus::Unknown`] rather than failing the whole refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LessonStatus {
    Normal,
    Cancelled,
    Unknown(String),
}

impl LessonStatus {
    /// Map the site's entry-type code onto a status.
    pub fn from_site_code(code: &str) -> Self {
        match code {
            "lesson" => LessonStatus::Normal,
            "cancel" => LessonStatus::Cancelled,
            other => LessonStatus::Unknown(other.to_string()),
        }
    }
}

impl From<String> for LessonStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "normal" => LessonStatus::Normal,
            "cancelled" => LessonStatus::Cancelled,
            _ => LessonStatus::Unknown(value),
        }
    }
}

impl From<LessonStatus> for String {
    fn from(status: LessonStatus) -> Self {
        match status {
            LessonStatus::Normal => "normal".to_string(),
            LessonStatus::Cancelled => "cancelled".to_string(),
            LessonStatus::Unknown(code) => code,
        }
    }
}

/// A single lesson occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub name: String,
    pub full_name: String,
    pub room: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub teacher: Option<String>,
    pub status: LessonStatus,
    pub comment: Option<String>,
}

/// Global metadata scraped from the calendar page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub semesters: Vec<Semester>,
    pub time_slots: Vec<TimeSlot>,
}

impl Metadata {
    /// Derive the week list of a semester.
    ///
    /// The semester range is aligned to Monday..Saturday in the site's
    /// timezone, then walked in 7-day strides; each week runs Monday to
    /// Friday. An unknown semester id yields no weeks.
    pub fn weeks(&self, semester_id: &str) -> Vec<Week> {
        let Some(semester) = self.semesters.iter().find(|s| s.id == semester_id) else {
            return Vec::new();
        };

        let mut cursor = monday_of(semester.start_date);
        let end = monday_of(semester.end_date) + chrono::Duration::days(5);

        let mut weeks = Vec::new();
        let mut id = 0;
        while cursor < end {
            cursor = cursor + chrono::Duration::days(7);
            weeks.push(Week {
                id,
                start_date: cursor,
                end_date: cursor + chrono::Duration::days(4),
            });
            id += 1;
        }
        weeks
    }
}

/// Midnight-preserving Monday of the week containing `instant`, computed in
/// the site's timezone.
fn monday_of(instant: DateTime<Utc>) -> DateTime<Utc> {
    let local = instant.with_timezone(&SITE_TZ);
    let back = i64::from(local.weekday().num_days_from_monday());
    (local - chrono::Duration::days(back)).with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(raw: &str) -> DateTime<Utc> {
        parse_site_datetime(raw).unwrap()
    }

    #[test]
    fn site_timestamps_convert_to_utc() {
        // Winter: UTC+1.
        assert_eq!(
            site("2024-01-15 08:00:00"),
            Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap()
        );
        // Summer: UTC+2.
        assert_eq!(
            site("2024-06-15 08:00:00"),
            Utc.with_ymd_and_hms(2024, 6, 15, 6, 0, 0).unwrap()
        );
        assert!(parse_site_datetime("15.01.2024").is_err());
    }

    #[test]
    fn status_codes_map_with_unknown_fallback() {
        assert_eq!(LessonStatus::from_site_code("lesson"), LessonStatus::Normal);
        assert_eq!(LessonStatus::from_site_code("cancel"), LessonStatus::Cancelled);
        assert_eq!(
            LessonStatus::from_site_code("rmchg"),
            LessonStatus::Unknown("rmchg".to_string())
        );
    }

    #[test]
    fn status_round_trips_through_serde() {
        for status in [
            LessonStatus::Normal,
            LessonStatus::Cancelled,
            LessonStatus::Unknown("exam".to_string()),
        ] {
            let encoded = serde_json::to_string(&status).unwrap();
            let decoded: LessonStatus = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, status);
        }
        assert_eq!(
            serde_json::to_string(&LessonStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn weeks_walk_the_semester_in_monday_strides() {
        let metadata = Metadata {
            semesters: vec![Semester {
                id: "70".to_string(),
                name: "HS".to_string(),
                // 2024-01-01 is a Monday, 2024-01-31 a Wednesday.
                start_date: site("2024-01-01 00:00:00"),
                end_date: site("2024-01-31 00:00:00"),
            }],
            time_slots: Vec::new(),
        };

        let weeks = metadata.weeks("70");
        assert!(!weeks.is_empty());
        assert_eq!(weeks[0].id, 0);
        assert_eq!(weeks[0].start_date, site("2024-01-08 00:00:00"));
        // Monday to Friday.
        assert_eq!(weeks[0].end_date - weeks[0].start_date, chrono::Duration::days(4));
        // Consecutive weeks are exactly seven days apart.
        for pair in weeks.windows(2) {
            assert_eq!(pair[1].start_date - pair[0].start_date, chrono::Duration::days(7));
            assert_eq!(pair[1].id, pair[0].id + 1);
        }

        assert!(metadata.weeks("unknown").is_empty());
    }

    #[test]
    fn weeks_align_midweek_starts_back_to_monday() {
        let metadata = Metadata {
            semesters: vec![Semester {
                id: "71".to_string(),
                name: "FS".to_string(),
                // 2024-02-15 is a Thursday.
                start_date: site("2024-02-15 00:00:00"),
                end_date: site("2024-03-20 00:00:00"),
            }],
            time_slots: Vec::new(),
        };

        let weeks = metadata.weeks("71");
        // Monday of the start week is 2024-02-12; the first stride lands on the 19th.
        assert_eq!(weeks[0].start_date, site("2024-02-19 00:00:00"));
    }
}
