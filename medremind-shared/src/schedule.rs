//! Minute-resolution time-of-day values and the single normalization path
//! every schedule time goes through before it is stored or matched.

use std::fmt;
use std::str::FromStr;

use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("time out of range: {hour}:{minute}")]
    OutOfRange { hour: u32, minute: u32 },
    #[error("unparsable schedule time: {0:?}")]
    Unparsable(String),
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Time of day at minute granularity. Seconds never survive construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScheduleTime {
    hour: u8,
    minute: u8,
}

impl ScheduleTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, TimeError> {
        if hour > 23 || minute > 59 {
            return Err(TimeError::OutOfRange { hour, minute });
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Truncates any datetime to its wall-clock minute in that datetime's zone.
    pub fn from_datetime<T: TimeZone>(dt: &DateTime<T>) -> Self {
        Self {
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
        }
    }

    /// Current minute in the operating timezone.
    pub fn current(now: DateTime<Utc>, tz: Tz) -> Self {
        Self::from_datetime(&now.with_timezone(&tz))
    }

    /// The instant this time of day falls on for a local calendar `date`.
    pub fn on_date(&self, date: NaiveDate, tz: Tz) -> DateTime<Utc> {
        let naive = date.and_hms_opt(u32::from(self.hour), u32::from(self.minute), 0);
        resolve_local(naive.unwrap_or_else(|| date.and_time(NaiveTime::MIN)), tz)
    }

    /// Accepts `H:MM`, `HH:MM` and `HH:MM:SS`; seconds are discarded.
    pub fn parse_hhmm(input: &str) -> Result<Self, TimeError> {
        let bad = || TimeError::Unparsable(input.to_string());
        let parts: Vec<&str> = input.trim().split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(bad());
        }
        let digits = |s: &str, min_len: usize| {
            (min_len..=2).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(parts[0], 1) || !digits(parts[1], 2) {
            return Err(bad());
        }
        if let Some(secs) = parts.get(2).copied()
            && (!digits(secs, 2) || secs.parse::<u32>().map_err(|_| bad())? > 59)
        {
            return Err(bad());
        }
        let hour = parts[0].parse::<u32>().map_err(|_| bad())?;
        let minute = parts[1].parse::<u32>().map_err(|_| bad())?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ScheduleTime {
    type Err = TimeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hhmm(s)
    }
}

impl Serialize for ScheduleTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScheduleTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Every shape a schedule time arrives in: `{hour, minute}`, a full timestamp,
/// or a bare `HH:mm` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleInput {
    HourMinute { hour: u32, minute: u32 },
    Text(String),
}

impl From<&str> for ScheduleInput {
    fn from(value: &str) -> Self {
        ScheduleInput::Text(value.to_string())
    }
}

/// Normalizes any [`ScheduleInput`] into a [`ScheduleTime`] in `tz`.
///
/// Timestamps carrying an offset are converted into `tz`; naive timestamps are
/// read as UTC. Invalid input is an error, never a default.
pub fn normalize(input: &ScheduleInput, tz: Tz) -> Result<ScheduleTime, TimeError> {
    match input {
        ScheduleInput::HourMinute { hour, minute } => ScheduleTime::new(*hour, *minute),
        ScheduleInput::Text(text) => normalize_str(text, tz),
    }
}

pub fn normalize_str(text: &str, tz: Tz) -> Result<ScheduleTime, TimeError> {
    let trimmed = text.trim();
    if !trimmed.contains('T') && !trimmed.contains('-') && !trimmed.contains(' ') {
        return ScheduleTime::parse_hhmm(trimmed);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ScheduleTime::from_datetime(&dt.with_timezone(&tz)));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            let utc = Utc.from_utc_datetime(&naive);
            return Ok(ScheduleTime::from_datetime(&utc.with_timezone(&tz)));
        }
    }
    Err(TimeError::Unparsable(text.to_string()))
}

pub fn parse_timezone(name: &str) -> Result<Tz, TimeError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TimeError::UnknownTimezone(name.to_string()))
}

/// UTC bounds `[start, end)` of the local calendar day containing `now`.
pub fn local_day_bounds(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = now.with_timezone(&tz).date_naive();
    let start = local_midnight(date, tz);
    let end = date
        .succ_opt()
        .map(|next| local_midnight(next, tz))
        .unwrap_or(start + Duration::days(1));
    (start, end)
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    resolve_local(date.and_time(NaiveTime::MIN), tz)
}

fn resolve_local(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Wall time skipped by a DST jump; use the first valid instant after it.
        LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&local)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seoul() -> Tz {
        parse_timezone("Asia/Seoul").unwrap()
    }

    #[test]
    fn bare_strings_normalize_and_drop_seconds() {
        let tz = seoul();
        assert_eq!(normalize_str("08:30", tz).unwrap().to_string(), "08:30");
        assert_eq!(normalize_str("8:05", tz).unwrap().to_string(), "08:05");
        assert_eq!(normalize_str("21:45:59", tz).unwrap().to_string(), "21:45");
    }

    #[test]
    fn hour_minute_objects_are_range_checked() {
        let tz = seoul();
        let ok = ScheduleInput::HourMinute { hour: 23, minute: 59 };
        assert_eq!(normalize(&ok, tz).unwrap().to_string(), "23:59");
        let bad = ScheduleInput::HourMinute { hour: 24, minute: 0 };
        assert_eq!(
            normalize(&bad, tz),
            Err(TimeError::OutOfRange { hour: 24, minute: 0 })
        );
    }

    #[test]
    fn timestamps_are_converted_into_operating_zone() {
        let tz = seoul();
        // 23:00 UTC is 08:00 the next day in Seoul (+09:00)
        assert_eq!(
            normalize_str("1970-01-01T23:00:00.000Z", tz).unwrap().to_string(),
            "08:00"
        );
        assert_eq!(
            normalize_str("2024-03-01T08:15:00+09:00", tz).unwrap().to_string(),
            "08:15"
        );
        assert_eq!(
            normalize_str("2024-03-01 00:30:00", tz).unwrap().to_string(),
            "09:30"
        );
    }

    #[test]
    fn garbage_is_rejected_not_defaulted_to_midnight() {
        let tz = seoul();
        for input in ["", "abc", "25:00", "12:60", "12:5", "12:30:75", "1:2:3:4", "2024-13-45"] {
            assert!(normalize_str(input, tz).is_err(), "{input:?} should fail");
        }
    }

    #[test]
    fn untagged_input_deserializes_from_both_shapes() {
        let obj: ScheduleInput = serde_json::from_str(r#"{"hour":7,"minute":5}"#).unwrap();
        assert_eq!(obj, ScheduleInput::HourMinute { hour: 7, minute: 5 });
        let text: ScheduleInput = serde_json::from_str(r#""07:05""#).unwrap();
        assert_eq!(text, ScheduleInput::Text("07:05".into()));
    }

    #[test]
    fn current_minute_truncates_seconds_in_zone() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 15).unwrap();
        assert_eq!(ScheduleTime::current(now, seoul()).to_string(), "08:00");
    }

    #[test]
    fn day_bounds_follow_local_calendar() {
        // 2024-05-01 16:00 UTC is 2024-05-02 01:00 in Seoul
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 16, 0, 0).unwrap();
        let (start, end) = local_day_bounds(now, seoul());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 5, 2, 15, 0, 0).unwrap());
    }

    #[test]
    fn schedule_time_resolves_on_a_local_date() {
        let t = ScheduleTime::new(8, 30).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert_eq!(
            t.on_date(date, seoul()),
            Utc.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap()
        );
    }

    #[test]
    fn unknown_timezone_is_reported() {
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(TimeError::UnknownTimezone(_))
        ));
    }
}
