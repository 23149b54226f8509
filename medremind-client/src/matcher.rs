//! Time Matcher: which active reminders are due in the current minute.
//!
//! The schedule is held as one `Arc<Vec<_>>` and swapped in a single
//! assignment, so an evaluation sees either the old list or the new one.
//! A per-day fired set keeps a reminder from dispatching twice when two
//! ticks land in the same minute.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use medremind_shared::domain::NotificationKey;
use medremind_shared::schedule::ScheduleTime;

use crate::schedule::ScheduledNotification;

/// Pure due-set contract: active entries scheduled for exactly `minute`.
pub fn due_set(entries: &[ScheduledNotification], minute: ScheduleTime) -> Vec<&ScheduledNotification> {
    entries.iter().filter(|e| e.is_due_at(minute)).collect()
}

#[derive(Debug, Default)]
struct FiredSet {
    day: Option<NaiveDate>,
    fired: HashSet<(NotificationKey, ScheduleTime)>,
}

#[derive(Debug)]
pub struct TimeMatcher {
    tz: Tz,
    schedule: RwLock<Arc<Vec<ScheduledNotification>>>,
    fired: Mutex<FiredSet>,
}

impl TimeMatcher {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            schedule: RwLock::new(Arc::new(Vec::new())),
            fired: Mutex::new(FiredSet::default()),
        }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn replace(&self, entries: Vec<ScheduledNotification>) {
        let next = Arc::new(entries);
        *self.schedule.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn snapshot(&self) -> Arc<Vec<ScheduledNotification>> {
        self.schedule
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find(&self, notification_id: i32) -> Option<ScheduledNotification> {
        self.snapshot()
            .iter()
            .find(|e| e.notification_id() == notification_id)
            .cloned()
    }

    /// Entries due at `now` that have not fired yet today; they are marked
    /// fired before being returned.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Vec<ScheduledNotification> {
        let local = now.with_timezone(&self.tz);
        let minute = ScheduleTime::from_datetime(&local);
        let today = local.date_naive();
        let snapshot = self.snapshot();

        let mut fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        if fired.day != Some(today) {
            fired.day = Some(today);
            fired.fired.clear();
        }
        due_set(&snapshot, minute)
            .into_iter()
            .filter(|e| fired.fired.insert((e.key.clone(), minute)))
            .cloned()
            .collect()
    }
}

/// Sleep needed to land just after the next minute boundary.
pub fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute = Duration::from_secs(u64::from(now.second()))
        + Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000));
    Duration::from_secs(60).saturating_sub(into_minute) + Duration::from_millis(200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::tests::dto;
    use crate::schedule::{AlertPrefs, derive};
    use chrono::TimeZone;

    fn matcher_with(items: &[(i32, &str, bool)]) -> TimeMatcher {
        let m = TimeMatcher::new(chrono_tz::UTC);
        let dtos: Vec<_> = items
            .iter()
            .map(|(id, t, active)| dto(*id, 7, t, *active))
            .collect();
        m.replace(derive(&dtos, chrono_tz::UTC, AlertPrefs::default()));
        m
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn inactive_reminders_are_never_due() {
        let m = matcher_with(&[(1, "08:30", false)]);
        for minute in 0..60 {
            assert!(m.evaluate(at(8, minute, 0)).is_empty());
        }
    }

    #[test]
    fn due_exactly_within_the_matching_minute() {
        let snapshot = matcher_with(&[(1, "08:30", true)]).snapshot();
        let due = |h, m| !due_set(&snapshot, ScheduleTime::new(h, m).unwrap()).is_empty();
        assert!(due(8, 30));
        assert!(!due(8, 29));
        assert!(!due(8, 31));

        for secs in [0, 15, 59] {
            let m = matcher_with(&[(1, "08:30", true)]);
            assert_eq!(m.evaluate(at(8, 30, secs)).len(), 1, "at 08:30:{secs:02}");
        }
    }

    #[test]
    fn second_tick_in_same_minute_does_not_refire() {
        let m = matcher_with(&[(1, "08:00", true)]);
        assert_eq!(m.evaluate(at(8, 0, 1)).len(), 1);
        assert!(m.evaluate(at(8, 0, 58)).is_empty());
    }

    #[test]
    fn fires_again_the_next_day() {
        let m = matcher_with(&[(1, "08:00", true)]);
        assert_eq!(m.evaluate(at(8, 0, 0)).len(), 1);
        let tomorrow = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
        assert_eq!(m.evaluate(tomorrow).len(), 1);
    }

    #[test]
    fn missed_minute_is_not_caught_up() {
        let m = matcher_with(&[(1, "08:00", true)]);
        assert!(m.evaluate(at(8, 1, 0)).is_empty());
        assert!(m.evaluate(at(8, 2, 0)).is_empty());
    }

    #[test]
    fn replace_swaps_whole_schedule() {
        let m = matcher_with(&[(1, "08:00", true), (2, "09:00", true)]);
        let before = m.snapshot();
        m.replace(Vec::new());
        assert_eq!(before.len(), 2);
        assert!(m.snapshot().is_empty());
        assert!(m.evaluate(at(8, 0, 0)).is_empty());
    }

    #[test]
    fn next_minute_delay_is_bounded() {
        let d = until_next_minute(at(8, 0, 45));
        assert_eq!(d, Duration::from_millis(15_200));
        assert!(until_next_minute(at(8, 0, 0)) <= Duration::from_millis(60_200));
    }
}
