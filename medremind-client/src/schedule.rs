//! The client's derived, throwaway view of the reminder schedule.

use chrono_tz::Tz;
use medremind_shared::api::NotificationDto;
use medremind_shared::domain::{NotificationKey, TimeType};
use medremind_shared::schedule::{self, ScheduleTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPrefs {
    pub sound_enabled: bool,
    pub vibration_enabled: bool,
}

impl Default for AlertPrefs {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            vibration_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub key: NotificationKey,
    pub medicine_id: i32,
    pub medicine_name: String,
    pub title: String,
    pub message: String,
    /// `None` when the server value could not be normalized; such entries
    /// are kept for display but never become due.
    pub scheduled_time: Option<ScheduleTime>,
    pub is_active: bool,
    pub dosage: i32,
    pub sound_enabled: bool,
    pub vibration_enabled: bool,
}

impl ScheduledNotification {
    pub fn from_dto(dto: &NotificationDto, tz: Tz, prefs: AlertPrefs) -> Self {
        let scheduled_time = match schedule::normalize_str(&dto.scheduled_time, tz) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(
                    notification_id = dto.id,
                    raw = %dto.scheduled_time,
                    error = %e,
                    "unparsable reminder time; keeping it inactive"
                );
                None
            }
        };
        Self {
            key: NotificationKey::new(dto.id, dto.time_type),
            medicine_id: dto.medicine_id,
            medicine_name: dto.medicine_name.clone(),
            title: dto.title.clone(),
            message: dto.message.clone(),
            is_active: dto.is_active && scheduled_time.is_some(),
            scheduled_time,
            dosage: dto.dosage,
            sound_enabled: prefs.sound_enabled,
            vibration_enabled: prefs.vibration_enabled,
        }
    }

    pub fn notification_id(&self) -> i32 {
        self.key.notification_id
    }

    pub fn time_type(&self) -> TimeType {
        self.key.time_type
    }

    /// Active and scheduled for exactly this minute.
    pub fn is_due_at(&self, minute: ScheduleTime) -> bool {
        self.is_active && self.scheduled_time == Some(minute)
    }
}

/// Rebuilds the whole schedule from server reminders, ordered by time.
pub fn derive(items: &[NotificationDto], tz: Tz, prefs: AlertPrefs) -> Vec<ScheduledNotification> {
    let mut out: Vec<ScheduledNotification> = items
        .iter()
        .map(|dto| ScheduledNotification::from_dto(dto, tz, prefs))
        .collect();
    out.sort_by(|a, b| {
        a.scheduled_time
            .cmp(&b.scheduled_time)
            .then(a.notification_id().cmp(&b.notification_id()))
    });
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn dto(id: i32, medicine_id: i32, time: &str, active: bool) -> NotificationDto {
        NotificationDto {
            id,
            medicine_id,
            medicine_name: format!("Medicine {medicine_id}"),
            dosage: 1,
            title: "Time to take".into(),
            message: "Take 1".into(),
            scheduled_time: time.into(),
            time_type: TimeType::Morning,
            is_active: active,
            group_id: None,
        }
    }

    #[test]
    fn timestamps_are_normalized_to_the_operating_zone() {
        let tz: Tz = "Asia/Seoul".parse().unwrap();
        let n = ScheduledNotification::from_dto(
            &dto(1, 7, "2024-05-01T23:30:00Z", true),
            tz,
            AlertPrefs::default(),
        );
        assert_eq!(n.scheduled_time, Some(ScheduleTime::new(8, 30).unwrap()));
        assert!(n.is_active);
        assert_eq!(n.key.to_string(), "1-morning");
    }

    #[test]
    fn garbage_time_becomes_inactive_instead_of_midnight() {
        let n = ScheduledNotification::from_dto(
            &dto(2, 7, "soon", true),
            chrono_tz::UTC,
            AlertPrefs::default(),
        );
        assert_eq!(n.scheduled_time, None);
        assert!(!n.is_active);
        assert!(!n.is_due_at(ScheduleTime::new(0, 0).unwrap()));
    }

    #[test]
    fn derive_orders_by_time_and_carries_prefs() {
        let prefs = AlertPrefs {
            sound_enabled: false,
            vibration_enabled: true,
        };
        let out = derive(
            &[dto(3, 1, "21:00", true), dto(4, 1, "08:00", true)],
            chrono_tz::UTC,
            prefs,
        );
        assert_eq!(out[0].notification_id(), 4);
        assert_eq!(out[1].notification_id(), 3);
        assert!(!out[0].sound_enabled);
        assert!(out[0].vibration_enabled);
    }
}
