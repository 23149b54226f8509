use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::AppError;
use crate::schedule::ScheduledNotification;

const APP_NAME: &str = "MedRemind";
const REPLACE_ID_BASE: u32 = 20_000;

/// Desktop notifications over the freedesktop notification service.
#[derive(Debug, Default)]
pub struct Notifier {
    shown: Mutex<HashSet<u32>>,
}

fn replace_id(reminder: &ScheduledNotification) -> u32 {
    REPLACE_ID_BASE.wrapping_add(reminder.notification_id().unsigned_abs())
}

impl Notifier {
    pub fn new() -> Self {
        debug!("Linux Notifier created");
        Self::default()
    }

    pub async fn show(&self, reminder: &ScheduledNotification) -> Result<(), AppError> {
        let id = replace_id(reminder);
        debug!(
            notification_id = reminder.notification_id(),
            replace_id = id,
            "show: building notification"
        );
        let mut n = notify_rust::Notification::new();
        let res = n
            .appname(APP_NAME)
            .summary(&reminder.title)
            .body(&format!(
                "{}\n{} x{}",
                reminder.message, reminder.medicine_name, reminder.dosage
            ))
            .id(id)
            .urgency(notify_rust::Urgency::Critical)
            .show_async()
            .await;
        match res {
            Ok(_handle) => {
                self.shown
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "notify-rust failed while showing reminder");
                info!("[REMINDER] {}: {}", reminder.title, reminder.message);
                Err(AppError::Capability(format!("desktop notification: {e}")))
            }
        }
    }

    pub async fn close(&self, reminder: &ScheduledNotification) {
        let id = replace_id(reminder);
        let was_shown = self
            .shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if !was_shown {
            return;
        }
        debug!(replace_id = id, "close: replacing with short-timeout notification");
        // Replace the reminder with an empty, near-immediate timeout one.
        let mut n = notify_rust::Notification::new();
        let _ = n
            .appname(APP_NAME)
            .summary(&reminder.medicine_name)
            .body("")
            .id(id)
            .urgency(notify_rust::Urgency::Low)
            .timeout(notify_rust::Timeout::Milliseconds(1))
            .show_async()
            .await;
    }
}
