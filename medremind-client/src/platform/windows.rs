use tauri_winrt_notification::{Duration as ToastDuration, Sound, Toast};
use tracing::{debug, warn};

use crate::AppError;
use crate::schedule::ScheduledNotification;

/// Toast notifications through the WinRT notification center.
#[derive(Debug, Default)]
pub struct Notifier;

impl Notifier {
    pub fn new() -> Self {
        Self
    }

    pub async fn show(&self, reminder: &ScheduledNotification) -> Result<(), AppError> {
        let title = reminder.title.clone();
        let body = reminder.message.clone();
        let detail = format!("{} x{}", reminder.medicine_name, reminder.dosage);
        // Toast::show blocks on COM; keep it off the runtime threads.
        let res = tokio::task::spawn_blocking(move || {
            Toast::new(Toast::POWERSHELL_APP_ID)
                .title(&title)
                .text1(&body)
                .text2(&detail)
                .sound(Some(Sound::Reminder))
                .duration(ToastDuration::Long)
                .show()
        })
        .await
        .map_err(|e| AppError::Capability(format!("toast task: {e}")))?;
        match res {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "toast notification failed");
                Err(AppError::Capability(format!("toast notification: {e}")))
            }
        }
    }

    pub async fn close(&self, reminder: &ScheduledNotification) {
        // Toasts expire on their own; the action center keeps a copy.
        debug!(
            notification_id = reminder.notification_id(),
            "toast left to expire"
        );
    }
}
