mod terminal;

#[cfg(all(unix, not(target_os = "macos")))]
mod linux;
#[cfg(target_os = "windows")]
mod windows;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::AppError;
use crate::schedule::ScheduledNotification;

/// Host alert primitives. Every capability is best effort: an absent one
/// reports [`AppError::Capability`] and callers degrade to what is left.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Whether an in-process modal can be shown right now.
    fn has_focus(&self) -> bool;
    async fn show_modal(
        &self,
        reminder: &ScheduledNotification,
        timeout: Duration,
    ) -> Result<(), AppError>;
    async fn close_modal(&self, reminder: &ScheduledNotification, outcome: &str);
    /// Posts a system-level notification.
    async fn notify(&self, reminder: &ScheduledNotification) -> Result<(), AppError>;
    async fn hide_notification(&self, reminder: &ScheduledNotification);
    /// One beat of the audible alert pattern.
    async fn play_sound(&self) -> Result<(), AppError>;
    /// One vibration pulse.
    async fn vibrate(&self) -> Result<(), AppError>;
}

/// Terminal modal plus the host's notification service.
pub struct DesktopPlatform {
    terminal: terminal::Terminal,
    notifier: Notifier,
}

#[cfg(all(unix, not(target_os = "macos")))]
type Notifier = linux::Notifier;
#[cfg(target_os = "windows")]
type Notifier = windows::Notifier;
#[cfg(not(any(all(unix, not(target_os = "macos")), target_os = "windows")))]
type Notifier = LogNotifier;

/// Fallback for hosts without a supported notification service.
#[cfg(not(any(all(unix, not(target_os = "macos")), target_os = "windows")))]
#[derive(Debug, Default)]
pub struct LogNotifier;

#[cfg(not(any(all(unix, not(target_os = "macos")), target_os = "windows")))]
impl LogNotifier {
    pub fn new() -> Self {
        Self
    }

    pub async fn show(&self, reminder: &ScheduledNotification) -> Result<(), AppError> {
        tracing::info!(
            notification_id = reminder.notification_id(),
            "[REMINDER] {}: {}",
            reminder.title,
            reminder.message
        );
        Err(AppError::Capability(
            "no system notification service on this host".into(),
        ))
    }

    pub async fn close(&self, _reminder: &ScheduledNotification) {}
}

#[async_trait]
impl Platform for DesktopPlatform {
    fn has_focus(&self) -> bool {
        self.terminal.is_interactive()
    }

    async fn show_modal(
        &self,
        reminder: &ScheduledNotification,
        timeout: Duration,
    ) -> Result<(), AppError> {
        self.terminal.show_prompt(reminder, timeout)
    }

    async fn close_modal(&self, reminder: &ScheduledNotification, outcome: &str) {
        self.terminal.close_prompt(reminder, outcome);
    }

    async fn notify(&self, reminder: &ScheduledNotification) -> Result<(), AppError> {
        self.notifier.show(reminder).await
    }

    async fn hide_notification(&self, reminder: &ScheduledNotification) {
        self.notifier.close(reminder).await;
    }

    async fn play_sound(&self) -> Result<(), AppError> {
        self.terminal.bell()
    }

    async fn vibrate(&self) -> Result<(), AppError> {
        Err(AppError::Capability("no vibration hardware on desktop hosts".into()))
    }
}

/// Detect the current platform and return an implementation.
pub fn detect() -> Arc<dyn Platform> {
    #[cfg(target_os = "windows")]
    tracing::info!("platform selected: windows");
    #[cfg(all(unix, not(target_os = "macos")))]
    tracing::info!("platform selected: freedesktop");
    Arc::new(DesktopPlatform {
        terminal: terminal::Terminal::detect(),
        notifier: Notifier::new(),
    })
}
