use std::io::{IsTerminal, Write};
use std::time::Duration;

use crate::AppError;
use crate::schedule::ScheduledNotification;

/// The controlling terminal, used as the in-process modal surface.
#[derive(Debug)]
pub struct Terminal {
    interactive: bool,
}

impl Terminal {
    pub fn detect() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal() && std::io::stdout().is_terminal(),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn show_prompt(
        &self,
        reminder: &ScheduledNotification,
        timeout: Duration,
    ) -> Result<(), AppError> {
        if !self.interactive {
            return Err(AppError::Capability("no interactive terminal".into()));
        }
        let time = reminder
            .scheduled_time
            .map(|t| t.to_string())
            .unwrap_or_else(|| "--:--".into());
        let mut out = std::io::stdout().lock();
        writeln!(out)?;
        writeln!(out, "=== {} ({time}) ===", reminder.title)?;
        writeln!(out, "{}", reminder.message)?;
        writeln!(
            out,
            "{} x{} [{}]",
            reminder.medicine_name,
            reminder.dosage,
            reminder.time_type()
        )?;
        writeln!(
            out,
            "[t] taken  [s] skipped  [d] dismiss   (closes in {}s)",
            timeout.as_secs()
        )?;
        out.flush()?;
        Ok(())
    }

    pub fn close_prompt(&self, reminder: &ScheduledNotification, outcome: &str) {
        if !self.interactive {
            return;
        }
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "--- {}: {outcome} ---", reminder.medicine_name);
        let _ = out.flush();
    }

    pub fn bell(&self) -> Result<(), AppError> {
        if !self.interactive {
            return Err(AppError::Capability("no terminal to ring".into()));
        }
        let mut out = std::io::stdout().lock();
        out.write_all(b"\x07")?;
        out.flush()?;
        Ok(())
    }
}
