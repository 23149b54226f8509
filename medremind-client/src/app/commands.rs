//! One-shot subcommands sharing the agent's sync path.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use medremind_shared::api::MedicineDto;
use tracing::warn;

use super::{Core, build};
use crate::AppError;
use crate::config::ClientConfig;
use crate::schedule::ScheduledNotification;
use crate::sync::{ConsumptionRequest, ToggleOutcome};

/// Syncs, or falls back to the cache when the server is unreachable and a
/// cached schedule exists.
async fn refreshed(cfg: &ClientConfig) -> Result<Core, AppError> {
    let core = build(cfg)?;
    core.sync.warm_start()?;
    if let Err(e) = core.sync.sync_now().await {
        if core.matcher.snapshot().is_empty() {
            return Err(e);
        }
        warn!(error = %e, "sync failed; using cached schedule");
    }
    Ok(core)
}

pub async fn print_schedule(cfg: &ClientConfig) -> Result<(), AppError> {
    let core = refreshed(cfg).await?;
    let medicines = core.sync.cached_medicines()?;
    println!("{}", sync_header(core.sync.last_sync_at()?, core.matcher.tz()));
    let schedule = core.matcher.snapshot();
    if schedule.is_empty() {
        println!("no reminders");
    }
    for entry in schedule.iter() {
        println!("{}", schedule_row(entry, &medicines));
    }
    Ok(())
}

fn sync_header(last_sync: Option<DateTime<Utc>>, tz: Tz) -> String {
    match last_sync {
        Some(at) => format!("last sync {}", at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")),
        None => "never synced".to_string(),
    }
}

fn schedule_row(entry: &ScheduledNotification, medicines: &[MedicineDto]) -> String {
    let time = entry
        .scheduled_time
        .map(|t| t.to_string())
        .unwrap_or_else(|| "--:--".into());
    let stock = medicines
        .iter()
        .find(|m| m.id == entry.medicine_id)
        .map(|m| format!("stock {}", m.current_stock))
        .unwrap_or_default();
    let state = if entry.is_active { "on " } else { "off" };
    format!(
        "{time}  {state}  #{:<4} {} x{} [{}] {stock}",
        entry.notification_id(),
        entry.medicine_name,
        entry.dosage,
        entry.time_type()
    )
    .trim_end()
    .to_string()
}

pub async fn record(cfg: &ClientConfig, req: ConsumptionRequest) -> Result<(), AppError> {
    let core = build(cfg)?;
    core.sync.warm_start()?;
    let resp = core.sync.record_consumption(req).await?;
    println!(
        "{} recorded for medicine {}; stock now {}",
        resp.record.status.as_str(),
        resp.record.medicine_id,
        resp.current_stock
    );
    Ok(())
}

pub async fn toggle(cfg: &ClientConfig, id: i32, active: bool) -> Result<(), AppError> {
    let core = refreshed(cfg).await?;
    let state = if active { "on" } else { "off" };
    match core.sync.toggle_reminder(id, active).await? {
        ToggleOutcome::Confirmed => println!("reminder {id} turned {state}"),
        ToggleOutcome::Queued => {
            println!("reminder {id} turned {state} locally; server will be updated on next sync")
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::tests::dto;
    use crate::schedule::{AlertPrefs, ScheduledNotification};
    use crate::sync::testing::medicine;

    #[test]
    fn row_shows_time_state_and_stock() {
        let entry =
            ScheduledNotification::from_dto(&dto(3, 7, "08:00", true), chrono_tz::UTC, AlertPrefs::default());
        let row = schedule_row(&entry, &[medicine(7, 9, 1)]);
        assert_eq!(row, "08:00  on   #3    Medicine 7 x1 [morning] stock 9");
    }

    #[test]
    fn header_shows_last_sync_in_the_operating_zone() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap();
        assert_eq!(
            sync_header(Some(at), chrono_tz::Europe::Warsaw),
            "last sync 2024-05-01 08:30 CEST"
        );
        assert_eq!(sync_header(None, chrono_tz::UTC), "never synced");
    }

    #[test]
    fn unparsable_time_is_shown_as_placeholder() {
        let entry =
            ScheduledNotification::from_dto(&dto(4, 8, "nope", true), chrono_tz::UTC, AlertPrefs::default());
        let row = schedule_row(&entry, &[]);
        assert!(row.starts_with("--:--  off  #4"));
        assert!(row.ends_with("[morning]"));
    }
}
