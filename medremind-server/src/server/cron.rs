use std::time::Duration;

use axum::{Json, extract::State};
use chrono::{Timelike, Utc};
use medremind_shared::api::CronSummaryDto;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::push::PushService;
use super::{AppError, AppState};

/// External per-minute trigger for the reminder push batch.
pub(super) async fn api_cron_reminders(
    State(state): State<AppState>,
) -> Result<Json<CronSummaryDto>, AppError> {
    let summary = state.push.send_due_reminders(Utc::now()).await?;
    Ok(Json(summary))
}

/// Runs the push batch at the start of every minute until `token` fires.
pub fn spawn_minute_ticker(push: PushService, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("scheduler: minute ticker started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(until_next_minute()) => {}
            }
            match push.send_due_reminders(Utc::now()).await {
                Ok(summary) if summary.due_reminders > 0 => info!(
                    due = summary.due_reminders,
                    delivered = summary.delivered,
                    failed = summary.failed,
                    removed = summary.removed_subscriptions,
                    "scheduler: batch done"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "scheduler: batch failed"),
            }
        }
        info!("scheduler: minute ticker stopped");
    })
}

fn until_next_minute() -> Duration {
    let now = Utc::now();
    let into_minute = Duration::from_secs(u64::from(now.second()))
        + Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000));
    // Land a little after the boundary so the batch sees the new minute
    Duration::from_secs(60).saturating_sub(into_minute) + Duration::from_millis(250)
}
