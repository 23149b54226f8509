use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use medremind_shared::api::{
    ConsumptionRecordDto, ConsumptionReq, ConsumptionResp, ConsumptionStatsQuery,
    ConsumptionStatsResp, StatusCountDto,
};
use medremind_shared::domain::{ConsumptionAction, ConsumptionStatus};
use medremind_shared::schedule::{ScheduleTime, local_day_bounds};

use super::{AppError, AppState, rfc3339};
use crate::storage::models::ConsumptionRecord;
use crate::storage::{ConsumptionOutcome, ConsumptionTarget};

fn record_dto(r: ConsumptionRecord) -> Result<ConsumptionRecordDto, AppError> {
    Ok(ConsumptionRecordDto {
        id: r.id,
        patient_id: r.patient_id,
        medicine_id: r.medicine_id,
        notification_id: r.notification_id,
        scheduled_at: rfc3339(r.scheduled_at),
        consumed_at: r.consumed_at.map(rfc3339),
        dosage_taken: r.dosage_taken,
        status: r.status.parse().map_err(AppError::internal)?,
        notes: r.notes,
        created_at: rfc3339(r.created_at),
    })
}

/// When the dose was due: today's slot of the referenced reminder, or the
/// action time for ad-hoc records.
async fn scheduled_at(state: &AppState, target: &ConsumptionTarget) -> Result<DateTime<Utc>, AppError> {
    let Some(nid) = target.notification_id else {
        return Ok(target.now);
    };
    let (notification, _) = state.store.get_notification(target.patient_id, nid).await?;
    let time = ScheduleTime::parse_hhmm(&notification.scheduled_time).map_err(AppError::internal)?;
    let today = target.now.with_timezone(&state.tz).date_naive();
    Ok(time.on_date(today, state.tz))
}

pub(super) async fn api_record_consumption(
    State(state): State<AppState>,
    Json(body): Json<ConsumptionReq>,
) -> Result<Json<ConsumptionResp>, AppError> {
    let patient = state.patient_id(&body.phone_number).await?;
    let target = ConsumptionTarget {
        patient_id: patient,
        medicine_id: body.medicine_id,
        notification_id: body.notification_id,
        now: Utc::now(),
    };
    let notes = body
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let outcome: ConsumptionOutcome = match body.status {
        ConsumptionAction::Taken => {
            let at = scheduled_at(&state, &target).await?;
            state
                .store
                .record_taken(target, at.naive_utc(), body.dosage_taken, notes)
                .await?
        }
        ConsumptionAction::Skipped => {
            let at = scheduled_at(&state, &target).await?;
            state
                .store
                .record_skipped(target, at.naive_utc(), notes)
                .await?
        }
        ConsumptionAction::Cancel => {
            let (start, end) = local_day_bounds(target.now, state.tz);
            state
                .store
                .cancel_taken(target, start.naive_utc(), end.naive_utc())
                .await?
        }
    };
    tracing::info!(
        medicine_id = body.medicine_id,
        notification_id = ?body.notification_id,
        action = ?body.status,
        current_stock = outcome.current_stock,
        "consumption recorded"
    );
    Ok(Json(ConsumptionResp {
        record: record_dto(outcome.record)?,
        current_stock: outcome.current_stock,
    }))
}

pub(super) async fn api_consumption_stats(
    State(state): State<AppState>,
    Query(q): Query<ConsumptionStatsQuery>,
) -> Result<Json<ConsumptionStatsResp>, AppError> {
    let patient = state.patient_id(&q.phone_number).await?;
    let rows = state.store.consumption_stats(patient, q.medicine_id).await?;
    let groups = rows
        .into_iter()
        .map(|(medicine_id, status, count)| {
            let status = status
                .parse::<ConsumptionStatus>()
                .map_err(AppError::internal)?;
            Ok(StatusCountDto {
                medicine_id,
                status,
                count,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;
    Ok(Json(ConsumptionStatsResp::from_groups(groups)))
}
