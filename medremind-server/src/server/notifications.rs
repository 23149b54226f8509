use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use medremind_shared::api::{
    ItemQuery, NewNotificationReq, NotificationDto, PhoneQuery, ToggleNotificationReq,
    UpdateNotificationReq,
};
use medremind_shared::domain::TimeType;
use medremind_shared::schedule::{self, ScheduleTime};

use super::{AppError, AppState};
use crate::storage::models::{Medicine, NewNotification, Notification, NotificationChanges};

/// Builds a new reminder row; `medicine_id` is filled in by the store when
/// the medicine is created in the same transaction.
pub(super) fn reminder_row(
    medicine_name: &str,
    dosage: i32,
    time: ScheduleTime,
    time_type: TimeType,
    title: Option<String>,
    message: Option<String>,
    group_id: Option<String>,
) -> NewNotification {
    NewNotification {
        medicine_id: 0,
        title: non_blank(title).unwrap_or_else(|| format!("Time to take {medicine_name}")),
        message: non_blank(message)
            .unwrap_or_else(|| format!("Take {dosage} dose(s) of {medicine_name}")),
        scheduled_time: time.to_string(),
        time_type: time_type.as_str().to_string(),
        is_active: true,
        group_id,
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn notification_dto(n: Notification, m: Medicine) -> Result<NotificationDto, AppError> {
    let time_type = n.time_type.parse::<TimeType>().map_err(AppError::internal)?;
    Ok(NotificationDto {
        id: n.id,
        medicine_id: n.medicine_id,
        medicine_name: m.name,
        dosage: m.dosage_per_take,
        title: n.title,
        message: n.message,
        scheduled_time: n.scheduled_time,
        time_type,
        is_active: n.is_active,
        group_id: n.group_id,
    })
}

pub(super) async fn api_list_notifications(
    State(state): State<AppState>,
    Query(q): Query<PhoneQuery>,
) -> Result<Json<Vec<NotificationDto>>, AppError> {
    let patient = state.patient_id(&q.phone_number).await?;
    let rows = state.store.list_notifications(patient).await?;
    let items = rows
        .into_iter()
        .map(|(n, m)| notification_dto(n, m))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

pub(super) async fn api_create_notification(
    State(state): State<AppState>,
    Json(body): Json<NewNotificationReq>,
) -> Result<(StatusCode, Json<NotificationDto>), AppError> {
    let patient = state.patient_id(&body.phone_number).await?;
    let time = schedule::normalize(&body.scheduled_time, state.tz)?;
    let medicine = state
        .store
        .list_medicines(patient)
        .await?
        .into_iter()
        .find(|m| m.id == body.medicine_id)
        .ok_or_else(|| AppError::not_found(format!("medicine {}", body.medicine_id)))?;
    let mut row = reminder_row(
        &medicine.name,
        medicine.dosage_per_take,
        time,
        body.time_type,
        body.title,
        body.message,
        body.group_id,
    );
    row.medicine_id = medicine.id;
    let (n, m) = state.store.create_notification(patient, row).await?;
    tracing::info!(notification_id = n.id, medicine_id = m.id, scheduled_time = %n.scheduled_time, "reminder created");
    Ok((StatusCode::CREATED, Json(notification_dto(n, m)?)))
}

pub(super) async fn api_update_notification(
    State(state): State<AppState>,
    Json(body): Json<UpdateNotificationReq>,
) -> Result<Json<NotificationDto>, AppError> {
    let patient = state.patient_id(&body.phone_number).await?;
    let scheduled_time = body
        .scheduled_time
        .as_ref()
        .map(|t| schedule::normalize(t, state.tz))
        .transpose()?
        .map(|t| t.to_string());
    let changes = NotificationChanges {
        title: non_blank(body.title),
        message: non_blank(body.message),
        scheduled_time,
        time_type: body.time_type.map(|t| t.as_str().to_string()),
        is_active: body.is_active,
    };
    let (n, m) = state
        .store
        .update_notification(patient, body.id, changes)
        .await?;
    Ok(Json(notification_dto(n, m)?))
}

pub(super) async fn api_toggle_notification(
    State(state): State<AppState>,
    Json(body): Json<ToggleNotificationReq>,
) -> Result<Json<NotificationDto>, AppError> {
    let patient = state.patient_id(&body.phone_number).await?;
    let changes = NotificationChanges {
        is_active: Some(body.is_active),
        ..Default::default()
    };
    let (n, m) = state
        .store
        .update_notification(patient, body.id, changes)
        .await?;
    tracing::info!(notification_id = n.id, is_active = n.is_active, "reminder toggled");
    Ok(Json(notification_dto(n, m)?))
}

pub(super) async fn api_delete_notification(
    State(state): State<AppState>,
    Query(q): Query<ItemQuery>,
) -> Result<StatusCode, AppError> {
    let patient = state.patient_id(&q.phone_number).await?;
    state.store.delete_notification(patient, q.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_row_fills_default_text() {
        let t = ScheduleTime::new(8, 0).unwrap();
        let row = reminder_row("Aspirin", 2, t, TimeType::Morning, Some("  ".into()), None, None);
        assert_eq!(row.title, "Time to take Aspirin");
        assert_eq!(row.message, "Take 2 dose(s) of Aspirin");
        assert_eq!(row.scheduled_time, "08:00");
        assert_eq!(row.time_type, "morning");
        assert!(row.is_active);
    }
}
