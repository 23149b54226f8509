use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use medremind_shared::api::{
    ItemQuery, MedicineDto, NewMedicineReq, PhoneQuery, UpdateMedicineReq,
};
use medremind_shared::schedule;
use uuid::Uuid;

use super::notifications::reminder_row;
use super::{AppError, AppState};
use crate::storage::MedicineInput;
use crate::storage::models::{Medicine, MedicineChanges};

pub(super) fn medicine_dto(m: Medicine) -> MedicineDto {
    MedicineDto {
        id: m.id,
        patient_id: m.patient_id,
        name: m.name,
        dosage_per_take: m.dosage_per_take,
        total_quantity: m.total_quantity,
        current_stock: m.current_stock,
        image_url: m.image_url,
    }
}

fn check_counts(
    dosage_per_take: Option<i32>,
    total_quantity: Option<i32>,
    current_stock: Option<i32>,
) -> Result<(), AppError> {
    if dosage_per_take.is_some_and(|d| d <= 0) {
        return Err(AppError::validation("dosagePerTake must be positive"));
    }
    if total_quantity.is_some_and(|q| q < 0) {
        return Err(AppError::validation("totalQuantity must not be negative"));
    }
    if current_stock.is_some_and(|s| s < 0) {
        return Err(AppError::validation("currentStock must not be negative"));
    }
    Ok(())
}

pub(super) async fn api_list_medicines(
    State(state): State<AppState>,
    Query(q): Query<PhoneQuery>,
) -> Result<Json<Vec<MedicineDto>>, AppError> {
    let patient = state.patient_id(&q.phone_number).await?;
    let rows = state.store.list_medicines(patient).await?;
    Ok(Json(rows.into_iter().map(medicine_dto).collect()))
}

/// Creates a medicine; each dosing time becomes one reminder and all of
/// them share a fresh group id. Every time is validated before anything is
/// written.
pub(super) async fn api_create_medicine(
    State(state): State<AppState>,
    Json(body): Json<NewMedicineReq>,
) -> Result<(StatusCode, Json<MedicineDto>), AppError> {
    let patient = state.patient_id(&body.phone_number).await?;
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::validation("name is required"));
    }
    let current_stock = body.current_stock.unwrap_or(body.total_quantity);
    check_counts(
        Some(body.dosage_per_take),
        Some(body.total_quantity),
        Some(current_stock),
    )?;

    let group_id = (!body.times.is_empty()).then(|| Uuid::new_v4().to_string());
    let mut reminders = Vec::with_capacity(body.times.len());
    for t in &body.times {
        let time = schedule::normalize(&t.time, state.tz)?;
        reminders.push(reminder_row(
            &name,
            body.dosage_per_take,
            time,
            t.time_type,
            None,
            None,
            group_id.clone(),
        ));
    }

    let input = MedicineInput {
        name,
        dosage_per_take: body.dosage_per_take,
        total_quantity: body.total_quantity,
        current_stock,
        image_url: body.image_url,
    };
    let (medicine, created) = state
        .store
        .create_medicine(patient, input, reminders)
        .await?;
    tracing::info!(
        medicine_id = medicine.id,
        reminders = created.len(),
        "medicine created"
    );
    Ok((StatusCode::CREATED, Json(medicine_dto(medicine))))
}

pub(super) async fn api_update_medicine(
    State(state): State<AppState>,
    Json(body): Json<UpdateMedicineReq>,
) -> Result<Json<MedicineDto>, AppError> {
    let patient = state.patient_id(&body.phone_number).await?;
    check_counts(body.dosage_per_take, body.total_quantity, body.current_stock)?;
    let name = body.name.map(|n| n.trim().to_string());
    if name.as_deref().is_some_and(str::is_empty) {
        return Err(AppError::validation("name must not be empty"));
    }
    let changes = MedicineChanges {
        name,
        dosage_per_take: body.dosage_per_take,
        total_quantity: body.total_quantity,
        current_stock: body.current_stock,
        image_url: body.image_url,
        updated_at: None,
    };
    let medicine = state.store.update_medicine(patient, body.id, changes).await?;
    Ok(Json(medicine_dto(medicine)))
}

pub(super) async fn api_delete_medicine(
    State(state): State<AppState>,
    Query(q): Query<ItemQuery>,
) -> Result<StatusCode, AppError> {
    let patient = state.patient_id(&q.phone_number).await?;
    state.store.delete_medicine(patient, q.id).await?;
    tracing::info!(medicine_id = q.id, "medicine deleted");
    Ok(StatusCode::NO_CONTENT)
}
