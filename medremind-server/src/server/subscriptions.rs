use axum::{Json, extract::State, http::StatusCode};
use medremind_shared::api::{PushSubscribeReq, PushSubscribeResp, PushUnsubscribeReq};

use super::{AppError, AppState};

pub(super) async fn api_push_subscribe(
    State(state): State<AppState>,
    Json(body): Json<PushSubscribeReq>,
) -> Result<Json<PushSubscribeResp>, AppError> {
    let patient = state.patient_id(&body.phone_number).await?;
    let endpoint = body.endpoint.trim();
    if endpoint.is_empty() || body.keys.p256dh.trim().is_empty() || body.keys.auth.trim().is_empty()
    {
        return Err(AppError::bad_request("endpoint and keys are required"));
    }
    let sub = state
        .store
        .upsert_push_subscription(
            patient,
            endpoint,
            body.keys.p256dh.trim(),
            body.keys.auth.trim(),
        )
        .await?;
    tracing::info!(endpoint = %sub.endpoint, "push subscription stored");
    Ok(Json(PushSubscribeResp { id: sub.id }))
}

/// Idempotent: removing an unknown endpoint still answers 204.
pub(super) async fn api_push_unsubscribe(
    State(state): State<AppState>,
    Json(body): Json<PushUnsubscribeReq>,
) -> Result<StatusCode, AppError> {
    let patient = state.patient_id(&body.phone_number).await?;
    let removed = state
        .store
        .delete_push_subscription(patient, body.endpoint.trim())
        .await?;
    tracing::info!(endpoint = %body.endpoint, removed, "push subscription removed");
    Ok(StatusCode::NO_CONTENT)
}
