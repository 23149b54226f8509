use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{ConsumptionAction, ConsumptionStatus, TimeType};
use crate::schedule::ScheduleInput;

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_PREFIX: &str = "/api";

// Query strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneQuery {
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemQuery {
    pub phone_number: String,
    pub id: i32,
}

// Medicines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineDto {
    pub id: i32,
    pub patient_id: i32,
    pub name: String,
    pub dosage_per_take: i32,
    pub total_quantity: i32,
    pub current_stock: i32,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DosingTimeReq {
    pub time: ScheduleInput,
    pub time_type: TimeType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedicineReq {
    pub phone_number: String,
    pub name: String,
    pub dosage_per_take: i32,
    pub total_quantity: i32,
    /// Defaults to `total_quantity`.
    pub current_stock: Option<i32>,
    pub image_url: Option<String>,
    /// Each entry becomes one reminder; all of them share one group id.
    #[serde(default)]
    pub times: Vec<DosingTimeReq>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMedicineReq {
    pub phone_number: String,
    pub id: i32,
    pub name: Option<String>,
    pub dosage_per_take: Option<i32>,
    pub total_quantity: Option<i32>,
    pub current_stock: Option<i32>,
    pub image_url: Option<String>,
}

// Notifications (reminder schedule entries)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDto {
    pub id: i32,
    pub medicine_id: i32,
    pub medicine_name: String,
    pub dosage: i32,
    pub title: String,
    pub message: String,
    /// Either `HH:MM` or a full timestamp; clients normalize before matching.
    pub scheduled_time: String,
    pub time_type: TimeType,
    pub is_active: bool,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotificationReq {
    pub phone_number: String,
    pub medicine_id: i32,
    pub title: Option<String>,
    pub message: Option<String>,
    pub scheduled_time: ScheduleInput,
    pub time_type: TimeType,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotificationReq {
    pub phone_number: String,
    pub id: i32,
    pub title: Option<String>,
    pub message: Option<String>,
    pub scheduled_time: Option<ScheduleInput>,
    pub time_type: Option<TimeType>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleNotificationReq {
    pub phone_number: String,
    pub id: i32,
    pub is_active: bool,
}

// Consumption
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionReq {
    pub phone_number: String,
    pub medicine_id: i32,
    pub notification_id: Option<i32>,
    pub status: ConsumptionAction,
    pub dosage_taken: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionRecordDto {
    pub id: i32,
    pub patient_id: i32,
    pub medicine_id: i32,
    pub notification_id: Option<i32>,
    pub scheduled_at: String, // RFC3339 UTC
    pub consumed_at: Option<String>,
    pub dosage_taken: i32,
    pub status: ConsumptionStatus,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionResp {
    pub record: ConsumptionRecordDto,
    pub current_stock: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionStatsQuery {
    pub phone_number: String,
    pub medicine_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCountDto {
    pub medicine_id: i32,
    pub status: ConsumptionStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineTotalsDto {
    pub medicine_id: i32,
    pub taken: i64,
    pub skipped: i64,
    pub cancelled: i64,
    pub pending: i64,
    pub missed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionStatsResp {
    pub groups: Vec<StatusCountDto>,
    pub totals: Vec<MedicineTotalsDto>,
}

impl ConsumptionStatsResp {
    /// Folds `(medicine, status) -> count` groups into per-medicine totals.
    pub fn from_groups(groups: Vec<StatusCountDto>) -> Self {
        let mut by_medicine: BTreeMap<i32, MedicineTotalsDto> = BTreeMap::new();
        for g in &groups {
            let t = by_medicine
                .entry(g.medicine_id)
                .or_insert_with(|| MedicineTotalsDto {
                    medicine_id: g.medicine_id,
                    ..Default::default()
                });
            let slot = match g.status {
                ConsumptionStatus::Taken => &mut t.taken,
                ConsumptionStatus::Skipped => &mut t.skipped,
                ConsumptionStatus::Cancelled => &mut t.cancelled,
                ConsumptionStatus::Pending => &mut t.pending,
                ConsumptionStatus::Missed => &mut t.missed,
            };
            *slot += g.count;
        }
        Self {
            groups,
            totals: by_medicine.into_values().collect(),
        }
    }
}

// Push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscribeReq {
    pub phone_number: String,
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscribeResp {
    pub id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushUnsubscribeReq {
    pub phone_number: String,
    pub endpoint: String,
}

/// Body of the encrypted push message for one due reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPushPayload {
    pub title: String,
    pub body: String,
    pub medicine_name: String,
    pub dosage: i32,
    pub notification_id: i32,
    pub medicine_id: i32,
    pub time_type: TimeType,
    /// Deep link that opens the reminder prompt on the client.
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronSummaryDto {
    pub due_reminders: usize,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub removed_subscriptions: usize,
}
