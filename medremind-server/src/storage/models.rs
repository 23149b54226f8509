use crate::storage::schema::{
    consumption_records, medicines, notifications, patients, push_subscriptions,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = patients)]
pub struct Patient {
    pub id: i32,
    pub phone_number: String,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = patients)]
pub struct NewPatient<'a> {
    pub phone_number: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = medicines)]
#[diesel(belongs_to(Patient, foreign_key = patient_id))]
pub struct Medicine {
    pub id: i32,
    pub patient_id: i32,
    pub name: String,
    pub dosage_per_take: i32,
    pub total_quantity: i32,
    pub current_stock: i32,
    pub image_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = medicines)]
pub struct NewMedicine<'a> {
    pub patient_id: i32,
    pub name: &'a str,
    pub dosage_per_take: i32,
    pub total_quantity: i32,
    pub current_stock: i32,
    pub image_url: Option<&'a str>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = medicines)]
pub struct MedicineChanges {
    pub name: Option<String>,
    pub dosage_per_take: Option<i32>,
    pub total_quantity: Option<i32>,
    pub current_stock: Option<i32>,
    pub image_url: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}

/// A reminder schedule entry. `scheduled_time` is always `HH:MM`.
#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = notifications)]
#[diesel(belongs_to(Medicine, foreign_key = medicine_id))]
pub struct Notification {
    pub id: i32,
    pub medicine_id: i32,
    pub title: String,
    pub message: String,
    pub scheduled_time: String,
    pub time_type: String,
    pub is_active: bool,
    pub group_id: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub medicine_id: i32,
    pub title: String,
    pub message: String,
    pub scheduled_time: String,
    pub time_type: String,
    pub is_active: bool,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = notifications)]
pub struct NotificationChanges {
    pub title: Option<String>,
    pub message: Option<String>,
    pub scheduled_time: Option<String>,
    pub time_type: Option<String>,
    pub is_active: Option<bool>,
}

impl NotificationChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.message.is_none()
            && self.scheduled_time.is_none()
            && self.time_type.is_none()
            && self.is_active.is_none()
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = consumption_records)]
#[diesel(belongs_to(Medicine, foreign_key = medicine_id))]
pub struct ConsumptionRecord {
    pub id: i32,
    pub patient_id: i32,
    pub medicine_id: i32,
    pub notification_id: Option<i32>,
    pub scheduled_at: NaiveDateTime,
    pub consumed_at: Option<NaiveDateTime>,
    pub dosage_taken: i32,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = consumption_records)]
pub struct NewConsumptionRecord<'a> {
    pub patient_id: i32,
    pub medicine_id: i32,
    pub notification_id: Option<i32>,
    pub scheduled_at: NaiveDateTime,
    pub consumed_at: Option<NaiveDateTime>,
    pub dosage_taken: i32,
    pub status: &'a str,
    pub notes: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = push_subscriptions)]
#[diesel(belongs_to(Patient, foreign_key = patient_id))]
pub struct PushSubscription {
    pub id: i32,
    pub patient_id: i32,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub last_success_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = push_subscriptions)]
pub struct NewPushSubscription<'a> {
    pub patient_id: i32,
    pub endpoint: &'a str,
    pub p256dh: &'a str,
    pub auth: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
