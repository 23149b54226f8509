pub mod models;
pub mod schema;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use medremind_shared::domain::{ConsumptionStatus, PatientProfile};
use models::{
    ConsumptionRecord, Medicine, MedicineChanges, NewConsumptionRecord, NewMedicine,
    NewNotification, NewPatient, NewPushSubscription, Notification, NotificationChanges, Patient,
    PushSubscription,
};
use tracing::{debug, trace};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The referenced row does not exist or belongs to another patient.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Medicine fields for a create; reminders are attached separately.
#[derive(Debug, Clone)]
pub struct MedicineInput {
    pub name: String,
    pub dosage_per_take: i32,
    pub total_quantity: i32,
    pub current_stock: i32,
    pub image_url: Option<String>,
}

/// Result of one consumption action: the touched record and the stock after it.
#[derive(Debug, Clone)]
pub struct ConsumptionOutcome {
    pub record: ConsumptionRecord,
    pub current_stock: i32,
}

/// Which record a consumption action refers to, plus the clock it runs on.
#[derive(Debug, Clone, Copy)]
pub struct ConsumptionTarget {
    pub patient_id: i32,
    pub medicine_id: i32,
    pub notification_id: Option<i32>,
    pub now: DateTime<Utc>,
}

pub const CANCELLED_MARKER: &str = "[CANCELLED]";

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    pub async fn seed_patients(&self, profiles: &[PatientProfile]) -> Result<(), StorageError> {
        use schema::patients;

        let pool = self.pool.clone();
        let owned = profiles.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            for p in &owned {
                let new_patient = NewPatient {
                    phone_number: p.phone_number.trim(),
                    name: &p.name,
                };
                diesel::insert_into(patients::table)
                    .values(&new_patient)
                    .on_conflict(patients::phone_number)
                    .do_update()
                    .set(patients::name.eq(new_patient.name))
                    .execute(&mut conn)?;
            }
            Ok(())
        })
        .await?
    }

    pub async fn find_patient_by_phone(&self, phone: &str) -> Result<Option<Patient>, StorageError> {
        use schema::patients::dsl::*;
        let pool = self.pool.clone();
        let phone_owned = phone.trim().to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Patient>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(patients
                .filter(phone_number.eq(&phone_owned))
                .first::<Patient>(&mut conn)
                .optional()?)
        })
        .await?
    }

    // Medicines

    pub async fn list_medicines(&self, patient: i32) -> Result<Vec<Medicine>, StorageError> {
        use schema::medicines::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Medicine>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(medicines
                .filter(patient_id.eq(patient))
                .order(id.asc())
                .load::<Medicine>(&mut conn)?)
        })
        .await?
    }

    /// Inserts a medicine and its reminders in one transaction. Reminders get
    /// the new medicine's id; their `group_id` is taken as given.
    pub async fn create_medicine(
        &self,
        patient: i32,
        input: MedicineInput,
        reminders: Vec<NewNotification>,
    ) -> Result<(Medicine, Vec<Notification>), StorageError> {
        use schema::{medicines, notifications};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(Medicine, Vec<Notification>), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<_, StorageError> {
                let now = Utc::now().naive_utc();
                let new_row = NewMedicine {
                    patient_id: patient,
                    name: &input.name,
                    dosage_per_take: input.dosage_per_take,
                    total_quantity: input.total_quantity,
                    current_stock: input.current_stock,
                    image_url: input.image_url.as_deref(),
                    created_at: now,
                    updated_at: now,
                };
                let medicine: Medicine = diesel::insert_into(medicines::table)
                    .values(&new_row)
                    .returning(Medicine::as_returning())
                    .get_result(conn)?;
                let mut created = Vec::with_capacity(reminders.len());
                for mut r in reminders {
                    r.medicine_id = medicine.id;
                    created.push(
                        diesel::insert_into(notifications::table)
                            .values(&r)
                            .returning(Notification::as_returning())
                            .get_result(conn)?,
                    );
                }
                Ok((medicine, created))
            })
        })
        .await?
    }

    pub async fn update_medicine(
        &self,
        patient: i32,
        medicine: i32,
        mut changes: MedicineChanges,
    ) -> Result<Medicine, StorageError> {
        use schema::medicines::dsl as m;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Medicine, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            changes.updated_at = Some(Utc::now().naive_utc());
            diesel::update(
                m::medicines
                    .filter(m::id.eq(medicine))
                    .filter(m::patient_id.eq(patient)),
            )
            .set(&changes)
            .returning(Medicine::as_returning())
            .get_result(&mut conn)
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("medicine {medicine}")))
        })
        .await?
    }

    /// Deletes a medicine; its reminders and consumption records go with it.
    pub async fn delete_medicine(&self, patient: i32, medicine: i32) -> Result<(), StorageError> {
        use schema::medicines::dsl as m;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(
                m::medicines
                    .filter(m::id.eq(medicine))
                    .filter(m::patient_id.eq(patient)),
            )
            .execute(&mut conn)?;
            if deleted == 0 {
                return Err(StorageError::NotFound(format!("medicine {medicine}")));
            }
            Ok(())
        })
        .await?
    }

    // Reminders

    pub async fn list_notifications(
        &self,
        patient: i32,
    ) -> Result<Vec<(Notification, Medicine)>, StorageError> {
        use schema::{medicines, notifications};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(
            move || -> Result<Vec<(Notification, Medicine)>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                Ok(notifications::table
                    .inner_join(medicines::table)
                    .filter(medicines::patient_id.eq(patient))
                    .order((notifications::scheduled_time.asc(), notifications::id.asc()))
                    .select((Notification::as_select(), Medicine::as_select()))
                    .load(&mut conn)?)
            },
        )
        .await?
    }

    pub async fn get_notification(
        &self,
        patient: i32,
        notification: i32,
    ) -> Result<(Notification, Medicine), StorageError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(Notification, Medicine), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            owned_notification(&mut conn, patient, notification)
        })
        .await?
    }

    pub async fn create_notification(
        &self,
        patient: i32,
        row: NewNotification,
    ) -> Result<(Notification, Medicine), StorageError> {
        use schema::notifications;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(Notification, Medicine), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<(Notification, Medicine), StorageError> {
                let medicine = owned_medicine(conn, patient, row.medicine_id)?;
                let created = diesel::insert_into(notifications::table)
                    .values(&row)
                    .returning(Notification::as_returning())
                    .get_result(conn)?;
                Ok((created, medicine))
            })
        })
        .await?
    }

    pub async fn update_notification(
        &self,
        patient: i32,
        notification: i32,
        changes: NotificationChanges,
    ) -> Result<(Notification, Medicine), StorageError> {
        use schema::notifications::dsl as n;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(Notification, Medicine), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<(Notification, Medicine), StorageError> {
                let (current, medicine) = owned_notification(conn, patient, notification)?;
                if changes.is_empty() {
                    return Ok((current, medicine));
                }
                let updated = diesel::update(n::notifications.filter(n::id.eq(current.id)))
                    .set(&changes)
                    .returning(Notification::as_returning())
                    .get_result(conn)?;
                Ok((updated, medicine))
            })
        })
        .await?
    }

    pub async fn delete_notification(
        &self,
        patient: i32,
        notification: i32,
    ) -> Result<(), StorageError> {
        use schema::notifications::dsl as n;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                let (current, _) = owned_notification(conn, patient, notification)?;
                diesel::delete(n::notifications.filter(n::id.eq(current.id))).execute(conn)?;
                Ok(())
            })
        })
        .await?
    }

    /// Active reminders scheduled for `hhmm`, across all patients.
    pub async fn due_reminders(
        &self,
        hhmm: &str,
    ) -> Result<Vec<(Notification, Medicine)>, StorageError> {
        use schema::{medicines, notifications};
        let pool = self.pool.clone();
        let minute = hhmm.to_string();
        tokio::task::spawn_blocking(
            move || -> Result<Vec<(Notification, Medicine)>, StorageError> {
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                Ok(notifications::table
                    .inner_join(medicines::table)
                    .filter(notifications::scheduled_time.eq(&minute))
                    .filter(notifications::is_active.eq(true))
                    .order(notifications::id.asc())
                    .select((Notification::as_select(), Medicine::as_select()))
                    .load(&mut conn)?)
            },
        )
        .await?
    }

    // Consumption

    /// Records a taken dose and deducts it from stock, floored at zero.
    pub async fn record_taken(
        &self,
        target: ConsumptionTarget,
        scheduled_at: NaiveDateTime,
        dosage_taken: Option<i32>,
        notes: Option<String>,
    ) -> Result<ConsumptionOutcome, StorageError> {
        use schema::medicines::dsl as m;
        if let Some(d) = dosage_taken
            && d < 0
        {
            return Err(StorageError::InvalidInput(
                "dosageTaken must not be negative".into(),
            ));
        }
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<ConsumptionOutcome, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<ConsumptionOutcome, StorageError> {
                let medicine = owned_medicine(conn, target.patient_id, target.medicine_id)?;
                check_notification(conn, &target)?;
                let dosage = dosage_taken.unwrap_or(medicine.dosage_per_take);
                let now = target.now.naive_utc();
                let record = insert_record(
                    conn,
                    &target,
                    NewConsumptionRecord {
                        patient_id: target.patient_id,
                        medicine_id: target.medicine_id,
                        notification_id: target.notification_id,
                        scheduled_at,
                        consumed_at: Some(now),
                        dosage_taken: dosage,
                        status: ConsumptionStatus::Taken.as_str(),
                        notes: notes.as_deref(),
                        created_at: now,
                    },
                )?;
                let stock = (medicine.current_stock - dosage).max(0);
                diesel::update(m::medicines.filter(m::id.eq(medicine.id)))
                    .set((m::current_stock.eq(stock), m::updated_at.eq(now)))
                    .execute(conn)?;
                debug!(
                    medicine_id = medicine.id,
                    dosage,
                    before = medicine.current_stock,
                    after = stock,
                    "consumption: taken"
                );
                Ok(ConsumptionOutcome {
                    record,
                    current_stock: stock,
                })
            })
        })
        .await?
    }

    /// Records an explicit skip. Stock is untouched.
    pub async fn record_skipped(
        &self,
        target: ConsumptionTarget,
        scheduled_at: NaiveDateTime,
        notes: Option<String>,
    ) -> Result<ConsumptionOutcome, StorageError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<ConsumptionOutcome, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<ConsumptionOutcome, StorageError> {
                let medicine = owned_medicine(conn, target.patient_id, target.medicine_id)?;
                check_notification(conn, &target)?;
                let now = target.now.naive_utc();
                let record = insert_record(
                    conn,
                    &target,
                    NewConsumptionRecord {
                        patient_id: target.patient_id,
                        medicine_id: target.medicine_id,
                        notification_id: target.notification_id,
                        scheduled_at,
                        consumed_at: None,
                        dosage_taken: 0,
                        status: ConsumptionStatus::Skipped.as_str(),
                        notes: notes.as_deref(),
                        created_at: now,
                    },
                )?;
                Ok(ConsumptionOutcome {
                    record,
                    current_stock: medicine.current_stock,
                })
            })
        })
        .await?
    }

    /// Flips the latest `taken` record inside `[day_start, day_end)` to
    /// `cancelled` and gives its own dosage back to stock.
    pub async fn cancel_taken(
        &self,
        target: ConsumptionTarget,
        day_start: NaiveDateTime,
        day_end: NaiveDateTime,
    ) -> Result<ConsumptionOutcome, StorageError> {
        use schema::consumption_records::dsl as cr;
        use schema::medicines::dsl as m;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<ConsumptionOutcome, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<ConsumptionOutcome, StorageError> {
                let medicine = owned_medicine(conn, target.patient_id, target.medicine_id)?;
                let mut query = cr::consumption_records
                    .filter(cr::patient_id.eq(target.patient_id))
                    .filter(cr::medicine_id.eq(target.medicine_id))
                    .filter(cr::status.eq(ConsumptionStatus::Taken.as_str()))
                    .filter(cr::created_at.ge(day_start))
                    .filter(cr::created_at.lt(day_end))
                    .into_boxed();
                query = match target.notification_id {
                    Some(nid) => query.filter(cr::notification_id.eq(nid)),
                    None => query.filter(cr::notification_id.is_null()),
                };
                let latest = query
                    .order((cr::created_at.desc(), cr::id.desc()))
                    .first::<ConsumptionRecord>(conn)
                    .optional()?
                    .ok_or_else(|| {
                        StorageError::NotFound("no taken record today to cancel".into())
                    })?;

                let notes = match latest.notes.as_deref() {
                    Some(n) if !n.trim().is_empty() => format!("{n} {CANCELLED_MARKER}"),
                    _ => CANCELLED_MARKER.to_string(),
                };
                let record = diesel::update(cr::consumption_records.filter(cr::id.eq(latest.id)))
                    .set((
                        cr::status.eq(ConsumptionStatus::Cancelled.as_str()),
                        cr::notes.eq(Some(notes)),
                    ))
                    .returning(ConsumptionRecord::as_returning())
                    .get_result(conn)?;
                // The full recorded dose goes back even when the take was
                // clamped at zero, so stock may end above its pre-dose level.
                let stock = medicine.current_stock + latest.dosage_taken;
                diesel::update(m::medicines.filter(m::id.eq(medicine.id)))
                    .set((
                        m::current_stock.eq(stock),
                        m::updated_at.eq(target.now.naive_utc()),
                    ))
                    .execute(conn)?;
                debug!(
                    medicine_id = medicine.id,
                    record_id = record.id,
                    restored = latest.dosage_taken,
                    after = stock,
                    "consumption: cancelled"
                );
                Ok(ConsumptionOutcome {
                    record,
                    current_stock: stock,
                })
            })
        })
        .await?
    }

    /// `(medicine_id, status, count)` groups for one patient.
    pub async fn consumption_stats(
        &self,
        patient: i32,
        medicine: Option<i32>,
    ) -> Result<Vec<(i32, String, i64)>, StorageError> {
        use diesel::dsl::count_star;
        use schema::consumption_records::dsl as cr;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<(i32, String, i64)>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let groups = cr::consumption_records
                .filter(cr::patient_id.eq(patient))
                .group_by((cr::medicine_id, cr::status))
                .select((cr::medicine_id, cr::status, count_star()))
                .order((cr::medicine_id.asc(), cr::status.asc()))
                .load::<(i32, String, i64)>(&mut conn)?;
            Ok(groups
                .into_iter()
                .filter(|(mid, _, _)| medicine.is_none_or(|m| m == *mid))
                .collect())
        })
        .await?
    }

    // Push subscriptions

    pub async fn upsert_push_subscription(
        &self,
        patient: i32,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<PushSubscription, StorageError> {
        use schema::push_subscriptions::dsl as ps;
        let pool = self.pool.clone();
        let endpoint_owned = endpoint.to_string();
        let p256dh_owned = p256dh.to_string();
        let auth_owned = auth.to_string();
        trace!(
            patient_id = patient,
            endpoint = %endpoint_owned,
            "upsert_push_subscription starting"
        );
        tokio::task::spawn_blocking(move || -> Result<PushSubscription, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let new_row = NewPushSubscription {
                patient_id: patient,
                endpoint: &endpoint_owned,
                p256dh: &p256dh_owned,
                auth: &auth_owned,
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(ps::push_subscriptions)
                .values(&new_row)
                .on_conflict(ps::endpoint)
                .do_update()
                .set((
                    ps::patient_id.eq(patient),
                    ps::p256dh.eq(&p256dh_owned),
                    ps::auth.eq(&auth_owned),
                    ps::updated_at.eq(now),
                    ps::last_error.eq::<Option<String>>(None::<String>),
                    ps::last_success_at.eq::<Option<NaiveDateTime>>(None::<NaiveDateTime>),
                ))
                .execute(&mut conn)?;
            Ok(ps::push_subscriptions
                .filter(ps::endpoint.eq(&endpoint_owned))
                .first::<PushSubscription>(&mut conn)?)
        })
        .await?
    }

    pub async fn list_push_subscriptions_for_patients(
        &self,
        patients: &[i32],
    ) -> Result<Vec<PushSubscription>, StorageError> {
        use schema::push_subscriptions::dsl as ps;
        let pool = self.pool.clone();
        let ids = patients.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Vec<PushSubscription>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(ps::push_subscriptions
                .filter(ps::patient_id.eq_any(&ids))
                .order(ps::id.asc())
                .load::<PushSubscription>(&mut conn)?)
        })
        .await?
    }

    pub async fn delete_push_subscription(
        &self,
        patient: i32,
        endpoint: &str,
    ) -> Result<bool, StorageError> {
        use schema::push_subscriptions::dsl as ps;
        let pool = self.pool.clone();
        let endpoint_owned = endpoint.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(
                ps::push_subscriptions
                    .filter(ps::patient_id.eq(patient))
                    .filter(ps::endpoint.eq(&endpoint_owned)),
            )
            .execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    /// Removes a subscription the push service reported as gone. Deleting an
    /// already removed row is not an error.
    pub async fn delete_push_subscription_by_id(&self, id: i32) -> Result<bool, StorageError> {
        use schema::push_subscriptions::dsl as ps;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted =
                diesel::delete(ps::push_subscriptions.filter(ps::id.eq(id))).execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    pub async fn mark_push_delivery_result(
        &self,
        id: i32,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        use schema::push_subscriptions::dsl as ps;
        let pool = self.pool.clone();
        let error_owned = error.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            if success {
                diesel::update(ps::push_subscriptions.filter(ps::id.eq(id)))
                    .set((
                        ps::updated_at.eq(now),
                        ps::last_success_at.eq(Some(now)),
                        ps::last_error.eq::<Option<String>>(None::<String>),
                    ))
                    .execute(&mut conn)?;
            } else {
                diesel::update(ps::push_subscriptions.filter(ps::id.eq(id)))
                    .set((
                        ps::updated_at.eq(now),
                        ps::last_error.eq(error_owned.as_deref()),
                    ))
                    .execute(&mut conn)?;
            }
            Ok(())
        })
        .await?
    }
}

fn owned_medicine(
    conn: &mut SqliteConnection,
    patient: i32,
    medicine: i32,
) -> Result<Medicine, StorageError> {
    use schema::medicines::dsl as m;
    m::medicines
        .filter(m::id.eq(medicine))
        .filter(m::patient_id.eq(patient))
        .first::<Medicine>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("medicine {medicine}")))
}

fn owned_notification(
    conn: &mut SqliteConnection,
    patient: i32,
    notification: i32,
) -> Result<(Notification, Medicine), StorageError> {
    use schema::{medicines, notifications};
    notifications::table
        .inner_join(medicines::table)
        .filter(notifications::id.eq(notification))
        .filter(medicines::patient_id.eq(patient))
        .select((Notification::as_select(), Medicine::as_select()))
        .first(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("notification {notification}")))
}

/// A referenced reminder must belong to the medicine being recorded.
fn check_notification(
    conn: &mut SqliteConnection,
    target: &ConsumptionTarget,
) -> Result<(), StorageError> {
    let Some(nid) = target.notification_id else {
        return Ok(());
    };
    let (notification, _) = owned_notification(conn, target.patient_id, nid)?;
    if notification.medicine_id != target.medicine_id {
        return Err(StorageError::NotFound(format!(
            "notification {nid} for medicine {}",
            target.medicine_id
        )));
    }
    Ok(())
}

fn insert_record(
    conn: &mut SqliteConnection,
    target: &ConsumptionTarget,
    row: NewConsumptionRecord<'_>,
) -> Result<ConsumptionRecord, StorageError> {
    use schema::consumption_records;
    trace!(
        patient_id = target.patient_id,
        medicine_id = target.medicine_id,
        status = row.status,
        "insert consumption record"
    );
    Ok(diesel::insert_into(consumption_records::table)
        .values(&row)
        .returning(ConsumptionRecord::as_returning())
        .get_result(conn)?)
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    // Cascades from medicines to reminders and records depend on this
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}
