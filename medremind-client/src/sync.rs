//! Sync Coordinator: keeps the local cache and the matcher's schedule in
//! line with the server, which is always authoritative.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medremind_shared::api::rest::{self, RestError};
use medremind_shared::api::{
    ConsumptionReq, ConsumptionResp, MedicineDto, NotificationDto, ToggleNotificationReq,
};
use medremind_shared::domain::ConsumptionAction;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::AppError;
use crate::cache::{self, KeyValueStore};
use crate::clock::Clock;
use crate::matcher::TimeMatcher;
use crate::schedule::{self, AlertPrefs};

pub const KEY_MEDICINES: &str = "medicines";
pub const KEY_NOTIFICATIONS: &str = "notifications";
pub const KEY_PENDING: &str = "pendingOps";
pub const KEY_LAST_SYNC: &str = "lastSyncAt";

/// A consumption action for the current patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionRequest {
    pub medicine_id: i32,
    pub notification_id: Option<i32>,
    pub action: ConsumptionAction,
    pub dosage_taken: Option<i32>,
    pub notes: Option<String>,
}

/// Server operations the client core depends on, scoped to one patient.
#[async_trait]
pub trait MedicationApi: Send + Sync {
    async fn list_medicines(&self) -> Result<Vec<MedicineDto>, RestError>;
    async fn list_notifications(&self) -> Result<Vec<NotificationDto>, RestError>;
    async fn toggle_notification(
        &self,
        id: i32,
        is_active: bool,
    ) -> Result<NotificationDto, RestError>;
    async fn record_consumption(
        &self,
        req: &ConsumptionRequest,
    ) -> Result<ConsumptionResp, RestError>;
}

/// [`MedicationApi`] over the shared REST client.
#[derive(Debug, Clone)]
pub struct RestApi {
    base: String,
    phone: String,
}

impl RestApi {
    pub fn new(base: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            phone: phone.into(),
        }
    }
}

#[async_trait]
impl MedicationApi for RestApi {
    async fn list_medicines(&self) -> Result<Vec<MedicineDto>, RestError> {
        rest::list_medicines(&self.base, &self.phone).await
    }

    async fn list_notifications(&self) -> Result<Vec<NotificationDto>, RestError> {
        rest::list_notifications(&self.base, &self.phone).await
    }

    async fn toggle_notification(
        &self,
        id: i32,
        is_active: bool,
    ) -> Result<NotificationDto, RestError> {
        let req = ToggleNotificationReq {
            phone_number: self.phone.clone(),
            id,
            is_active,
        };
        rest::toggle_notification(&self.base, &req).await
    }

    async fn record_consumption(
        &self,
        req: &ConsumptionRequest,
    ) -> Result<ConsumptionResp, RestError> {
        let body = ConsumptionReq {
            phone_number: self.phone.clone(),
            medicine_id: req.medicine_id,
            notification_id: req.notification_id,
            status: req.action,
            dosage_taken: req.dosage_taken,
            notes: req.notes.clone(),
        };
        rest::record_consumption(&self.base, &body).await
    }
}

/// A local change the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PendingOp {
    #[serde(rename_all = "camelCase")]
    Toggle {
        notification_id: i32,
        is_active: bool,
        previous: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Confirmed,
    /// Applied locally; the server will be retried on the next sync.
    Queued,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub medicines: usize,
    pub reminders: usize,
    pub replayed: usize,
    pub still_pending: usize,
}

pub struct SyncCoordinator {
    api: Arc<dyn MedicationApi>,
    cache: Arc<dyn KeyValueStore>,
    matcher: Arc<TimeMatcher>,
    clock: Arc<dyn Clock>,
    prefs: AlertPrefs,
    // Serializes cache rewrites between periodic syncs and local edits.
    lock: tokio::sync::Mutex<()>,
    resync: Notify,
}

impl SyncCoordinator {
    pub fn new(
        api: Arc<dyn MedicationApi>,
        cache: Arc<dyn KeyValueStore>,
        matcher: Arc<TimeMatcher>,
        clock: Arc<dyn Clock>,
        prefs: AlertPrefs,
    ) -> Self {
        Self {
            api,
            cache,
            matcher,
            clock,
            prefs,
            lock: tokio::sync::Mutex::new(()),
            resync: Notify::new(),
        }
    }

    pub fn matcher(&self) -> &Arc<TimeMatcher> {
        &self.matcher
    }

    /// Loads whatever the last run cached so reminders work before the first
    /// successful sync. Returns the number of reminders installed.
    pub fn warm_start(&self) -> Result<usize, AppError> {
        let cached = self.cached_notifications()?;
        self.install(&cached);
        Ok(cached.len())
    }

    pub fn cached_medicines(&self) -> Result<Vec<MedicineDto>, AppError> {
        Ok(cache::get_typed(self.cache.as_ref(), KEY_MEDICINES)?.unwrap_or_default())
    }

    pub fn cached_notifications(&self) -> Result<Vec<NotificationDto>, AppError> {
        Ok(cache::get_typed(self.cache.as_ref(), KEY_NOTIFICATIONS)?.unwrap_or_default())
    }

    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        cache::get_typed(self.cache.as_ref(), KEY_LAST_SYNC)
    }

    pub fn pending_ops(&self) -> Result<Vec<PendingOp>, AppError> {
        Ok(cache::get_typed(self.cache.as_ref(), KEY_PENDING)?.unwrap_or_default())
    }

    /// Replays pending operations, then fetches medicines and reminders and
    /// replaces the cache and the matcher schedule wholesale.
    pub async fn sync_now(&self) -> Result<SyncReport, AppError> {
        let _guard = self.lock.lock().await;
        let (replayed, remaining) = self.replay_pending().await?;

        let medicines = self.api.list_medicines().await.map_err(sync_failure)?;
        let mut notifications = self.api.list_notifications().await.map_err(sync_failure)?;
        apply_pending(&mut notifications, &remaining);

        cache::set_typed(self.cache.as_ref(), KEY_MEDICINES, &medicines)?;
        cache::set_typed(self.cache.as_ref(), KEY_NOTIFICATIONS, &notifications)?;
        cache::set_typed(self.cache.as_ref(), KEY_LAST_SYNC, &self.clock.now())?;
        self.install(&notifications);

        Ok(SyncReport {
            medicines: medicines.len(),
            reminders: notifications.len(),
            replayed,
            still_pending: remaining.len(),
        })
    }

    /// [`Self::sync_now`] for the loop: failures are logged and the cached
    /// schedule stays in place.
    pub async fn sync_or_warn(&self) -> Option<SyncReport> {
        match self.sync_now().await {
            Ok(report) => {
                debug!(
                    medicines = report.medicines,
                    reminders = report.reminders,
                    replayed = report.replayed,
                    pending = report.still_pending,
                    "sync ok"
                );
                Some(report)
            }
            Err(e) if self.matcher.snapshot().is_empty() => {
                error!(error = %e, "sync failed and no cached schedule is available");
                None
            }
            Err(e) => {
                warn!(error = %e, "sync failed; keeping cached schedule");
                None
            }
        }
    }

    /// Asks whoever runs the background sync to fetch again soon. Requests
    /// made while nobody waits are coalesced into one.
    pub fn request_resync(&self) {
        self.resync.notify_one();
    }

    /// Resolves once [`Self::request_resync`] has been called.
    pub async fn resync_requested(&self) {
        self.resync.notified().await;
    }

    /// Records a consumption action and re-syncs so the schedule and stock
    /// shown locally follow the write.
    pub async fn record_consumption(
        &self,
        req: ConsumptionRequest,
    ) -> Result<ConsumptionResp, AppError> {
        let resp = self.submit_consumption(&req).await?;
        self.sync_or_warn().await;
        Ok(resp)
    }

    /// Sends a consumption action without syncing afterwards; the caller is
    /// responsible for requesting the follow-up sync.
    pub async fn submit_consumption(
        &self,
        req: &ConsumptionRequest,
    ) -> Result<ConsumptionResp, AppError> {
        let resp = self.api.record_consumption(req).await?;
        info!(
            medicine_id = req.medicine_id,
            notification_id = ?req.notification_id,
            action = ?req.action,
            current_stock = resp.current_stock,
            "consumption recorded"
        );
        Ok(resp)
    }

    /// Two-phase toggle: applied to the cache and schedule first, then sent.
    /// A rejection rolls the local change back; a transport failure keeps it
    /// and queues the operation for the next sync.
    pub async fn toggle_reminder(
        &self,
        notification_id: i32,
        is_active: bool,
    ) -> Result<ToggleOutcome, AppError> {
        let outcome = {
            let _guard = self.lock.lock().await;
            let mut cached = self.cached_notifications()?;
            let entry = cached
                .iter_mut()
                .find(|n| n.id == notification_id)
                .ok_or_else(|| {
                    AppError::NotFound(format!("reminder {notification_id} is not in the local schedule"))
                })?;
            let previous = entry.is_active;
            entry.is_active = is_active;
            self.store_notifications(&cached)?;

            match self.api.toggle_notification(notification_id, is_active).await {
                Ok(_) => ToggleOutcome::Confirmed,
                Err(e) if e.is_client_error() => {
                    warn!(notification_id, error = %e, "toggle rejected; rolling back");
                    if let Some(entry) = cached.iter_mut().find(|n| n.id == notification_id) {
                        entry.is_active = previous;
                    }
                    self.store_notifications(&cached)?;
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(notification_id, error = %e, "toggle not confirmed; queued for next sync");
                    let mut pending = self.pending_ops()?;
                    let previous = pending
                        .iter()
                        .find_map(|op| match op {
                            PendingOp::Toggle {
                                notification_id: id,
                                previous,
                                ..
                            } if *id == notification_id => Some(*previous),
                            _ => None,
                        })
                        .unwrap_or(previous);
                    pending.retain(|op| !op.targets(notification_id));
                    pending.push(PendingOp::Toggle {
                        notification_id,
                        is_active,
                        previous,
                    });
                    self.store_pending(&pending)?;
                    ToggleOutcome::Queued
                }
            }
        };
        if outcome == ToggleOutcome::Confirmed {
            self.sync_or_warn().await;
        }
        Ok(outcome)
    }

    /// Sends queued operations in order. The first transport failure stops
    /// the replay and keeps it and everything after it queued.
    async fn replay_pending(&self) -> Result<(usize, Vec<PendingOp>), AppError> {
        let ops = self.pending_ops()?;
        if ops.is_empty() {
            return Ok((0, ops));
        }
        let mut replayed = 0;
        let mut remaining = Vec::new();
        for op in ops {
            if !remaining.is_empty() {
                remaining.push(op);
                continue;
            }
            let PendingOp::Toggle {
                notification_id,
                is_active,
                ..
            } = &op;
            match self.api.toggle_notification(*notification_id, *is_active).await {
                Ok(_) => replayed += 1,
                Err(e) if e.is_client_error() => {
                    // Dropped; the fetch that follows restores server state.
                    warn!(notification_id, error = %e, "pending toggle rejected; rolled back");
                }
                Err(e) => {
                    debug!(notification_id, error = %e, "pending toggle still unconfirmed");
                    remaining.push(op);
                }
            }
        }
        self.store_pending(&remaining)?;
        Ok((replayed, remaining))
    }

    fn store_notifications(&self, notifications: &[NotificationDto]) -> Result<(), AppError> {
        cache::set_typed(self.cache.as_ref(), KEY_NOTIFICATIONS, &notifications)?;
        self.install(notifications);
        Ok(())
    }

    fn store_pending(&self, pending: &[PendingOp]) -> Result<(), AppError> {
        if pending.is_empty() {
            self.cache.remove(KEY_PENDING)
        } else {
            cache::set_typed(self.cache.as_ref(), KEY_PENDING, &pending)
        }
    }

    fn install(&self, notifications: &[NotificationDto]) {
        let derived = schedule::derive(notifications, self.matcher.tz(), self.prefs);
        self.matcher.replace(derived);
    }
}

impl PendingOp {
    fn targets(&self, id: i32) -> bool {
        match self {
            PendingOp::Toggle {
                notification_id, ..
            } => *notification_id == id,
        }
    }
}

/// Keeps still-unconfirmed local edits visible on top of fetched data.
fn apply_pending(notifications: &mut [NotificationDto], pending: &[PendingOp]) {
    for op in pending {
        let PendingOp::Toggle {
            notification_id,
            is_active,
            ..
        } = op;
        if let Some(n) = notifications.iter_mut().find(|n| n.id == *notification_id) {
            n.is_active = *is_active;
        }
    }
}

fn sync_failure(e: RestError) -> AppError {
    AppError::Sync(e.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use medremind_shared::api::ConsumptionRecordDto;
    use medremind_shared::domain::ConsumptionStatus;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Failure {
        Network,
        Rejected,
    }

    /// In-memory server: keeps stock the way the real recorder does.
    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub medicines: Mutex<Vec<MedicineDto>>,
        pub notifications: Mutex<Vec<NotificationDto>>,
        pub failure: Mutex<Option<Failure>>,
        pub recorded: Mutex<Vec<ConsumptionRequest>>,
        pub toggles: Mutex<Vec<(i32, bool)>>,
        /// Added to every call; a slow but working server.
        pub latency: Mutex<Option<Duration>>,
    }

    impl FakeApi {
        pub(crate) fn fail_with(&self, f: Option<Failure>) {
            *self.failure.lock().unwrap() = f;
        }

        pub(crate) fn slow_down(&self, latency: Option<Duration>) {
            *self.latency.lock().unwrap() = latency;
        }

        async fn respond(&self) -> Result<(), RestError> {
            let latency = *self.latency.lock().unwrap();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            self.check()
        }

        fn check(&self) -> Result<(), RestError> {
            match *self.failure.lock().unwrap() {
                Some(Failure::Network) => Err(RestError::Http("connection refused".into())),
                Some(Failure::Rejected) => Err(RestError::Status {
                    status: 404,
                    body: "not found".into(),
                }),
                None => Ok(()),
            }
        }
    }

    pub(crate) fn medicine(id: i32, stock: i32, dosage: i32) -> MedicineDto {
        MedicineDto {
            id,
            patient_id: 1,
            name: format!("Medicine {id}"),
            dosage_per_take: dosage,
            total_quantity: stock,
            current_stock: stock,
            image_url: None,
        }
    }

    #[async_trait]
    impl MedicationApi for FakeApi {
        async fn list_medicines(&self) -> Result<Vec<MedicineDto>, RestError> {
            self.respond().await?;
            Ok(self.medicines.lock().unwrap().clone())
        }

        async fn list_notifications(&self) -> Result<Vec<NotificationDto>, RestError> {
            self.respond().await?;
            Ok(self.notifications.lock().unwrap().clone())
        }

        async fn toggle_notification(
            &self,
            id: i32,
            is_active: bool,
        ) -> Result<NotificationDto, RestError> {
            self.respond().await?;
            self.toggles.lock().unwrap().push((id, is_active));
            let mut all = self.notifications.lock().unwrap();
            let n = all.iter_mut().find(|n| n.id == id).ok_or(RestError::Status {
                status: 404,
                body: "not found".into(),
            })?;
            n.is_active = is_active;
            Ok(n.clone())
        }

        async fn record_consumption(
            &self,
            req: &ConsumptionRequest,
        ) -> Result<ConsumptionResp, RestError> {
            self.respond().await?;
            let mut meds = self.medicines.lock().unwrap();
            let m = meds
                .iter_mut()
                .find(|m| m.id == req.medicine_id)
                .ok_or(RestError::Status {
                    status: 404,
                    body: "medicine not found".into(),
                })?;
            let (status, dosage) = match req.action {
                ConsumptionAction::Taken => {
                    let d = req.dosage_taken.unwrap_or(m.dosage_per_take);
                    m.current_stock = (m.current_stock - d).max(0);
                    (ConsumptionStatus::Taken, d)
                }
                ConsumptionAction::Skipped => (ConsumptionStatus::Skipped, 0),
                ConsumptionAction::Cancel => (ConsumptionStatus::Cancelled, 0),
            };
            self.recorded.lock().unwrap().push(req.clone());
            Ok(ConsumptionResp {
                record: ConsumptionRecordDto {
                    id: self.recorded.lock().unwrap().len() as i32,
                    patient_id: 1,
                    medicine_id: m.id,
                    notification_id: req.notification_id,
                    scheduled_at: "2024-05-01T08:00:00Z".into(),
                    consumed_at: None,
                    dosage_taken: dosage,
                    status,
                    notes: req.notes.clone(),
                    created_at: "2024-05-01T08:00:15Z".into(),
                },
                current_stock: m.current_stock,
            })
        }
    }
}
