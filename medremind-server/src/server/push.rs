//! Remote push sender: finds the reminders due this minute and pushes them to
//! every subscribed device of the owning patient, pruning subscriptions the
//! push service reports as gone.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use medremind_shared::api::{CronSummaryDto, ReminderPushPayload};
use medremind_shared::domain::TimeType;
use medremind_shared::schedule::ScheduleTime;
use tracing::{debug, info, warn};
use web_push::{
    ContentEncoding, HyperWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder,
};

use crate::storage::models::{Medicine, Notification, PushSubscription};
use crate::storage::{StorageError, Store};

use super::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The push service no longer knows this subscription (HTTP 404/410).
    #[error("subscription gone: {0}")]
    Gone(String),
    #[error("delivery failed: {0}")]
    Other(String),
}

/// Sends one encrypted payload to one subscription.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Result<(), DeliveryError>;
}

/// Web Push (VAPID + aes128gcm) over the `web-push` crate.
pub struct WebPushTransport {
    client: HyperWebPushClient,
    vapid_private: String,
    contact: Option<String>,
}

impl WebPushTransport {
    pub fn from_config(cfg: &AppConfig) -> Option<Self> {
        let push_cfg = cfg.push.as_ref()?;
        if !push_cfg.enabled {
            return None;
        }
        let vapid_private = push_cfg.vapid_private.clone()?;
        if push_cfg
            .vapid_public
            .as_deref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true)
            || vapid_private.trim().is_empty()
        {
            warn!("push: missing VAPID key(s); disabling push delivery");
            return None;
        }
        Some(Self {
            client: HyperWebPushClient::new(),
            vapid_private,
            contact: push_cfg.contact_email.clone(),
        })
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        let other = |e: WebPushError| DeliveryError::Other(e.to_string());
        let subscription_info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.p256dh.clone(),
            subscription.auth.clone(),
        );

        let mut builder = WebPushMessageBuilder::new(&subscription_info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);

        let mut vapid = VapidSignatureBuilder::from_base64(&self.vapid_private, &subscription_info)
            .map_err(other)?;
        if let Some(contact) = &self.contact {
            vapid.add_claim("sub", contact.clone());
        }
        builder.set_vapid_signature(vapid.build().map_err(other)?);

        match self.client.send(builder.build().map_err(other)?).await {
            Ok(()) => Ok(()),
            Err(err @ (WebPushError::EndpointNotFound(_) | WebPushError::EndpointNotValid(_))) => {
                Err(DeliveryError::Gone(err.to_string()))
            }
            Err(err) => Err(other(err)),
        }
    }
}

#[derive(Clone)]
pub struct PushService {
    inner: Arc<PushServiceInner>,
}

struct PushServiceInner {
    store: Store,
    tz: Tz,
    app_url: String,
    transport: Option<Arc<dyn PushTransport>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairOutcome {
    Delivered,
    Failed,
    Removed,
}

impl PushService {
    pub fn from_config(cfg: &AppConfig, store: Store, tz: Tz) -> Self {
        let transport = WebPushTransport::from_config(cfg)
            .map(|t| Arc::new(t) as Arc<dyn PushTransport>);
        let app_url = cfg
            .push
            .as_ref()
            .map(|p| p.app_url.clone())
            .unwrap_or_else(|| "/".to_string());
        Self::new(store, tz, app_url, transport)
    }

    pub fn new(
        store: Store,
        tz: Tz,
        app_url: String,
        transport: Option<Arc<dyn PushTransport>>,
    ) -> Self {
        Self {
            inner: Arc::new(PushServiceInner {
                store,
                tz,
                app_url,
                transport,
            }),
        }
    }

    pub fn with_transport(&self, transport: Arc<dyn PushTransport>) -> Self {
        Self::new(
            self.inner.store.clone(),
            self.inner.tz,
            self.inner.app_url.clone(),
            Some(transport),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.transport.is_some()
    }

    /// One batch: every active reminder scheduled for the current minute of
    /// `now` goes to every subscription of its patient, each pair once.
    pub async fn send_due_reminders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<CronSummaryDto, StorageError> {
        let inner = &self.inner;
        let minute = ScheduleTime::current(now, inner.tz).to_string();
        let due = inner.store.due_reminders(&minute).await?;
        let mut summary = CronSummaryDto {
            due_reminders: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            debug!(minute = %minute, "push: nothing due");
            return Ok(summary);
        }
        let Some(transport) = inner.transport.clone() else {
            warn!(minute = %minute, due = due.len(), "push: reminders due but push is disabled");
            return Ok(summary);
        };

        let patient_ids: Vec<i32> = due
            .iter()
            .map(|(_, m)| m.patient_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let subscriptions = inner
            .store
            .list_push_subscriptions_for_patients(&patient_ids)
            .await?;

        let pairs = pair_up(&due, &subscriptions);
        summary.attempted = pairs.len();
        info!(minute = %minute, due = due.len(), pairs = pairs.len(), "push: sending due reminders");

        let removed_ids = tokio::sync::Mutex::new(HashSet::new());
        let sends = pairs.into_iter().map(|(notification, medicine, subscription)| {
            self.deliver(
                transport.as_ref(),
                notification,
                medicine,
                subscription,
                &removed_ids,
            )
        });
        for outcome in join_all(sends).await {
            match outcome {
                PairOutcome::Delivered => summary.delivered += 1,
                PairOutcome::Failed => summary.failed += 1,
                PairOutcome::Removed => {
                    summary.failed += 1;
                    summary.removed_subscriptions += 1;
                }
            }
        }
        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            removed = summary.removed_subscriptions,
            "push: batch finished"
        );
        Ok(summary)
    }

    async fn deliver(
        &self,
        transport: &dyn PushTransport,
        notification: &Notification,
        medicine: &Medicine,
        subscription: &PushSubscription,
        removed_ids: &tokio::sync::Mutex<HashSet<i32>>,
    ) -> PairOutcome {
        let store = &self.inner.store;
        let endpoint = subscription.endpoint.as_str();
        let payload = match self.payload_for(notification, medicine) {
            Ok(p) => p,
            Err(e) => {
                warn!(notification_id = notification.id, error = %e, "push: cannot build payload");
                return PairOutcome::Failed;
            }
        };

        match transport.send(subscription, &payload).await {
            Ok(()) => {
                debug!(endpoint = %endpoint, notification_id = notification.id, "push: delivered");
                if let Err(e) = store
                    .mark_push_delivery_result(subscription.id, true, None)
                    .await
                {
                    warn!(endpoint = %endpoint, error = %e, "push: failed to mark success");
                }
                PairOutcome::Delivered
            }
            Err(DeliveryError::Gone(reason)) => {
                warn!(endpoint = %endpoint, error = %reason, "push: subscription gone, removing");
                // Several reminders can hit the same dead subscription in one batch
                if !removed_ids.lock().await.insert(subscription.id) {
                    return PairOutcome::Failed;
                }
                match store.delete_push_subscription_by_id(subscription.id).await {
                    Ok(true) => PairOutcome::Removed,
                    Ok(false) => PairOutcome::Failed,
                    Err(e) => {
                        warn!(
                            endpoint = %endpoint,
                            error = %e,
                            "push: failed to remove stale subscription"
                        );
                        PairOutcome::Failed
                    }
                }
            }
            Err(DeliveryError::Other(reason)) => {
                warn!(endpoint = %endpoint, error = %reason, "push: send failed");
                if let Err(e) = store
                    .mark_push_delivery_result(subscription.id, false, Some(&reason))
                    .await
                {
                    warn!(endpoint = %endpoint, error = %e, "push: failed to mark error");
                }
                PairOutcome::Failed
            }
        }
    }

    fn payload_for(
        &self,
        notification: &Notification,
        medicine: &Medicine,
    ) -> Result<Vec<u8>, String> {
        let time_type = notification
            .time_type
            .parse::<TimeType>()
            .map_err(|e| e.to_string())?;
        let payload = ReminderPushPayload {
            title: notification.title.clone(),
            body: notification.message.clone(),
            medicine_name: medicine.name.clone(),
            dosage: medicine.dosage_per_take,
            notification_id: notification.id,
            medicine_id: medicine.id,
            time_type,
            url: deep_link(&self.inner.app_url, notification.id, medicine.id),
        };
        serde_json::to_vec(&payload).map_err(|e| e.to_string())
    }
}

/// Every (reminder, subscription) pair for the reminder's patient, each once.
fn pair_up<'a>(
    due: &'a [(Notification, Medicine)],
    subscriptions: &'a [PushSubscription],
) -> Vec<(&'a Notification, &'a Medicine, &'a PushSubscription)> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for (notification, medicine) in due {
        for sub in subscriptions
            .iter()
            .filter(|s| s.patient_id == medicine.patient_id)
        {
            if seen.insert((notification.id, sub.id)) {
                pairs.push((notification, medicine, sub));
            }
        }
    }
    pairs
}

pub fn deep_link(app_url: &str, notification_id: i32, medicine_id: i32) -> String {
    format!(
        "{}/?notification={}&medicine={}",
        app_url.trim_end_matches('/'),
        notification_id,
        medicine_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn notification(id: i32, medicine_id: i32) -> Notification {
        Notification {
            id,
            medicine_id,
            title: "t".into(),
            message: "m".into(),
            scheduled_time: "08:00".into(),
            time_type: "morning".into(),
            is_active: true,
            group_id: None,
            created_at: NaiveDateTime::default(),
        }
    }

    fn medicine(id: i32, patient_id: i32) -> Medicine {
        Medicine {
            id,
            patient_id,
            name: "Aspirin".into(),
            dosage_per_take: 1,
            total_quantity: 10,
            current_stock: 10,
            image_url: None,
            created_at: NaiveDateTime::default(),
            updated_at: NaiveDateTime::default(),
        }
    }

    fn subscription(id: i32, patient_id: i32) -> PushSubscription {
        PushSubscription {
            id,
            patient_id,
            endpoint: format!("https://push.example/{id}"),
            p256dh: "k".into(),
            auth: "a".into(),
            created_at: NaiveDateTime::default(),
            updated_at: NaiveDateTime::default(),
            last_success_at: None,
            last_error: None,
        }
    }

    #[test]
    fn pairs_only_match_the_owning_patient() {
        let due = vec![
            (notification(1, 10), medicine(10, 1)),
            (notification(2, 20), medicine(20, 2)),
        ];
        let subs = vec![subscription(100, 1), subscription(101, 1), subscription(200, 2)];
        let pairs = pair_up(&due, &subs);
        let ids: Vec<(i32, i32)> = pairs.iter().map(|(n, _, s)| (n.id, s.id)).collect();
        assert_eq!(ids, vec![(1, 100), (1, 101), (2, 200)]);
    }

    #[test]
    fn duplicate_rows_do_not_double_send() {
        let due = vec![
            (notification(1, 10), medicine(10, 1)),
            (notification(1, 10), medicine(10, 1)),
        ];
        let subs = vec![subscription(100, 1)];
        assert_eq!(pair_up(&due, &subs).len(), 1);
    }

    #[test]
    fn deep_link_carries_both_ids() {
        assert_eq!(
            deep_link("https://meds.example/", 3, 7),
            "https://meds.example/?notification=3&medicine=7"
        );
        assert_eq!(deep_link("/", 3, 7), "/?notification=3&medicine=7");
    }
}
