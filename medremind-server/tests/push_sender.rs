use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use medremind_server::server::push::{DeliveryError, PushTransport};
use medremind_server::storage::models::{NewNotification, PushSubscription};
use medremind_server::server;
use medremind_server::storage::{MedicineInput, Store};
use medremind_shared::api::ReminderPushPayload;
use medremind_shared::domain::PatientProfile;

/// Records every send; endpoints listed in `gone` answer like a 410.
#[derive(Default)]
struct FakeTransport {
    gone: HashSet<String>,
    failing: HashSet<String>,
    sent: Mutex<Vec<(String, ReminderPushPayload)>>,
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        let decoded: ReminderPushPayload = serde_json::from_slice(payload).unwrap();
        self.sent
            .lock()
            .unwrap()
            .push((subscription.endpoint.clone(), decoded));
        if self.gone.contains(&subscription.endpoint) {
            return Err(DeliveryError::Gone("410 Gone".into()));
        }
        if self.failing.contains(&subscription.endpoint) {
            return Err(DeliveryError::Other("503".into()));
        }
        Ok(())
    }
}

struct Setup {
    store: Store,
    patient: i32,
    _dir: tempfile::TempDir,
}

async fn setup(reminder_time: &str) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::connect_sqlite(dir.path().join("push.db").to_str().unwrap())
        .await
        .unwrap();
    store
        .seed_patients(&[PatientProfile {
            phone_number: "010".into(),
            name: "Kim".into(),
        }])
        .await
        .unwrap();
    let patient = store.find_patient_by_phone("010").await.unwrap().unwrap().id;
    store
        .create_medicine(
            patient,
            MedicineInput {
                name: "Metformin".into(),
                dosage_per_take: 2,
                total_quantity: 60,
                current_stock: 60,
                image_url: None,
            },
            vec![NewNotification {
                medicine_id: 0,
                title: "Time to take Metformin".into(),
                message: "Take 2".into(),
                scheduled_time: reminder_time.into(),
                time_type: "morning".into(),
                is_active: true,
                group_id: None,
            }],
        )
        .await
        .unwrap();
    Setup {
        store,
        patient,
        _dir: dir,
    }
}

fn config() -> server::AppConfig {
    server::AppConfig::from_yaml(
        "timezone: UTC\ncron_secret: x\npush:\n  enabled: false\n  app_url: https://meds.example\n",
    )
    .unwrap()
}

#[tokio::test]
async fn gone_subscription_is_pruned_and_others_still_delivered() {
    let s = setup("08:00").await;
    for ep in ["https://push.example/a", "https://push.example/dead", "https://push.example/c"] {
        s.store
            .upsert_push_subscription(s.patient, ep, "key", "auth")
            .await
            .unwrap();
    }
    let transport = Arc::new(FakeTransport {
        gone: HashSet::from(["https://push.example/dead".to_string()]),
        ..Default::default()
    });
    let state = server::AppState::new(config(), s.store.clone())
        .unwrap()
        .with_push_transport(transport.clone());

    let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 15).unwrap();
    let summary = state.push.send_due_reminders(now).await.unwrap();
    assert_eq!(summary.due_reminders, 1);
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.removed_subscriptions, 1);

    let left: Vec<String> = s
        .store
        .list_push_subscriptions_for_patients(&[s.patient])
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.endpoint)
        .collect();
    assert_eq!(left, vec!["https://push.example/a", "https://push.example/c"]);

    let sent = transport.sent.lock().unwrap();
    let (_, payload) = &sent[0];
    assert_eq!(payload.medicine_name, "Metformin");
    assert_eq!(payload.dosage, 2);
    assert!(payload.url.starts_with("https://meds.example/?notification="));
}

#[tokio::test]
async fn other_failures_keep_the_subscription() {
    let s = setup("21:30").await;
    s.store
        .upsert_push_subscription(s.patient, "https://push.example/flaky", "key", "auth")
        .await
        .unwrap();
    let transport = Arc::new(FakeTransport {
        failing: HashSet::from(["https://push.example/flaky".to_string()]),
        ..Default::default()
    });
    let state = server::AppState::new(config(), s.store.clone())
        .unwrap()
        .with_push_transport(transport);

    let now = Utc.with_ymd_and_hms(2024, 5, 1, 21, 30, 59).unwrap();
    let summary = state.push.send_due_reminders(now).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.removed_subscriptions, 0);
    let subs = s
        .store
        .list_push_subscriptions_for_patients(&[s.patient])
        .await
        .unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].last_error.as_deref(), Some("503"));
}

#[tokio::test]
async fn nothing_is_sent_outside_the_matching_minute() {
    let s = setup("08:00").await;
    s.store
        .upsert_push_subscription(s.patient, "https://push.example/a", "key", "auth")
        .await
        .unwrap();
    let transport = Arc::new(FakeTransport::default());
    let state = server::AppState::new(config(), s.store.clone())
        .unwrap()
        .with_push_transport(transport.clone());

    for (h, m) in [(7, 59), (8, 1)] {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap();
        let summary = state.push.send_due_reminders(now).await.unwrap();
        assert_eq!(summary.due_reminders, 0);
    }
    assert!(transport.sent.lock().unwrap().is_empty());
}
