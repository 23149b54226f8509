//! Delivery Dispatcher: turns due reminders into alerts and user answers
//! into consumption records.
//!
//! Everything goes through [`Dispatcher::handle`]. At most one modal is
//! active; a reminder that comes due while one is showing is dropped, not
//! queued. The countdown, the sound/vibration loops and an in-flight answer
//! belong to the active modal and are cancelled on every way out of it.
//!
//! `handle` never waits on the server. An answer is sent from a task of its
//! own and comes back as [`DispatchEvent::Recorded`] or
//! [`DispatchEvent::RecordFailed`], so the minute tick keeps running.

use std::sync::Arc;
use std::time::Duration;

use medremind_shared::domain::{ConsumptionAction, NotificationKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::platform::Platform;
use crate::schedule::ScheduledNotification;
use crate::sync::{ConsumptionRequest, SyncCoordinator};

pub const MODAL_TIMEOUT: Duration = Duration::from_secs(300);
const SOUND_PERIOD: Duration = Duration::from_secs(2);
const VIBRATION_PERIOD: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// The matcher found this reminder due.
    Due(ScheduledNotification),
    /// Answers refer to the active modal.
    Taken { dosage: Option<i32> },
    Skipped,
    Dismiss,
    /// Countdown expiry for the modal showing `key`.
    TimedOut { key: NotificationKey },
    /// The server stored the answer given to the modal showing `key`.
    Recorded {
        key: NotificationKey,
        action: ConsumptionAction,
        current_stock: i32,
    },
    RecordFailed { key: NotificationKey, error: String },
    /// The user opened a reminder from a system or push notification.
    OpenFromNotification { notification_id: i32 },
    /// Any user input; unlocks audible alerts.
    UserInteraction,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Dispatched,
    Resolved(ConsumptionAction),
    Dismissed,
    TimedOut,
}

impl DeliveryState {
    fn label(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Dispatched => "dispatched",
            DeliveryState::Resolved(ConsumptionAction::Taken) => "taken",
            DeliveryState::Resolved(ConsumptionAction::Skipped) => "skipped",
            DeliveryState::Resolved(ConsumptionAction::Cancel) => "cancelled",
            DeliveryState::Dismissed => "dismissed",
            DeliveryState::TimedOut => "timed out",
        }
    }
}

/// What one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Dispatched { modal: bool },
    /// Another modal is active.
    Dropped,
    /// No channel could show the reminder.
    Lapsed,
    Closed(DeliveryState),
    /// The answer is on its way to the server.
    Recording,
    /// An answer is in flight; the event waits for its outcome.
    Busy,
    /// The answer could not be recorded; the modal stays open.
    RecordFailed,
    Primed,
    Ignored,
}

struct ActiveModal {
    reminder: ScheduledNotification,
    state: DeliveryState,
    /// Answer sent and not yet confirmed.
    recording: Option<ConsumptionAction>,
    /// The countdown ran out while an answer was in flight.
    expired: bool,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveModal {
    fn shows(&self, key: &NotificationKey) -> bool {
        self.reminder.key == *key
    }
}

#[derive(Debug, Clone, Copy)]
enum Pulse {
    Sound,
    Vibration,
}

pub struct Dispatcher {
    platform: Arc<dyn Platform>,
    sync: Arc<SyncCoordinator>,
    events: mpsc::Sender<DispatchEvent>,
    timeout: Duration,
    audio_primed: bool,
    active: Option<ActiveModal>,
}

impl Dispatcher {
    pub fn new(
        platform: Arc<dyn Platform>,
        sync: Arc<SyncCoordinator>,
        events: mpsc::Sender<DispatchEvent>,
        timeout: Duration,
    ) -> Self {
        Self {
            platform,
            sync,
            events,
            timeout,
            audio_primed: false,
            active: None,
        }
    }

    /// Key and state of the modal currently showing, if any.
    pub fn active(&self) -> Option<(&NotificationKey, DeliveryState)> {
        self.active.as_ref().map(|a| (&a.reminder.key, a.state))
    }

    pub async fn handle(&mut self, event: DispatchEvent) -> Handled {
        match event {
            DispatchEvent::Due(reminder) => self.dispatch(reminder, true).await,
            DispatchEvent::OpenFromNotification { notification_id } => {
                match self.sync.matcher().find(notification_id) {
                    Some(reminder) => self.dispatch(reminder, false).await,
                    None => {
                        warn!(notification_id, "opened reminder is not in the local schedule");
                        Handled::Ignored
                    }
                }
            }
            DispatchEvent::Taken { dosage } => self.answer(ConsumptionAction::Taken, dosage),
            DispatchEvent::Skipped => self.answer(ConsumptionAction::Skipped, None),
            DispatchEvent::Recorded {
                key,
                action,
                current_stock,
            } => self.recorded(key, action, current_stock).await,
            DispatchEvent::RecordFailed { key, error } => self.record_failed(key, error).await,
            DispatchEvent::Dismiss => {
                if self.active.as_ref().is_some_and(|a| a.recording.is_some()) {
                    debug!("answer in flight; dismiss ignored");
                    return Handled::Busy;
                }
                self.close(DeliveryState::Dismissed).await
            }
            DispatchEvent::Teardown => self.close(DeliveryState::Dismissed).await,
            DispatchEvent::TimedOut { key } => self.expire(key).await,
            DispatchEvent::UserInteraction => {
                if !self.audio_primed {
                    debug!("audio primed by user interaction");
                }
                self.audio_primed = true;
                Handled::Primed
            }
        }
    }

    async fn dispatch(&mut self, reminder: ScheduledNotification, post_notification: bool) -> Handled {
        let notification_id = reminder.notification_id();
        if let Some(active) = &self.active {
            warn!(
                notification_id,
                active_id = active.reminder.notification_id(),
                "reminder modal already showing; dropping new reminder"
            );
            return Handled::Dropped;
        }
        debug!(notification_id, state = DeliveryState::Pending.label(), "dispatching reminder");

        let notified = post_notification
            && match self.platform.notify(&reminder).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(notification_id, error = %e, "system notification unavailable");
                    false
                }
            };
        let modal = self.platform.has_focus()
            && match self.platform.show_modal(&reminder, self.timeout).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(notification_id, error = %e, "modal unavailable");
                    false
                }
            };

        if !modal {
            if notified {
                info!(notification_id, "reminder posted as system notification");
                return Handled::Dispatched { modal: false };
            }
            warn!(notification_id, "no alert channel available; reminder lapsed");
            return Handled::Lapsed;
        }

        let cancel = CancellationToken::new();
        let tasks = self.spawn_alerts(&reminder, &cancel);
        info!(
            notification_id,
            medicine_id = reminder.medicine_id,
            timeout_secs = self.timeout.as_secs(),
            "reminder modal shown"
        );
        self.active = Some(ActiveModal {
            reminder,
            state: DeliveryState::Dispatched,
            recording: None,
            expired: false,
            cancel,
            tasks,
        });
        Handled::Dispatched { modal: true }
    }

    fn answer(&mut self, action: ConsumptionAction, dosage: Option<i32>) -> Handled {
        let Some(active) = self.active.as_mut() else {
            debug!(?action, "no active reminder to answer");
            return Handled::Ignored;
        };
        if let Some(inflight) = active.recording {
            debug!(?action, ?inflight, "answer already in flight");
            return Handled::Busy;
        }
        let req = ConsumptionRequest {
            medicine_id: active.reminder.medicine_id,
            notification_id: Some(active.reminder.notification_id()),
            action,
            dosage_taken: dosage,
            notes: None,
        };
        active.recording = Some(action);
        active.tasks.push(spawn_record(
            self.sync.clone(),
            self.events.clone(),
            active.reminder.key.clone(),
            req,
            active.cancel.child_token(),
        ));
        Handled::Recording
    }

    async fn expire(&mut self, key: NotificationKey) -> Handled {
        match self.active.as_mut() {
            Some(active) if active.shows(&key) => {
                if active.recording.is_some() {
                    active.expired = true;
                    debug!(key = %key, "countdown expired while answer in flight");
                    return Handled::Busy;
                }
            }
            _ => {
                debug!(key = %key, "stale countdown expiry ignored");
                return Handled::Ignored;
            }
        }
        self.close(DeliveryState::TimedOut).await
    }

    /// Alerts come down only once the answer is stored.
    async fn recorded(
        &mut self,
        key: NotificationKey,
        action: ConsumptionAction,
        current_stock: i32,
    ) -> Handled {
        self.sync.request_resync();
        if !self.active.as_ref().is_some_and(|a| a.shows(&key)) {
            debug!(key = %key, "answer recorded after its modal closed");
            return Handled::Ignored;
        }
        debug!(key = %key, ?action, current_stock, "answer recorded");
        self.close(DeliveryState::Resolved(action)).await
    }

    async fn record_failed(&mut self, key: NotificationKey, error: String) -> Handled {
        let expired = match self.active.as_mut() {
            Some(active) if active.shows(&key) => {
                active.recording = None;
                active.expired
            }
            _ => {
                debug!(key = %key, error = %error, "failure for a closed modal ignored");
                return Handled::Ignored;
            }
        };
        if expired {
            warn!(key = %key, error = %error, "recording failed after the countdown ran out");
            return self.close(DeliveryState::TimedOut).await;
        }
        warn!(key = %key, error = %error, "recording failed; keeping reminder open");
        Handled::RecordFailed
    }

    async fn close(&mut self, state: DeliveryState) -> Handled {
        let Some(mut active) = self.active.take() else {
            return Handled::Ignored;
        };
        active.cancel.cancel();
        for task in active.tasks.drain(..) {
            let _ = task.await;
        }
        self.platform.hide_notification(&active.reminder).await;
        self.platform
            .close_modal(&active.reminder, state.label())
            .await;
        info!(
            notification_id = active.reminder.notification_id(),
            outcome = state.label(),
            "reminder closed"
        );
        Handled::Closed(state)
    }

    fn spawn_alerts(
        &self,
        reminder: &ScheduledNotification,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![spawn_countdown(
            self.events.clone(),
            reminder.key.clone(),
            self.timeout,
            cancel.child_token(),
        )];
        if reminder.sound_enabled {
            if self.audio_primed {
                tasks.push(spawn_pulse(
                    self.platform.clone(),
                    Pulse::Sound,
                    SOUND_PERIOD,
                    cancel.child_token(),
                ));
            } else {
                debug!("no user interaction yet; alert stays silent");
            }
        }
        if reminder.vibration_enabled {
            tasks.push(spawn_pulse(
                self.platform.clone(),
                Pulse::Vibration,
                VIBRATION_PERIOD,
                cancel.child_token(),
            ));
        }
        tasks
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}

fn spawn_countdown(
    events: mpsc::Sender<DispatchEvent>,
    key: NotificationKey,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(timeout) => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => {}
            res = events.send(DispatchEvent::TimedOut { key }) => {
                if let Err(e) = res {
                    warn!(error = %e, "countdown: dispatcher gone");
                }
            }
        }
    })
}

fn spawn_record(
    sync: Arc<SyncCoordinator>,
    events: mpsc::Sender<DispatchEvent>,
    key: NotificationKey,
    req: ConsumptionRequest,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let action = req.action;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(key = %key, "answer abandoned");
                return;
            }
            res = sync.submit_consumption(&req) => res,
        };
        let event = match outcome {
            Ok(resp) => DispatchEvent::Recorded {
                key,
                action,
                current_stock: resp.current_stock,
            },
            Err(e) => DispatchEvent::RecordFailed {
                key,
                error: e.to_string(),
            },
        };
        tokio::select! {
            _ = cancel.cancelled() => {}
            res = events.send(event) => {
                if let Err(e) = res {
                    warn!(error = %e, "record: dispatcher gone");
                }
            }
        }
    })
}

fn spawn_pulse(
    platform: Arc<dyn Platform>,
    kind: Pulse,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let res = match kind {
                        Pulse::Sound => platform.play_sound().await,
                        Pulse::Vibration => platform.vibrate().await,
                    };
                    if let Err(e) = res {
                        debug!(?kind, error = %e, "alert pulse unavailable; stopping it");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::time::timeout;

    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::FixedClock;
    use crate::matcher::TimeMatcher;
    use crate::platform::testing::FakePlatform;
    use crate::schedule::AlertPrefs;
    use crate::schedule::tests::dto;
    use crate::sync::testing::{FakeApi, Failure, medicine};

    struct Rig {
        api: Arc<FakeApi>,
        platform: Arc<FakePlatform>,
        sync: Arc<SyncCoordinator>,
        dispatcher: Dispatcher,
        rx: mpsc::Receiver<DispatchEvent>,
    }

    async fn rig_with(platform: FakePlatform, reminders: &[(i32, &str)]) -> Rig {
        let api = Arc::new(FakeApi::default());
        *api.medicines.lock().unwrap() = vec![medicine(7, 10, 1)];
        *api.notifications.lock().unwrap() = reminders
            .iter()
            .map(|(id, t)| dto(*id, 7, t, true))
            .collect();
        let sync = Arc::new(SyncCoordinator::new(
            api.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(TimeMatcher::new(chrono_tz::UTC)),
            Arc::new(FixedClock::new(at(8, 0, 0))),
            AlertPrefs::default(),
        ));
        sync.sync_now().await.unwrap();
        let platform = Arc::new(platform);
        let (tx, rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(platform.clone(), sync.clone(), tx, MODAL_TIMEOUT);
        Rig {
            api,
            platform,
            sync,
            dispatcher,
            rx,
        }
    }

    async fn rig(reminders: &[(i32, &str)]) -> Rig {
        rig_with(FakePlatform::default(), reminders).await
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    async fn tick(r: &mut Rig, now: DateTime<Utc>) -> Vec<Handled> {
        let mut out = Vec::new();
        for due in r.sync.matcher().evaluate(now) {
            out.push(r.dispatcher.handle(DispatchEvent::Due(due)).await);
        }
        out
    }

    /// Sends an answer and feeds its outcome event back in.
    async fn answer(r: &mut Rig, event: DispatchEvent) -> Handled {
        assert_eq!(r.dispatcher.handle(event).await, Handled::Recording);
        let outcome = r.rx.recv().await.unwrap();
        assert!(matches!(
            outcome,
            DispatchEvent::Recorded { .. } | DispatchEvent::RecordFailed { .. }
        ));
        r.dispatcher.handle(outcome).await
    }

    fn morning_key(id: i32) -> NotificationKey {
        NotificationKey::new(id, medremind_shared::domain::TimeType::Morning)
    }

    #[tokio::test]
    async fn taken_at_eight_records_one_dose_and_decrements_stock() {
        let mut r = rig(&[(1, "08:00")]).await;

        let handled = tick(&mut r, at(8, 0, 15)).await;
        assert_eq!(handled, vec![Handled::Dispatched { modal: true }]);
        assert_eq!(*r.platform.modals.lock().unwrap(), vec![1]);

        let out = answer(&mut r, DispatchEvent::Taken { dosage: None }).await;
        assert_eq!(out, Handled::Closed(DeliveryState::Resolved(ConsumptionAction::Taken)));
        assert_eq!(r.api.medicines.lock().unwrap()[0].current_stock, 9);
        let recorded = r.api.recorded.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].medicine_id, 7);
        assert_eq!(recorded[0].notification_id, Some(1));
        assert_eq!(recorded[0].action, ConsumptionAction::Taken);
        assert_eq!(
            *r.platform.closed.lock().unwrap(),
            vec![(1, "taken".to_string())]
        );
        assert!(r.dispatcher.active().is_none());
        // The write asks the background sync to fetch again.
        assert!(
            timeout(Duration::from_millis(50), r.sync.resync_requested())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn sync_then_tick_dispatches_exactly_once() {
        let mut r = rig(&[(1, "08:00")]).await;
        assert_eq!(tick(&mut r, at(8, 0, 0)).await.len(), 1);
        assert!(tick(&mut r, at(8, 0, 30)).await.is_empty());
        // A resync mid-minute must not make it due again.
        r.sync.sync_now().await.unwrap();
        assert!(tick(&mut r, at(8, 0, 59)).await.is_empty());
        assert_eq!(r.platform.modals.lock().unwrap().len(), 1);
        assert_eq!(r.platform.notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_reminder_in_same_tick_is_dropped_for_good() {
        let mut r = rig(&[(1, "08:00"), (2, "08:00")]).await;
        let handled = tick(&mut r, at(8, 0, 5)).await;
        assert_eq!(
            handled,
            vec![Handled::Dispatched { modal: true }, Handled::Dropped]
        );
        assert_eq!(*r.platform.modals.lock().unwrap(), vec![1]);

        r.dispatcher.handle(DispatchEvent::Dismiss).await;
        assert!(tick(&mut r, at(8, 0, 40)).await.is_empty());
        assert!(tick(&mut r, at(8, 1, 0)).await.is_empty());
        assert_eq!(*r.platform.modals.lock().unwrap(), vec![1]);
        assert!(r.api.recorded.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expiry_closes_without_recording() {
        let mut r = rig(&[(1, "08:00")]).await;
        tick(&mut r, at(8, 0, 0)).await;

        let event = r.rx.recv().await.unwrap();
        assert!(matches!(event, DispatchEvent::TimedOut { .. }));
        let out = r.dispatcher.handle(event).await;
        assert_eq!(out, Handled::Closed(DeliveryState::TimedOut));
        assert!(r.api.recorded.lock().unwrap().is_empty());
        assert_eq!(*r.platform.hidden.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn stale_expiry_does_not_close_a_newer_modal() {
        let mut r = rig(&[(1, "08:00"), (2, "09:00")]).await;
        tick(&mut r, at(8, 0, 0)).await;
        r.dispatcher.handle(DispatchEvent::Dismiss).await;
        tick(&mut r, at(9, 0, 0)).await;

        let stale = DispatchEvent::TimedOut { key: morning_key(1) };
        assert_eq!(r.dispatcher.handle(stale).await, Handled::Ignored);
        assert_eq!(r.dispatcher.active().map(|(k, _)| k.notification_id), Some(2));
    }

    #[tokio::test]
    async fn failed_record_keeps_the_modal_open() {
        let mut r = rig(&[(1, "08:00")]).await;
        tick(&mut r, at(8, 0, 0)).await;
        r.api.fail_with(Some(Failure::Network));

        let out = answer(&mut r, DispatchEvent::Skipped).await;
        assert_eq!(out, Handled::RecordFailed);
        assert_eq!(
            r.dispatcher.active().map(|(_, s)| s),
            Some(DeliveryState::Dispatched)
        );

        r.api.fail_with(None);
        let out = answer(&mut r, DispatchEvent::Skipped).await;
        assert_eq!(out, Handled::Closed(DeliveryState::Resolved(ConsumptionAction::Skipped)));
        assert_eq!(r.api.medicines.lock().unwrap()[0].current_stock, 10);
    }

    #[tokio::test]
    async fn second_answer_while_one_is_in_flight_is_not_sent() {
        let mut r = rig(&[(1, "08:00")]).await;
        tick(&mut r, at(8, 0, 0)).await;

        assert_eq!(
            r.dispatcher.handle(DispatchEvent::Taken { dosage: None }).await,
            Handled::Recording
        );
        assert_eq!(
            r.dispatcher.handle(DispatchEvent::Taken { dosage: None }).await,
            Handled::Busy
        );
        assert_eq!(r.dispatcher.handle(DispatchEvent::Dismiss).await, Handled::Busy);

        let outcome = r.rx.recv().await.unwrap();
        assert_eq!(
            r.dispatcher.handle(outcome).await,
            Handled::Closed(DeliveryState::Resolved(ConsumptionAction::Taken))
        );
        assert_eq!(r.api.recorded.lock().unwrap().len(), 1);
        assert_eq!(r.api.medicines.lock().unwrap()[0].current_stock, 9);
    }

    #[tokio::test]
    async fn expiry_during_a_failed_answer_closes_as_timed_out() {
        let mut r = rig(&[(1, "08:00")]).await;
        tick(&mut r, at(8, 0, 0)).await;
        r.api.fail_with(Some(Failure::Network));

        assert_eq!(r.dispatcher.handle(DispatchEvent::Skipped).await, Handled::Recording);
        let expiry = DispatchEvent::TimedOut { key: morning_key(1) };
        assert_eq!(r.dispatcher.handle(expiry).await, Handled::Busy);

        let outcome = r.rx.recv().await.unwrap();
        assert!(matches!(outcome, DispatchEvent::RecordFailed { .. }));
        assert_eq!(
            r.dispatcher.handle(outcome).await,
            Handled::Closed(DeliveryState::TimedOut)
        );
        assert_eq!(
            *r.platform.closed.lock().unwrap(),
            vec![(1, "timed out".to_string())]
        );
    }

    #[tokio::test]
    async fn no_channel_means_the_reminder_lapses() {
        let platform = FakePlatform {
            no_focus: true,
            no_notifications: true,
            ..Default::default()
        };
        let mut r = rig_with(platform, &[(1, "08:00")]).await;
        assert_eq!(tick(&mut r, at(8, 0, 0)).await, vec![Handled::Lapsed]);
        assert!(r.dispatcher.active().is_none());
        assert!(tick(&mut r, at(8, 0, 30)).await.is_empty());
    }

    #[tokio::test]
    async fn unfocused_host_still_gets_a_system_notification() {
        let platform = FakePlatform {
            no_focus: true,
            ..Default::default()
        };
        let mut r = rig_with(platform, &[(1, "08:00")]).await;
        assert_eq!(
            tick(&mut r, at(8, 0, 0)).await,
            vec![Handled::Dispatched { modal: false }]
        );
        assert_eq!(*r.platform.notifications.lock().unwrap(), vec![1]);
        assert!(r.platform.modals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn opening_from_a_notification_shows_the_modal() {
        let mut r = rig(&[(1, "08:00")]).await;
        let out = r
            .dispatcher
            .handle(DispatchEvent::OpenFromNotification { notification_id: 1 })
            .await;
        assert_eq!(out, Handled::Dispatched { modal: true });
        assert!(r.platform.notifications.lock().unwrap().is_empty());

        let unknown = r
            .dispatcher
            .handle(DispatchEvent::OpenFromNotification { notification_id: 42 })
            .await;
        assert_eq!(unknown, Handled::Ignored);
    }

    #[tokio::test]
    async fn sound_waits_for_interaction_and_stops_on_teardown() {
        let mut r = rig(&[(1, "08:00"), (2, "09:00")]).await;
        tick(&mut r, at(8, 0, 0)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(r.platform.sounds(), 0);
        // Vibration is attempted once, reported unavailable, and stops.
        assert_eq!(r.platform.vibrations(), 1);
        r.dispatcher.handle(DispatchEvent::Dismiss).await;

        assert_eq!(
            r.dispatcher.handle(DispatchEvent::UserInteraction).await,
            Handled::Primed
        );
        tick(&mut r, at(9, 0, 0)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(r.platform.sounds() >= 1);

        assert_eq!(
            r.dispatcher.handle(DispatchEvent::Teardown).await,
            Handled::Closed(DeliveryState::Dismissed)
        );
        let after = r.platform.sounds();
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(r.platform.sounds(), after);
    }

    #[tokio::test]
    async fn answers_without_a_modal_are_ignored() {
        let mut r = rig(&[(1, "08:00")]).await;
        assert_eq!(
            r.dispatcher.handle(DispatchEvent::Taken { dosage: Some(2) }).await,
            Handled::Ignored
        );
        assert_eq!(r.dispatcher.handle(DispatchEvent::Teardown).await, Handled::Ignored);
        assert!(r.api.recorded.lock().unwrap().is_empty());
    }
}
