use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::dispatcher::{DispatchEvent, Dispatcher, MODAL_TIMEOUT};
use crate::matcher::{TimeMatcher, until_next_minute};
use crate::platform::Platform;
use crate::sync::SyncCoordinator;
use crate::{AppError, platform};

const EVENT_BUFFER: usize = 32;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Entry point for the reminder agent in the current session.
pub async fn run(cfg: ClientConfig) -> Result<(), AppError> {
    let core = super::build(&cfg)?;
    let cached = core.sync.warm_start()?;
    info!(reminders = cached, "loaded cached schedule");

    let plat = platform::detect();
    let cancel = CancellationToken::new();
    let Agent {
        events,
        mut main,
        sync: sync_task,
    } = spawn_agent(
        core.sync.clone(),
        core.clock.clone(),
        plat.clone(),
        Duration::from_secs(cfg.sync_interval_secs),
        &cancel,
    );
    if plat.has_focus() {
        // Started by hand from a terminal; that counts as a user gesture.
        let _ = events.send(DispatchEvent::UserInteraction).await;
        spawn_input_reader(events);
    } else {
        drop(events);
    }

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received; stopping agent");
        }
        res = &mut main => {
            if let Err(e) = res {
                error!(error = %e, "main loop failed");
            }
        }
    }

    cancel.cancel();
    let stopped = async {
        if !main.is_finished() {
            let _ = main.await;
        }
        let _ = sync_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, stopped).await.is_err() {
        warn!("agent tasks did not stop within the grace period");
    }
    Ok(())
}

/// The running agent: the minute loop and the background sync, plus the
/// sender that feeds user answers into the dispatcher.
struct Agent {
    events: mpsc::Sender<DispatchEvent>,
    main: JoinHandle<()>,
    sync: JoinHandle<()>,
}

fn spawn_agent(
    sync: Arc<SyncCoordinator>,
    clock: Arc<dyn Clock>,
    platform: Arc<dyn Platform>,
    sync_interval: Duration,
    cancel: &CancellationToken,
) -> Agent {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let reevaluate = Arc::new(Notify::new());
    let dispatcher = Dispatcher::new(platform, sync.clone(), tx.clone(), MODAL_TIMEOUT);
    let main = tokio::spawn(main_loop(
        cancel.child_token(),
        MainLoopContext {
            matcher: sync.matcher().clone(),
            clock,
            dispatcher,
            events: rx,
            reevaluate: reevaluate.clone(),
        },
    ));
    let sync = tokio::spawn(sync_loop(
        cancel.child_token(),
        sync,
        sync_interval,
        reevaluate,
    ));
    Agent {
        events: tx,
        main,
        sync,
    }
}

struct MainLoopContext {
    matcher: Arc<TimeMatcher>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    events: mpsc::Receiver<DispatchEvent>,
    reevaluate: Arc<Notify>,
}

/// Minute ticks feed the matcher and user/countdown/record events go to the
/// dispatcher. Nothing in here waits on the server, so a tick is never late
/// by more than the time it takes to show an alert.
async fn main_loop(cancel: CancellationToken, ctx: MainLoopContext) {
    let MainLoopContext {
        matcher,
        clock,
        mut dispatcher,
        mut events,
        reevaluate,
    } = ctx;
    // Evaluate right away so a reminder for the current minute still fires.
    let mut next_tick = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep_until(next_tick) => {
                evaluate(&matcher, clock.now(), &mut dispatcher).await;
                next_tick = Instant::now() + until_next_minute(clock.now());
            }
            // A fresh schedule may hold a reminder for the current minute.
            _ = reevaluate.notified() => {
                evaluate(&matcher, clock.now(), &mut dispatcher).await;
            }
            Some(event) = events.recv() => {
                dispatcher.handle(event).await;
            }
        }
    }

    dispatcher.handle(DispatchEvent::Teardown).await;
    info!("agent stopped");
}

async fn evaluate(
    matcher: &TimeMatcher,
    now: chrono::DateTime<chrono::Utc>,
    dispatcher: &mut Dispatcher,
) {
    let due = matcher.evaluate(now);
    debug!(due = due.len(), "tick");
    for reminder in due {
        dispatcher.handle(DispatchEvent::Due(reminder)).await;
    }
}

/// Syncs at start, on every interval and whenever a write asks for it.
async fn sync_loop(
    cancel: CancellationToken,
    sync: Arc<SyncCoordinator>,
    interval: Duration,
    reevaluate: Arc<Notify>,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut first = true;
    loop {
        let requested = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => false,
            _ = sync.resync_requested() => true,
        };
        if requested {
            timer.reset();
        }
        let report = tokio::select! {
            _ = cancel.cancelled() => break,
            report = sync.sync_or_warn() => report,
        };
        if let Some(report) = report {
            if first {
                info!(
                    medicines = report.medicines,
                    reminders = report.reminders,
                    "initial sync done"
                );
                first = false;
            }
            reevaluate.notify_one();
        }
    }
    debug!("sync loop stopped");
}

/// Reads answers from the terminal on a plain thread; a blocking stdin read
/// cannot be cancelled and must not hold up runtime shutdown.
fn spawn_input_reader(events: mpsc::Sender<DispatchEvent>) {
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                for event in parse_input(&line) {
                    if events.blocking_send(event).is_err() {
                        return;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "input reader not started; terminal answers disabled");
    }
}

/// Every line counts as an interaction; known commands also answer the
/// active reminder.
fn parse_input(line: &str) -> Vec<DispatchEvent> {
    let mut out = vec![DispatchEvent::UserInteraction];
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (Some("t" | "taken"), dose) => out.push(DispatchEvent::Taken {
            dosage: dose.and_then(|d| d.parse().ok()),
        }),
        (Some("s" | "skip" | "skipped"), _) => out.push(DispatchEvent::Skipped),
        (Some("d" | "dismiss"), _) => out.push(DispatchEvent::Dismiss),
        (Some("open"), Some(id)) => match id.parse() {
            Ok(notification_id) => out.push(DispatchEvent::OpenFromNotification { notification_id }),
            Err(_) => warn!(input = %id, "open needs a reminder id"),
        },
        _ => {}
    }
    out
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {
                info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("listen for ctrl_c");
        info!("shutdown: received ctrl_c");
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::cache::MemoryStore;
    use crate::platform::testing::FakePlatform;
    use crate::schedule::AlertPrefs;
    use crate::schedule::tests::dto;
    use crate::sync::testing::{FakeApi, medicine};

    /// Wall clock that follows tokio's (pausable) clock.
    struct RuntimeClock {
        origin: DateTime<Utc>,
        started: Instant,
    }

    impl Clock for RuntimeClock {
        fn now(&self) -> DateTime<Utc> {
            self.origin + chrono::Duration::from_std(self.started.elapsed()).unwrap()
        }
    }

    struct Rig {
        api: Arc<FakeApi>,
        platform: Arc<FakePlatform>,
        cancel: CancellationToken,
        agent: Agent,
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    /// Starts the agent at `start` with a schedule cached by an earlier run.
    async fn start(start: DateTime<Utc>, reminders: &[(i32, &str)]) -> Rig {
        let api = Arc::new(FakeApi::default());
        *api.medicines.lock().unwrap() = vec![medicine(7, 10, 1)];
        *api.notifications.lock().unwrap() = reminders
            .iter()
            .map(|(id, t)| dto(*id, 7, t, true))
            .collect();
        let clock: Arc<dyn Clock> = Arc::new(RuntimeClock {
            origin: start,
            started: Instant::now(),
        });
        let sync = Arc::new(SyncCoordinator::new(
            api.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(TimeMatcher::new(chrono_tz::UTC)),
            clock.clone(),
            AlertPrefs::default(),
        ));
        sync.sync_now().await.unwrap();
        let platform = Arc::new(FakePlatform::default());
        let cancel = CancellationToken::new();
        let agent = spawn_agent(
            sync,
            clock,
            platform.clone(),
            Duration::from_secs(60),
            &cancel,
        );
        Rig {
            api,
            platform,
            cancel,
            agent,
        }
    }

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn due_minute_fires_while_a_slow_sync_is_in_flight() {
        let r = start(at(7, 59, 0), &[(1, "08:00")]).await;
        r.api.slow_down(Some(Duration::from_secs(45)));

        // 08:00:01; the first background sync is still waiting on the server.
        sleep_secs(61).await;
        assert_eq!(*r.platform.modals.lock().unwrap(), vec![1]);

        sleep_secs(140).await;
        assert_eq!(*r.platform.modals.lock().unwrap(), vec![1]);
        assert_eq!(r.platform.notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn answer_and_resync_do_not_hold_up_the_next_minute() {
        let r = start(at(7, 59, 30), &[(1, "08:00"), (2, "08:01")]).await;
        sleep_secs(31).await;
        assert_eq!(*r.platform.modals.lock().unwrap(), vec![1]);

        r.api.slow_down(Some(Duration::from_secs(30)));
        r.agent
            .events
            .send(DispatchEvent::Taken { dosage: None })
            .await
            .unwrap();

        // 08:01:05: the answer is stored and its resync is still running.
        sleep_secs(64).await;
        assert_eq!(
            *r.platform.closed.lock().unwrap(),
            vec![(1, "taken".to_string())]
        );
        assert_eq!(*r.platform.modals.lock().unwrap(), vec![1, 2]);
        assert_eq!(r.api.recorded.lock().unwrap().len(), 1);
        assert_eq!(r.api.medicines.lock().unwrap()[0].current_stock, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expiry_comes_back_through_the_loop() {
        let r = start(at(7, 59, 59), &[(1, "08:00")]).await;
        sleep_secs(2).await;
        assert_eq!(*r.platform.modals.lock().unwrap(), vec![1]);

        sleep_secs(300).await;
        assert_eq!(
            *r.platform.closed.lock().unwrap(),
            vec![(1, "timed out".to_string())]
        );
        assert!(r.api.recorded.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_loop_closes_the_modal_and_stops_pulses() {
        let r = start(at(7, 59, 59), &[(1, "08:00")]).await;
        r.agent
            .events
            .send(DispatchEvent::UserInteraction)
            .await
            .unwrap();
        sleep_secs(5).await;
        assert_eq!(*r.platform.modals.lock().unwrap(), vec![1]);
        assert!(r.platform.sounds() >= 1);

        r.cancel.cancel();
        r.agent.main.await.unwrap();
        r.agent.sync.await.unwrap();
        assert_eq!(
            *r.platform.closed.lock().unwrap(),
            vec![(1, "dismissed".to_string())]
        );
        assert_eq!(*r.platform.hidden.lock().unwrap(), vec![1]);

        let after = r.platform.sounds();
        sleep_secs(10).await;
        assert_eq!(r.platform.sounds(), after);
    }

    #[test]
    fn answers_are_parsed_with_an_interaction_first() {
        assert_eq!(
            parse_input("t 2"),
            vec![
                DispatchEvent::UserInteraction,
                DispatchEvent::Taken { dosage: Some(2) }
            ]
        );
        assert_eq!(
            parse_input("  skip "),
            vec![DispatchEvent::UserInteraction, DispatchEvent::Skipped]
        );
        assert_eq!(
            parse_input("open 12"),
            vec![
                DispatchEvent::UserInteraction,
                DispatchEvent::OpenFromNotification { notification_id: 12 }
            ]
        );
        assert_eq!(parse_input("hello"), vec![DispatchEvent::UserInteraction]);
        assert_eq!(parse_input("open x"), vec![DispatchEvent::UserInteraction]);
    }
}
