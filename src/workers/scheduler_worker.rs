use crate::clock::Clock;
use crate::commands::{self, Request, Response};
use crate::error::AgentError;
use crate::managers::scheduler::SchedulerManager;
use crate::settings::SchedulerSettings;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Process-level events that start a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Installed,
    Startup,
    Wake,
    UpdateAvailable,
}

enum SchedulerEvent {
    Request {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    Lifecycle(LifecycleEvent),
    Shutdown,
}

/// Cloneable entry point into the scheduler loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerEvent>,
    request_timeout: Duration,
}

impl SchedulerHandle {
    /// Sends a request and waits for its response, giving up after the
    /// configured round-trip budget.
    pub async fn request(&self, request: Request) -> Response {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(SchedulerEvent::Request { request, reply })
            .await
            .is_err()
        {
            return Response::error(AgentError::ChannelClosed.to_string());
        }
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => Response::error(AgentError::ChannelClosed.to_string()),
            Err(_) => Response::error("Request timed out"),
        }
    }

    pub async fn lifecycle(&self, event: LifecycleEvent) -> Result<(), AgentError> {
        self.tx
            .send(SchedulerEvent::Lifecycle(event))
            .await
            .map_err(|_| AgentError::ChannelClosed)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(SchedulerEvent::Shutdown).await;
    }
}

/// Starts the scheduler loop. Requests, lifecycle events, fired alarms and wake
/// detection are handled one at a time, each to completion.
pub fn spawn(
    scheduler: Arc<SchedulerManager>,
    mut alarms_rx: mpsc::UnboundedReceiver<String>,
    clock: Arc<dyn Clock>,
    settings: &SchedulerSettings,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<SchedulerEvent>(64);
    let handle = SchedulerHandle {
        tx,
        request_timeout: Duration::from_secs(settings.request_timeout_seconds.max(1)),
    };
    let poll = Duration::from_secs(settings.wake_poll_seconds.max(1));
    let jump_ms = (settings.wake_jump_seconds as i64) * 1000;

    let task = tokio::spawn(async move {
        info!("Scheduler worker started");
        let mut wake_poll = tokio::time::interval(poll);
        wake_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        wake_poll.tick().await;
        let mut last_wall = clock.now_ms();
        let mut alarms_open = true;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(SchedulerEvent::Request { request, reply }) => {
                        let response = commands::dispatch(&scheduler, request).await;
                        if reply.send(response).is_err() {
                            warn!("Requester went away before the response was ready");
                        }
                    }
                    Some(SchedulerEvent::Lifecycle(event)) => {
                        handle_lifecycle(&scheduler, event).await;
                    }
                    Some(SchedulerEvent::Shutdown) | None => break,
                },
                name = alarms_rx.recv(), if alarms_open => match name {
                    Some(name) => {
                        match scheduler.on_alarm(&name).await {
                            Ok(()) => {}
                            Err(e) if e.is_retryable() => {
                                warn!("Alarm {} failed, will retry on a later tick: {}", name, e)
                            }
                            Err(e) => error!("Alarm {} failed: {}", name, e),
                        }
                    }
                    None => alarms_open = false,
                },
                _ = wake_poll.tick() => {
                    let now = clock.now_ms();
                    let drift = now - last_wall - poll.as_millis() as i64;
                    last_wall = now;
                    if drift > jump_ms {
                        info!(
                            "Detected system wake (clock jumped {}s past the poll), checking for missed meetings",
                            drift / 1000
                        );
                        handle_lifecycle(&scheduler, LifecycleEvent::Wake).await;
                    }
                }
            }
        }
        info!("Scheduler worker stopped");
    });

    (handle, task)
}

async fn handle_lifecycle(scheduler: &SchedulerManager, event: LifecycleEvent) {
    let result = match event {
        LifecycleEvent::Installed => scheduler.on_installed().await,
        LifecycleEvent::Startup => scheduler.on_startup().await,
        LifecycleEvent::Wake => scheduler.on_wake().await,
        LifecycleEvent::UpdateAvailable => scheduler.on_update_available().await,
    };
    match result {
        Ok(report) => info!(
            "{:?} handled: opened {:?}, exhausted {:?}, pruned {}{}",
            event,
            report.opened,
            report.exhausted,
            report.pruned,
            if report.skipped_offline { " (offline)" } else { "" }
        ),
        Err(e) => {
            scheduler
                .error_log()
                .error(&format!("Failed to handle {:?}: {}", event, e))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::scheduler::tests::{meeting_at, Harness};
    use crate::storage::SchedulerState;

    const MIN: i64 = 60 * 1000;
    const NOW: i64 = 1_700_000_000_000;

    fn start(h: &Harness) -> (SchedulerHandle, JoinHandle<()>, mpsc::UnboundedSender<String>) {
        let (alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (handle, task) = spawn(
            h.manager.clone(),
            alarm_rx,
            h.clock.clone(),
            &SchedulerSettings::default(),
        );
        (handle, task, alarm_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_round_trip() {
        let h = Harness::new();
        let (handle, task, _alarms) = start(&h);

        let response = handle
            .request(Request::ScheduleMeeting {
                details: crate::meeting::ScheduleDetails::new(
                    "https://zoom.us/j/1",
                    NOW + 10 * MIN,
                    30,
                ),
            })
            .await;
        assert_eq!(response, Response::success());
        match handle.request(Request::GetMeetings).await {
            Response::Meetings { meetings } => assert_eq!(meetings.len(), 1),
            other => panic!("unexpected response {:?}", other),
        }

        handle.shutdown().await;
        task.await.unwrap();
        assert!(!handle.request(Request::GetMeetings).await.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_alarm_reaches_scheduler() {
        let h = Harness::new();
        let mut state = SchedulerState::default();
        state
            .meetings
            .push(meeting_at("https://meet.google.com/abc-defg-hij", NOW - 5 * MIN));
        h.put(&state).await;
        let (handle, task, alarms) = start(&h);

        alarms.send("recoveryCheck".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.browser.opened().len(), 1);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_jump_is_treated_as_wake() {
        let h = Harness::new();
        let mut state = SchedulerState::default();
        state
            .meetings
            .push(meeting_at("https://meet.google.com/abc-defg-hij", NOW - 5 * MIN));
        h.put(&state).await;
        let (handle, task, _alarms) = start(&h);

        // A normal poll period does nothing
        h.clock.advance(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(h.browser.opened().is_empty());

        // Fifteen minutes of wall clock pass during one poll period
        h.clock.advance(Duration::from_secs(15 * 60));
        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.request(Request::GetMeetings).await;
        assert_eq!(h.browser.opened().len(), 1);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_due_during_sleep_runs_on_wake() {
        use crate::alarms::{AlarmScheduler, TokioAlarms};
        use crate::managers::scheduler::SchedulerDeps;
        use crate::network::NetworkMonitor;
        use crate::settings::{ErrorLogSettings, NetworkSettings};

        let h = Harness::new();
        let (alarms, alarm_rx) = TokioAlarms::new(h.clock.clone());
        let manager = Arc::new(SchedulerManager::new(
            SchedulerDeps {
                store: h.store.clone(),
                network: Arc::new(NetworkMonitor::new(
                    h.net.clone(),
                    h.clock.clone(),
                    &NetworkSettings::default(),
                )),
                alarms: alarms.clone(),
                browser: h.browser.clone(),
                notifier: h.notifier.clone(),
                clock: h.clock.clone(),
            },
            SchedulerSettings::default(),
            ErrorLogSettings::default(),
        ));
        let (handle, task) = spawn(
            manager,
            alarm_rx,
            h.clock.clone(),
            &SchedulerSettings::default(),
        );

        let link = "https://meet.google.com/abc-defg-hij";
        let response = handle
            .request(Request::ScheduleMeeting {
                details: crate::meeting::ScheduleDetails::new(link, NOW + MIN, 30),
            })
            .await;
        assert_eq!(response, Response::success());

        h.clock.advance(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.browser.opened(), vec![link.to_string()]);

        // Two hours asleep: the close timer has not advanced, the wall clock has
        h.clock.advance(Duration::from_secs(2 * 60 * 60));
        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.request(Request::GetMeetings).await;

        assert_eq!(
            *h.browser.closed_patterns.lock().unwrap(),
            vec!["*://meet.google.com/*".to_string()]
        );
        assert!(h.browser.open_tabs.lock().unwrap().is_empty());
        assert!(h.state().await.meetings[0].completed);
        assert!(alarms.names().is_empty());

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_startup_clears_attempts() {
        let h = Harness::new();
        let mut state = SchedulerState::default();
        state.attempts.insert(
            "x".to_string(),
            crate::meeting::ActiveJoinAttempt::new(NOW, NOW),
        );
        h.put(&state).await;
        let (handle, task, _alarms) = start(&h);

        handle.lifecycle(LifecycleEvent::Startup).await.unwrap();
        handle.request(Request::GetMeetings).await;
        assert!(h.state().await.attempts.is_empty());

        handle.shutdown().await;
        task.await.unwrap();
    }
}
