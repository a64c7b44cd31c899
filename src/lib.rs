pub mod alarms;
pub mod browser;
pub mod clock;
pub mod commands;
pub mod detector;
pub mod error;
pub mod managers;
pub mod meeting;
pub mod network;
pub mod settings;
pub mod storage;
pub mod workers;

use alarms::TokioAlarms;
use anyhow::{Context, Result};
use browser::{LaunchedBrowser, LogNotifier};
use clock::{Clock, SystemClock};
use detector::{JoinDetector, MeetingPage, StrategyTable};
use managers::scheduler::{SchedulerDeps, SchedulerManager};
use network::{HttpProbe, NetworkMonitor};
use settings::AgentSettings;
use std::sync::Arc;
use storage::SqliteStore;
use tokio::task::JoinHandle;
use workers::scheduler_worker::{self, LifecycleEvent, SchedulerHandle};

/// A running agent: the scheduler loop plus what detectors need to talk to it.
pub struct Agent {
    pub handle: SchedulerHandle,
    pub manager: Arc<SchedulerManager>,
    pub strategies: StrategyTable,
    settings: AgentSettings,
    probe: Arc<HttpProbe>,
    task: JoinHandle<()>,
}

impl Agent {
    /// Builds a detector for a freshly opened meeting tab, reporting back to this agent.
    pub fn join_detector(&self, page: Arc<dyn MeetingPage>) -> JoinDetector {
        JoinDetector::new(
            page,
            Arc::new(self.handle.clone()),
            &self.strategies,
            self.settings.detector.clone(),
        )
        .with_connectivity(self.probe.clone())
    }

    /// Stops the scheduler loop and waits for it to finish its current event.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        if let Err(e) = self.task.await {
            log::error!("Scheduler worker ended abnormally: {}", e);
        }
    }
}

/// Wires the durable store, network monitor, timers and browser into a scheduler,
/// starts its loop and delivers the first lifecycle event. A store that did not
/// exist yet counts as a fresh install.
pub async fn start_agent(settings: AgentSettings) -> Result<Agent> {
    let db_path = settings.database_path()?;
    let fresh_install = !db_path.exists();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open store at {}", db_path.display()))?;
    log::info!("Using store {}", store.path().display());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let probe = Arc::new(HttpProbe::new(&settings.network)?);
    let network = Arc::new(NetworkMonitor::new(
        probe.clone(),
        clock.clone(),
        &settings.network,
    ));
    let (alarms, alarms_rx) = TokioAlarms::new(clock.clone());
    let browser = Arc::new(LaunchedBrowser::new(settings.browser_argv()));

    let manager = Arc::new(SchedulerManager::new(
        SchedulerDeps {
            store,
            network,
            alarms,
            browser,
            notifier: Arc::new(LogNotifier),
            clock: clock.clone(),
        },
        settings.scheduler.clone(),
        settings.error_log.clone(),
    ));

    let (handle, task) =
        scheduler_worker::spawn(manager.clone(), alarms_rx, clock, &settings.scheduler);

    let event = if fresh_install {
        LifecycleEvent::Installed
    } else {
        LifecycleEvent::Startup
    };
    handle.lifecycle(event).await?;

    let strategies = StrategyTable::load_or_default(settings.strategies_path.as_deref());

    Ok(Agent {
        handle,
        manager,
        strategies,
        settings,
        probe,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Request, Response};
    use crate::meeting::ScheduleDetails;
    use tempfile::TempDir;

    fn settings_in(dir: &TempDir) -> AgentSettings {
        let mut settings = AgentSettings {
            data_dir: Some(dir.path().to_path_buf()),
            ..AgentSettings::default()
        };
        // Nothing listens here, so startup sees the network as down right away
        settings.network.probe_url = "http://127.0.0.1:9/".to_string();
        settings
    }

    #[tokio::test]
    async fn test_agent_persists_across_restarts() {
        let dir = TempDir::new().unwrap();
        let start_time = chrono::Utc::now().timestamp_millis() + 24 * 60 * 60 * 1000;

        let agent = start_agent(settings_in(&dir)).await.unwrap();
        let response = agent
            .handle
            .request(Request::ScheduleMeeting {
                details: ScheduleDetails::new("https://zoom.us/j/77", start_time, 30),
            })
            .await;
        assert_eq!(response, Response::success());
        agent.shutdown().await;

        let agent = start_agent(settings_in(&dir)).await.unwrap();
        match agent.handle.request(Request::GetMeetings).await {
            Response::Meetings { meetings } => {
                assert_eq!(meetings.len(), 1);
                assert_eq!(meetings[0].start_time, start_time);
            }
            other => panic!("unexpected response {:?}", other),
        }
        agent.shutdown().await;
    }
}
