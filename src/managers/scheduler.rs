use crate::alarms::{Alarm, AlarmScheduler};
use crate::browser::{Browser, Notifier};
use crate::clock::{format_local, Clock};
use crate::error::AgentError;
use crate::meeting::{
    ActiveJoinAttempt, CancelDetails, JoinStatus, JoinStatusReport, Meeting, NumberInput,
    ScheduleDetails,
};
use crate::network::{NetworkCheck, NetworkMonitor};
use crate::settings::{ErrorLogSettings, SchedulerSettings};
use crate::storage::{ErrorLog, ErrorLogEntry, Severity, StateStore, Store};
use serde::Serialize;
use std::sync::Arc;

pub const CLOSE_NOTIFICATION_TITLE: &str = "Meeting Closed";
pub const CLOSE_NOTIFICATION_MESSAGE: &str = "Your meeting has been automatically closed.";

/// What a reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Meeting ids a tab was opened for
    pub opened: Vec<String>,
    /// Meeting ids marked completed after running out of tab opens
    pub exhausted: Vec<String>,
    /// Meetings dropped for being past retention
    pub pruned: usize,
    /// The pass did nothing because the network was unreachable
    pub skipped_offline: bool,
}

impl ReconcileReport {
    fn offline() -> Self {
        Self {
            skipped_offline: true,
            ..Self::default()
        }
    }
}

/// Collaborators the scheduler drives
pub struct SchedulerDeps {
    pub store: Arc<dyn Store>,
    pub network: Arc<NetworkMonitor>,
    pub alarms: Arc<dyn AlarmScheduler>,
    pub browser: Arc<dyn Browser>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// Owns the durable meeting list and in-flight join attempts, and turns timers,
/// wake-ups, network changes and detector reports into tab opens and closes.
///
/// Every handler reloads state from the store first and persists its changes in
/// one batch before returning. Handlers are expected to be called one at a time
/// (the scheduler worker guarantees this).
pub struct SchedulerManager {
    /// Durable meetings and join attempts
    state: StateStore,
    /// Persisted log of failures the user may need to see
    error_log: Arc<ErrorLog>,
    /// Edge-triggered reachability tracker
    network: Arc<NetworkMonitor>,
    alarms: Arc<dyn AlarmScheduler>,
    browser: Arc<dyn Browser>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl SchedulerManager {
    pub fn new(
        deps: SchedulerDeps,
        settings: SchedulerSettings,
        error_log_settings: ErrorLogSettings,
    ) -> Self {
        let error_log = Arc::new(ErrorLog::new(
            deps.store.clone(),
            deps.clock.clone(),
            error_log_settings,
        ));
        Self {
            state: StateStore::new(deps.store),
            error_log,
            network: deps.network,
            alarms: deps.alarms,
            browser: deps.browser,
            notifier: deps.notifier,
            clock: deps.clock,
            settings,
        }
    }

    pub fn error_log(&self) -> Arc<ErrorLog> {
        self.error_log.clone()
    }

    // ----- lifecycle -----

    /// First run after installation or update of the agent.
    pub async fn on_installed(&self) -> Result<ReconcileReport, AgentError> {
        log::info!("Agent installed, initializing scheduler state");
        self.create_recurring_alarms();
        self.state.ensure_attempts_key().await?;
        if let Err(e) = self.error_log.prune_expired().await {
            log::error!("Failed to prune error log: {}", e);
        }
        self.restore_alarms().await?;
        self.reconcile().await
    }

    /// Process start. In-flight attempts from a previous run are meaningless now.
    pub async fn on_startup(&self) -> Result<ReconcileReport, AgentError> {
        log::info!("Agent started, checking for missed meetings");
        self.network.enter_recovery_mode().await;

        let mut state = self.state.load().await?;
        if !state.attempts.is_empty() {
            log::info!("Resetting {} join attempts from previous run", state.attempts.len());
            state.attempts.clear();
            self.state.persist(&state).await?;
        }

        self.create_recurring_alarms();
        self.restore_alarms().await?;
        self.reconcile().await
    }

    /// The machine came back from sleep or the user became active again.
    ///
    /// Timers do not advance while the machine sleeps, so closes that fell due in
    /// the meantime run first and the remaining alarms are re-armed from the wall
    /// clock. Closing needs no network.
    pub async fn on_wake(&self) -> Result<ReconcileReport, AgentError> {
        let closed = self.catch_up_missed_closes().await?;
        log::info!(
            "System wake detected, ran {} missed closes, checking network",
            closed
        );
        self.network.enter_recovery_mode().await;
        if let Err(e) = self.network.require_reachable().await {
            self.error_log
                .warn(&format!(
                    "System woke up but {}; missed meetings will be retried",
                    e.to_string().to_lowercase()
                ))
                .await;
            return Ok(ReconcileReport::offline());
        }
        self.reconcile().await
    }

    /// An update is about to be applied: drop meeting alarms and catch up first.
    pub async fn on_update_available(&self) -> Result<ReconcileReport, AgentError> {
        let mut cleared = 0;
        for name in self.alarms.names() {
            if !Alarm::parse(&name).is_recurring() && self.alarms.clear(&name) {
                cleared += 1;
            }
        }
        log::info!("Update pending, cleared {} meeting alarms", cleared);
        self.reconcile().await
    }

    fn create_recurring_alarms(&self) {
        self.alarms
            .create_periodic(&Alarm::RecoveryCheck, self.settings.recovery_check_period());
        self.alarms
            .create_periodic(&Alarm::NetworkCheck, self.settings.network_check_period());
        self.alarms
            .create_periodic(&Alarm::AttemptSweep, self.settings.attempt_sweep_period());
    }

    async fn catch_up_missed_closes(&self) -> Result<usize, AgentError> {
        let state = self.state.load().await?;
        let now = self.clock.now_ms();
        let mut overdue: Vec<i64> = state
            .meetings
            .iter()
            .filter(|m| !m.completed && m.close_time() <= now)
            .map(|m| m.start_time)
            .collect();
        overdue.sort_unstable();
        overdue.dedup();

        for &start_time in &overdue {
            log::info!(
                "Found missed close for meeting at {}, running now",
                format_local(start_time)
            );
            self.alarms.clear(&Alarm::MeetingClose(start_time).name());
            self.handle_meeting_close(start_time).await?;
        }
        self.restore_alarms().await?;
        Ok(overdue.len())
    }

    /// Re-registers alarms for every open meeting. Meetings whose close time has
    /// already passed are completed without touching tabs.
    pub async fn restore_alarms(&self) -> Result<(), AgentError> {
        let mut state = self.state.load().await?;
        let now = self.clock.now_ms();
        let mut changed = false;
        let mut restored = 0;

        for meeting in state.meetings.iter_mut().filter(|m| !m.completed) {
            let close_time = meeting.close_time();
            if close_time <= now {
                meeting.completed = true;
                changed = true;
                log::info!(
                    "Meeting {} closed while the agent was not running",
                    meeting.meeting_id()
                );
                continue;
            }
            if meeting.start_time > now {
                self.alarms
                    .create_at(&Alarm::MeetingStart(meeting.start_time), meeting.start_time);
            }
            self.alarms
                .create_at(&Alarm::MeetingClose(meeting.start_time), close_time);
            restored += 1;
        }

        if changed {
            self.state.persist(&state).await?;
        }
        log::info!("Restored alarms for {} meetings", restored);
        Ok(())
    }

    // ----- user operations -----

    /// Validates and stores a meeting, then registers its start and close alarms.
    pub async fn schedule_meeting(&self, details: &ScheduleDetails) -> Result<Meeting, AgentError> {
        let valid = details.validate(self.settings.max_auto_close_minutes)?;
        let mut state = self.state.load().await?;

        let meeting = Meeting::new(valid, self.clock.now_ms());
        state
            .meetings
            .retain(|m| !m.is_same_slot(&meeting.link, meeting.start_time));
        state.meetings.push(meeting.clone());
        self.state.persist(&state).await?;

        self.alarms
            .create_at(&Alarm::MeetingStart(meeting.start_time), meeting.start_time);
        self.alarms
            .create_at(&Alarm::MeetingClose(meeting.start_time), meeting.close_time());

        log::info!(
            "Scheduled {} meeting {} at {} (auto-close after {} min)",
            meeting.platform(),
            meeting.meeting_id(),
            format_local(meeting.start_time),
            meeting.auto_close_duration
        );
        Ok(meeting)
    }

    /// Removes every meeting at `startTime` along with its alarms and join attempt.
    /// Cancelling something that is not there succeeds.
    pub async fn cancel_meeting(&self, details: &CancelDetails) -> Result<(), AgentError> {
        let start_time = details.validate()?;
        self.alarms.clear(&Alarm::MeetingStart(start_time).name());
        self.alarms.clear(&Alarm::MeetingClose(start_time).name());

        let mut state = self.state.load().await?;
        let removed: Vec<String> = state
            .meetings
            .iter()
            .filter(|m| m.start_time == start_time)
            .map(|m| m.meeting_id())
            .collect();
        state.meetings.retain(|m| m.start_time != start_time);

        let attempts_before = state.attempts.len();
        state
            .attempts
            .retain(|id, attempt| !removed.contains(id) && attempt.start_time != start_time);

        if !removed.is_empty() || state.attempts.len() != attempts_before {
            self.state.persist(&state).await?;
            log::info!("Cancelled meeting at {}", format_local(start_time));
        } else {
            log::debug!("No meeting at {} to cancel", start_time);
        }
        Ok(())
    }

    /// Edit = cancel the old slot, then schedule the new details.
    pub async fn reschedule_meeting(
        &self,
        previous_start_time: &NumberInput,
        details: &ScheduleDetails,
    ) -> Result<Meeting, AgentError> {
        details.validate(self.settings.max_auto_close_minutes)?;
        self.cancel_meeting(&CancelDetails {
            start_time: Some(previous_start_time.clone()),
        })
        .await?;
        self.schedule_meeting(details).await
    }

    pub async fn meetings(&self) -> Result<Vec<Meeting>, AgentError> {
        Ok(self.state.load().await?.meetings)
    }

    pub async fn error_logs(&self) -> Result<Vec<ErrorLogEntry>, AgentError> {
        Ok(self.error_log.entries().await?)
    }

    pub async fn clear_error_logs(&self) -> Result<(), AgentError> {
        Ok(self.error_log.clear().await?)
    }

    /// Records an error reported from a meeting page.
    pub async fn log_error(&self, message: &str, platform: Option<&str>, url: Option<&str>) {
        let mut line = match platform {
            Some(p) => format!("[{}] {}", p.to_uppercase(), message),
            None => message.to_string(),
        };
        if let Some(url) = url {
            line.push_str(&format!(" ({})", url));
        }
        self.error_log.record(Severity::Error, &line, true).await;
    }

    // ----- reconciliation -----

    /// Opens tabs for every eligible meeting, completes meetings that ran out of
    /// tab opens, and prunes meetings past retention.
    pub async fn reconcile(&self) -> Result<ReconcileReport, AgentError> {
        let check = self.network.check_cached().await;
        if !check.reachable {
            log::info!("Skipping missed-meeting check: network unavailable");
            return Ok(ReconcileReport::offline());
        }

        let mut state = self.state.load().await?;
        let now = self.clock.now_ms();
        let window = self.settings.join_window_ms();
        let mut report = ReconcileReport::default();
        let mut changed = false;

        for i in 0..state.meetings.len() {
            if !state.meetings[i].is_eligible(now, window, &state.attempts) {
                continue;
            }
            let id = state.meetings[i].meeting_id();

            if state.meetings[i].join_attempts >= self.settings.max_join_attempts {
                state.meetings[i].completed = true;
                changed = true;
                self.error_log
                    .warn(&format!(
                        "Max join attempts reached for meeting {}, giving up",
                        id
                    ))
                    .await;
                report.exhausted.push(id);
                continue;
            }

            let link = state.meetings[i].link.clone();
            let start_time = state.meetings[i].start_time;
            log::info!(
                "Joining missed meeting {} (started {})",
                id,
                format_local(start_time)
            );
            state.meetings[i].join_attempts += 1;
            changed = true;
            match self.browser.open_tab(&link).await {
                Ok(()) => {
                    state
                        .attempts
                        .insert(id.clone(), ActiveJoinAttempt::new(start_time, now));
                    report.opened.push(id);
                }
                Err(e) => {
                    self.error_log
                        .error(&format!("Failed to open meeting {}: {}", link, e))
                        .await;
                }
            }
        }

        let cutoff = now - self.settings.retention_ms();
        let before = state.meetings.len();
        state.meetings.retain(|m| m.start_time >= cutoff);
        report.pruned = before - state.meetings.len();
        if report.pruned > 0 {
            log::info!("Pruned {} meetings older than retention", report.pruned);
            changed = true;
        }

        if changed {
            self.state.persist(&state).await?;
        }
        Ok(report)
    }

    /// Drops join attempts whose tab never reported back.
    pub async fn sweep_stale_attempts(&self) -> Result<usize, AgentError> {
        let mut state = self.state.load().await?;
        let now = self.clock.now_ms();
        let stale_ms = self.settings.stale_attempt_ms();
        let before = state.attempts.len();
        state.attempts.retain(|id, attempt| {
            let stale = attempt.is_stale(now, stale_ms);
            if stale {
                log::info!("Dropping stale join attempt for meeting {}", id);
            }
            !stale
        });
        let removed = before - state.attempts.len();
        if removed > 0 {
            self.state.persist(&state).await?;
        }
        Ok(removed)
    }

    /// Fresh probe; a transition back to reachable triggers one extra pass.
    pub async fn check_network(&self) -> Result<NetworkCheck, AgentError> {
        let check = self.network.check().await;
        if check.restored {
            log::info!("Network restored, checking for missed meetings");
            self.reconcile().await?;
        }
        Ok(check)
    }

    // ----- alarms -----

    pub async fn on_alarm(&self, name: &str) -> Result<(), AgentError> {
        log::debug!("Alarm fired: {}", name);
        match Alarm::parse(name) {
            Alarm::MeetingStart(t) => self.handle_meeting_start(t).await,
            Alarm::MeetingClose(t) => self.handle_meeting_close(t).await,
            Alarm::RecoveryCheck => self.reconcile().await.map(|_| ()),
            Alarm::NetworkCheck => self.check_network().await.map(|_| ()),
            Alarm::AttemptSweep => self.sweep_stale_attempts().await.map(|_| ()),
            Alarm::Unknown(name) => {
                log::warn!("Ignoring unknown alarm {}", name);
                Ok(())
            }
        }
    }

    async fn handle_meeting_start(&self, start_time: i64) -> Result<(), AgentError> {
        let check = match self.network.require_reachable().await {
            Ok(check) => check,
            Err(e) => {
                self.error_log
                    .warn(&format!(
                        "{} when meeting at {} was due; will retry when it returns",
                        e,
                        format_local(start_time)
                    ))
                    .await;
                return Ok(());
            }
        };
        if check.restored {
            self.reconcile().await?;
        }

        let mut state = self.state.load().await?;
        let now = self.clock.now_ms();
        let Some(idx) = state.meetings.iter().position(|m| m.start_time == start_time) else {
            log::warn!("No meeting found for start alarm at {}", start_time);
            return Ok(());
        };
        let id = state.meetings[idx].meeting_id();

        if state.meetings[idx].completed || state.meetings[idx].joined {
            log::info!("Meeting {} already joined or completed, skipping", id);
            return Ok(());
        }
        if state.attempts.contains_key(&id) {
            log::info!("Join already in progress for meeting {}, skipping", id);
            return Ok(());
        }

        let meeting = &mut state.meetings[idx];
        if meeting.join_attempts >= self.settings.max_join_attempts {
            meeting.completed = true;
            self.state.persist(&state).await?;
            self.error_log
                .warn(&format!("Max join attempts reached for meeting {}, giving up", id))
                .await;
            return Ok(());
        }

        meeting.join_attempts += 1;
        let link = meeting.link.clone();
        log::info!("Meeting {} is starting, opening {}", id, link);
        match self.browser.open_tab(&link).await {
            Ok(()) => {
                state
                    .attempts
                    .insert(id, ActiveJoinAttempt::new(start_time, now));
            }
            Err(e) => {
                self.error_log
                    .error(&format!("Failed to open meeting {}: {}", link, e))
                    .await;
            }
        }
        self.state.persist(&state).await?;
        Ok(())
    }

    async fn handle_meeting_close(&self, start_time: i64) -> Result<(), AgentError> {
        let mut state = self.state.load().await?;
        let Some(meeting) = state.meeting_by_start_mut(start_time) else {
            log::info!("No meeting found for close alarm at {}", start_time);
            return Ok(());
        };

        match meeting.platform().close_pattern(&meeting.link) {
            Some(pattern) => match self.browser.close_tabs(&pattern).await {
                Ok(closed) => log::info!("Closed {} tabs matching {}", closed, pattern),
                Err(e) => {
                    self.error_log
                        .error(&format!("Failed to close tabs for {}: {}", meeting.link, e))
                        .await
                }
            },
            None => log::warn!("No tab pattern for meeting link {}", meeting.link),
        }
        self.notifier
            .notify(CLOSE_NOTIFICATION_TITLE, CLOSE_NOTIFICATION_MESSAGE)
            .await;

        meeting.completed = true;
        let id = meeting.meeting_id();
        state.attempts.remove(&id);
        self.state.persist(&state).await?;
        log::info!("Meeting {} auto-closed", id);
        Ok(())
    }

    // ----- detector reports -----

    /// Applies a status report from a join detector.
    ///
    /// A failure only bumps the attempt's own counter and drops the attempt once it
    /// reaches the limit; the meeting itself stays open and becomes eligible again.
    pub async fn on_join_status(&self, report: &JoinStatusReport) -> Result<(), AgentError> {
        let id = crate::meeting::meeting_id_from_url(&report.url);
        let mut state = self.state.load().await?;
        let now = self.clock.now_ms();

        match report.status {
            JoinStatus::Joined => {
                state.attempts.remove(&id);
                match state
                    .meetings
                    .iter_mut()
                    .find(|m| m.link == report.url && !m.joined)
                {
                    Some(meeting) => {
                        meeting.joined = true;
                        meeting.joined_at = Some(now);
                        log::info!("Joined meeting {}", id);
                    }
                    None => log::warn!("Join reported for unknown meeting {}", report.url),
                }
            }
            JoinStatus::Failed => {
                let reason = report.reason.as_deref().unwrap_or("unknown");
                self.error_log
                    .warn(&format!("Join attempt failed for {}: {}", report.url, reason))
                    .await;
                if let Some(attempt) = state.attempts.get_mut(&id) {
                    attempt.attempts += 1;
                    if attempt.attempts >= self.settings.max_join_attempts {
                        state.attempts.remove(&id);
                        log::warn!("Max failed reports for meeting {}, releasing attempt", id);
                    }
                }
            }
        }

        self.state.persist(&state).await?;
        Ok(())
    }

}
