//! Join detector: drives one meeting tab from the pre-join screen into the call.
//!
//! A detector owns a single page lifetime at a time. It clicks through join and
//! dismiss controls on a fixed tick, recognizes the in-call UI, mutes once, and
//! reports exactly one terminal outcome per lifetime. Reloads start a fresh
//! lifetime with all counters reset.

pub mod page;
pub mod reporter;
pub mod selector;
pub mod strategies;

pub use page::{MeetingPage, PageError, PageEvent, ReadyState};
pub use reporter::{FailureReason, StatusReporter};
pub use selector::{Selector, SelectorError};
pub use strategies::{PlatformStrategies, StrategyTable};

use crate::error::AgentError;
use crate::meeting::Platform;
use crate::network::Connectivity;
use crate::settings::DetectorSettings;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Result of a single `attempt_join` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Lifetime already ended
    Finished,
    /// Attempt ceiling hit; failure reported
    Exhausted,
    Throttled,
    NotReady,
    Clicked(Selector),
    NothingToClick,
}

/// How a detector run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorOutcome {
    Joined,
    Failed(FailureReason),
    PageClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Joined,
    Failed(FailureReason),
    Reload(FailureReason),
    Closed,
}

struct Lifetime {
    started: Instant,
    attempts: u32,
    last_attempt: Option<Instant>,
    backoff: Duration,
    network_issues: u32,
    muted: bool,
    page_loaded: bool,
    terminal: Option<Terminal>,
}

impl Lifetime {
    fn new(backoff: Duration) -> Self {
        Self {
            started: Instant::now(),
            attempts: 0,
            last_attempt: None,
            backoff,
            network_issues: 0,
            muted: false,
            page_loaded: false,
            terminal: None,
        }
    }
}

pub struct JoinDetector {
    page: Arc<dyn MeetingPage>,
    reporter: Arc<dyn StatusReporter>,
    connectivity: Option<Arc<dyn Connectivity>>,
    strategies: PlatformStrategies,
    loading: Vec<Selector>,
    poor_connection: Vec<Selector>,
    settings: DetectorSettings,
    platform: Platform,
    url: String,
    tag: String,
    life: Lifetime,
}

impl JoinDetector {
    pub fn new(
        page: Arc<dyn MeetingPage>,
        reporter: Arc<dyn StatusReporter>,
        table: &StrategyTable,
        settings: DetectorSettings,
    ) -> Self {
        let url = page.url();
        let platform = Platform::detect(&url);
        Self {
            page,
            reporter,
            connectivity: None,
            strategies: table.for_platform(platform).clone(),
            loading: table.loading.clone(),
            poor_connection: table.poor_connection.clone(),
            life: Lifetime::new(settings.initial_backoff()),
            settings,
            platform,
            url,
            tag: format!("[{}]", platform.as_str().to_uppercase()),
        }
    }

    /// Enables the periodic reachability check
    pub fn with_connectivity(mut self, probe: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(probe);
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn attempts(&self) -> u32 {
        self.life.attempts
    }

    pub fn backoff(&self) -> Duration {
        self.life.backoff
    }

    pub fn is_joined(&self) -> bool {
        self.life.terminal == Some(Terminal::Joined)
    }

    /// One pass over the join strategies, subject to the attempt ceiling and
    /// the current backoff.
    pub async fn attempt_join(&mut self) -> AttemptOutcome {
        if self.life.terminal.is_some() {
            return AttemptOutcome::Finished;
        }

        if self.life.attempts >= self.settings.max_attempts {
            warn!(
                "{} Max join attempts ({}) reached, giving up",
                self.tag, self.settings.max_attempts
            );
            self.finish_with_failure(FailureReason::MaxAttempts, false)
                .await;
            return AttemptOutcome::Exhausted;
        }

        let now = Instant::now();
        if let Some(last) = self.life.last_attempt {
            if now.duration_since(last) < self.life.backoff {
                return AttemptOutcome::Throttled;
            }
        }
        self.life.last_attempt = Some(now);
        self.life.attempts += 1;
        debug!(
            "{} Join attempt {}/{}",
            self.tag, self.life.attempts, self.settings.max_attempts
        );

        match self.page.ready_state().await {
            Ok(ReadyState::Complete) => {}
            Ok(state) => {
                debug!("{} Page still loading ({:?})", self.tag, state);
                return AttemptOutcome::NotReady;
            }
            Err(PageError::Closed) => {
                self.life.terminal = Some(Terminal::Closed);
                return AttemptOutcome::Finished;
            }
            Err(e) => {
                warn!("{} Could not read page state: {}", self.tag, e);
                return AttemptOutcome::NotReady;
            }
        }

        if self.any_present(&self.loading).await {
            debug!("{} Loading indicator visible, waiting", self.tag);
            return AttemptOutcome::NotReady;
        }

        let outcome = match self.click_first(&self.strategies.join).await {
            Some(selector) => {
                info!("{} Clicked join button: {}", self.tag, selector);
                AttemptOutcome::Clicked(selector)
            }
            None => {
                if let Some(selector) = self.click_first(&self.strategies.dismiss).await {
                    info!("{} Dismissed popup: {}", self.tag, selector);
                }
                AttemptOutcome::NothingToClick
            }
        };

        self.check_network_issues().await;
        outcome
    }

    /// Looks for the in-call UI. The first detection reports the join and mutes.
    pub async fn check_join_status(&mut self) -> bool {
        if self.is_joined() {
            return true;
        }
        if self.life.terminal.is_some() {
            return false;
        }
        if !self.any_present(&self.strategies.in_call).await {
            return false;
        }

        info!("{} Successfully joined meeting", self.tag);
        self.life.terminal = Some(Terminal::Joined);
        if let Err(e) = self.reporter.joined(&self.url).await {
            warn!("{} Could not report join: {}", self.tag, e);
        }
        self.auto_mute().await;
        true
    }

    /// Reports a timeout once the join budget is spent
    pub async fn check_budget(&mut self) -> bool {
        if self.life.terminal.is_some() {
            return false;
        }
        let budget = self.settings.join_budget();
        if self.life.started.elapsed() < budget {
            return false;
        }

        let message = format!(
            "Failed to join meeting after {} minutes of attempts",
            budget.as_secs() / 60
        );
        error!("{} {}", self.tag, message);
        self.reporter
            .log_error(self.platform, &self.url, &message)
            .await;
        self.finish_with_failure(FailureReason::Timeout, false)
            .await;
        true
    }

    /// Page-load watchdog. A page that never completed loading is reported and reloaded.
    pub async fn check_page_load(&mut self) -> bool {
        if self.life.terminal.is_some() || self.life.page_loaded {
            return false;
        }
        match self.page.ready_state().await {
            Ok(ReadyState::Complete) => {
                self.life.page_loaded = true;
                false
            }
            Ok(_) | Err(_) => {
                warn!("{} Page load timeout, reloading", self.tag);
                self.finish_with_failure(FailureReason::PageLoadTimeout, true)
                    .await;
                true
            }
        }
    }

    pub async fn check_connectivity(&mut self) {
        let Some(probe) = self.connectivity.clone() else {
            return;
        };
        if let Err(e) = probe.probe().await {
            warn!("{} Network check failed: {}", self.tag, e);
            self.widen_backoff();
        }
    }

    pub async fn on_event(&mut self, event: PageEvent) {
        match event {
            PageEvent::Online => {
                info!("{} Network connection restored, attempting to rejoin", self.tag);
                self.life.network_issues = 0;
                self.life.backoff = self.settings.initial_backoff();
                self.reevaluate().await;
            }
            PageEvent::Offline => {
                warn!("{} Network connection lost", self.tag);
                self.widen_backoff();
            }
            PageEvent::Visible => {
                if self.life.terminal.is_none() {
                    info!("{} Tab became visible, attempting to join", self.tag);
                    self.reevaluate().await;
                }
            }
            PageEvent::Mutated => self.reevaluate().await,
            PageEvent::Loaded => {
                debug!("{} Page fully loaded", self.tag);
                self.life.page_loaded = true;
            }
        }
    }

    /// Drives the detector until it joins, gives up, or the page goes away.
    /// Events arriving in a burst are handled together, with repeated DOM
    /// mutations collapsed into one re-evaluation.
    pub async fn run(mut self, mut events: mpsc::Receiver<PageEvent>) -> DetectorOutcome {
        info!("{} Initializing auto-join for {}", self.tag, self.url);
        let mut events_open = true;
        loop {
            let terminal = self.run_lifetime(&mut events, &mut events_open).await;
            match terminal {
                Terminal::Joined => return DetectorOutcome::Joined,
                Terminal::Failed(reason) => return DetectorOutcome::Failed(reason),
                Terminal::Closed => return DetectorOutcome::PageClosed,
                Terminal::Reload(reason) => {
                    time::sleep(self.settings.reload_delay()).await;
                    info!("{} Reloading page after {}", self.tag, reason);
                    if let Err(e) = self.page.reload().await {
                        warn!("{} Reload failed: {}", self.tag, e);
                        return DetectorOutcome::Failed(reason);
                    }
                    self.life = Lifetime::new(self.settings.initial_backoff());
                }
            }
        }
    }

    async fn run_lifetime(
        &mut self,
        events: &mut mpsc::Receiver<PageEvent>,
        events_open: &mut bool,
    ) -> Terminal {
        let start = self.life.started;
        let mut tick = time::interval_at(start + self.settings.initial_delay(), self.settings.tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut long_poll = time::interval_at(start + self.settings.long_poll(), self.settings.long_poll());
        long_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let net_period = self.settings.network_check_period();
        let mut net_check = time::interval_at(start + net_period, net_period);
        net_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let watchdog = time::sleep_until(start + self.settings.page_load_timeout());
        tokio::pin!(watchdog);
        let mut watchdog_armed = true;
        let has_probe = self.connectivity.is_some();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.attempt_join().await;
                    self.check_join_status().await;
                }
                _ = long_poll.tick() => {
                    if !self.check_budget().await {
                        self.attempt_join().await;
                        self.check_join_status().await;
                    }
                }
                _ = net_check.tick(), if has_probe => self.check_connectivity().await,
                () = &mut watchdog, if watchdog_armed => {
                    watchdog_armed = false;
                    self.check_page_load().await;
                }
                event = events.recv(), if *events_open => match event {
                    Some(first) => {
                        let mut batch = vec![first];
                        while let Ok(next) = events.try_recv() {
                            batch.push(next);
                        }
                        let mut mutated = false;
                        for event in batch {
                            if event == PageEvent::Mutated {
                                if mutated {
                                    continue;
                                }
                                mutated = true;
                            }
                            self.on_event(event).await;
                            if self.life.terminal.is_some() {
                                break;
                            }
                        }
                    }
                    None => *events_open = false,
                },
            }

            if let Some(terminal) = self.life.terminal {
                return terminal;
            }
        }
    }

    async fn reevaluate(&mut self) {
        self.attempt_join().await;
        self.check_join_status().await;
    }

    async fn auto_mute(&mut self) {
        if self.life.muted {
            return;
        }
        self.life.muted = true;
        if let Some(selector) = self.click_first(&self.strategies.mute_microphone).await {
            info!("{} Microphone muted via {}", self.tag, selector);
        }
        if let Some(selector) = self.click_first(&self.strategies.mute_camera).await {
            info!("{} Camera turned off via {}", self.tag, selector);
        }
    }

    async fn check_network_issues(&mut self) {
        if !self.any_present(&self.poor_connection).await {
            return;
        }
        self.life.network_issues += 1;
        warn!(
            "{} Network issues detected ({}/{})",
            self.tag, self.life.network_issues, self.settings.network_issue_threshold
        );
        if self.life.network_issues >= self.settings.network_issue_threshold {
            self.finish_with_failure(FailureReason::NetworkIssues, true)
                .await;
        } else {
            self.widen_backoff();
        }
    }

    fn widen_backoff(&mut self) {
        self.life.backoff = (self.life.backoff * 2).min(self.settings.max_backoff());
    }

    /// Records the lifetime's single terminal outcome and reports it
    async fn finish_with_failure(&mut self, reason: FailureReason, reload: bool) {
        if self.life.terminal.is_some() {
            return;
        }
        self.life.terminal = Some(if reload {
            Terminal::Reload(reason)
        } else {
            warn!(
                "{} {}",
                self.tag,
                AgentError::DetectionExhausted(reason.to_string())
            );
            Terminal::Failed(reason)
        });
        if let Err(e) = self
            .reporter
            .failed(&self.url, reason, self.life.attempts)
            .await
        {
            warn!("{} Could not report failure {}: {}", self.tag, reason, e);
        }
    }

    async fn click_first(&self, selectors: &[Selector]) -> Option<Selector> {
        for selector in selectors {
            match self.page.click(selector).await {
                Ok(true) => return Some(selector.clone()),
                Ok(false) => {}
                Err(e) => self.strategy_failed(selector, e),
            }
        }
        None
    }

    async fn any_present(&self, selectors: &[Selector]) -> bool {
        for selector in selectors {
            match self.page.exists(selector).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => self.strategy_failed(selector, e),
            }
        }
        false
    }

    fn strategy_failed(&self, selector: &Selector, e: PageError) {
        let err = AgentError::PlatformUi {
            strategy: selector.to_string(),
            message: e.to_string(),
        };
        warn!("{} {}", self.tag, err);
    }
}
