use crate::clock::Clock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const MEETING_START_PREFIX: &str = "meetingStart_";
pub const MEETING_CLOSE_PREFIX: &str = "meetingClose_";
pub const RECOVERY_CHECK: &str = "recoveryCheck";
pub const NETWORK_CHECK: &str = "networkCheck";
pub const ATTEMPT_SWEEP: &str = "joinAttemptSweep";

/// A named timer. Meeting alarms carry the meeting's start time in their name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alarm {
    MeetingStart(i64),
    MeetingClose(i64),
    RecoveryCheck,
    NetworkCheck,
    AttemptSweep,
    Unknown(String),
}

impl Alarm {
    pub fn parse(name: &str) -> Self {
        if let Some(t) = name.strip_prefix(MEETING_START_PREFIX) {
            if let Ok(t) = t.parse() {
                return Alarm::MeetingStart(t);
            }
        }
        if let Some(t) = name.strip_prefix(MEETING_CLOSE_PREFIX) {
            if let Ok(t) = t.parse() {
                return Alarm::MeetingClose(t);
            }
        }
        match name {
            RECOVERY_CHECK => Alarm::RecoveryCheck,
            NETWORK_CHECK => Alarm::NetworkCheck,
            ATTEMPT_SWEEP => Alarm::AttemptSweep,
            other => Alarm::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Alarm::MeetingStart(t) => format!("{}{}", MEETING_START_PREFIX, t),
            Alarm::MeetingClose(t) => format!("{}{}", MEETING_CLOSE_PREFIX, t),
            Alarm::RecoveryCheck => RECOVERY_CHECK.to_string(),
            Alarm::NetworkCheck => NETWORK_CHECK.to_string(),
            Alarm::AttemptSweep => ATTEMPT_SWEEP.to_string(),
            Alarm::Unknown(name) => name.clone(),
        }
    }

    /// Recurring housekeeping alarms survive an update-time clear.
    pub fn is_recurring(&self) -> bool {
        matches!(
            self,
            Alarm::RecoveryCheck | Alarm::NetworkCheck | Alarm::AttemptSweep
        )
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Creating an alarm whose name already exists replaces it.
pub trait AlarmScheduler: Send + Sync {
    /// Fires once at `when_ms` (epoch ms), or as soon as possible if that is past.
    fn create_at(&self, alarm: &Alarm, when_ms: i64);
    /// Fires every `period`, first after one period.
    fn create_periodic(&self, alarm: &Alarm, period: Duration);
    /// Returns true if an alarm with that name was pending.
    fn clear(&self, name: &str) -> bool;
    /// Names of pending alarms.
    fn names(&self) -> Vec<String>;
}

/// Alarms backed by tokio timers. Fired alarm names are sent on a channel.
pub struct TokioAlarms {
    tx: mpsc::UnboundedSender<String>,
    clock: Arc<dyn Clock>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioAlarms {
    pub fn new(clock: Arc<dyn Clock>) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                clock,
                handles: Mutex::new(HashMap::new()),
            }),
            rx,
        )
    }

    fn install(&self, name: String, handle: JoinHandle<()>) {
        match self.handles.lock() {
            Ok(mut handles) => {
                handles.retain(|_, h| !h.is_finished());
                if let Some(previous) = handles.insert(name, handle) {
                    previous.abort();
                }
            }
            Err(_) => {
                log::error!("Alarm registry lock poisoned; dropping alarm {}", name);
                handle.abort();
            }
        }
    }
}

impl AlarmScheduler for TokioAlarms {
    fn create_at(&self, alarm: &Alarm, when_ms: i64) {
        let name = alarm.name();
        let delay = Duration::from_millis((when_ms - self.clock.now_ms()).max(0) as u64);
        let tx = self.tx.clone();
        let fired = name.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        });
        log::debug!("Alarm {} set to fire in {:?}", name, delay);
        self.install(name, handle);
    }

    fn create_periodic(&self, alarm: &Alarm, period: Duration) {
        let name = alarm.name();
        let tx = self.tx.clone();
        let fired = name.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(fired.clone()).is_err() {
                    break;
                }
            }
        });
        log::debug!("Periodic alarm {} set every {:?}", name, period);
        self.install(name, handle);
    }

    fn clear(&self, name: &str) -> bool {
        let Ok(mut handles) = self.handles.lock() else {
            return false;
        };
        match handles.remove(name) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    fn names(&self) -> Vec<String> {
        let Ok(handles) = self.handles.lock() else {
            return Vec::new();
        };
        let mut names: Vec<String> = handles
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Drop for TokioAlarms {
    fn drop(&mut self) {
        if let Ok(handles) = self.handles.get_mut() {
            for (_, handle) in handles.drain() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_alarm_names_roundtrip() {
        for alarm in [
            Alarm::MeetingStart(1_700_000_000_000),
            Alarm::MeetingClose(5),
            Alarm::RecoveryCheck,
            Alarm::NetworkCheck,
            Alarm::AttemptSweep,
        ] {
            assert_eq!(Alarm::parse(&alarm.name()), alarm);
        }
        assert_eq!(Alarm::MeetingStart(42).name(), "meetingStart_42");
        assert_eq!(
            Alarm::parse("meetingStart_abc"),
            Alarm::Unknown("meetingStart_abc".to_string())
        );
        assert!(Alarm::NetworkCheck.is_recurring());
        assert!(!Alarm::MeetingClose(1).is_recurring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once_at_time() {
        let clock = Arc::new(ManualClock::new(10_000));
        let (alarms, mut rx) = TokioAlarms::new(clock);

        alarms.create_at(&Alarm::MeetingStart(70_000), 70_000);
        assert_eq!(alarms.names(), vec!["meetingStart_70000".to_string()]);

        let before = tokio::time::Instant::now();
        assert_eq!(rx.recv().await.unwrap(), "meetingStart_70000");
        assert_eq!(before.elapsed(), Duration::from_secs(60));

        tokio::task::yield_now().await;
        assert!(alarms.names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_alarm_fires_immediately() {
        let clock = Arc::new(ManualClock::new(10_000));
        let (alarms, mut rx) = TokioAlarms::new(clock);
        alarms.create_at(&Alarm::MeetingClose(1), 1);
        assert_eq!(rx.recv().await.unwrap(), "meetingClose_1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_and_clear() {
        let clock = Arc::new(ManualClock::new(0));
        let (alarms, mut rx) = TokioAlarms::new(clock);

        alarms.create_at(&Alarm::MeetingStart(5), 5_000);
        alarms.create_at(&Alarm::MeetingStart(5), 9_000);
        alarms.create_at(&Alarm::MeetingClose(5), 20_000);
        assert!(alarms.clear("meetingClose_5"));
        assert!(!alarms.clear("meetingClose_5"));

        assert_eq!(rx.recv().await.unwrap(), "meetingStart_5");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_repeats() {
        let clock = Arc::new(ManualClock::new(0));
        let (alarms, mut rx) = TokioAlarms::new(clock);
        alarms.create_periodic(&Alarm::RecoveryCheck, Duration::from_secs(60));

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            assert_eq!(rx.recv().await.unwrap(), "recoveryCheck");
        }
        assert_eq!(start.elapsed(), Duration::from_secs(180));
        assert_eq!(alarms.names(), vec!["recoveryCheck".to_string()]);
    }
}
