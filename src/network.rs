use crate::clock::Clock;
use crate::error::AgentError;
use crate::settings::NetworkSettings;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Timeout,
    Request(String),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout => f.write_str("probe timed out"),
            ProbeFailure::Request(e) => write!(f, "probe failed: {}", e),
        }
    }
}

/// Answers "can we reach the outside world right now".
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn probe(&self) -> Result<(), ProbeFailure>;
}

/// Fetches a small well-known resource with caching disabled. Any HTTP response
/// counts as reachable; timeouts and transport errors do not.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(settings: &NetworkSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.probe_timeout())
            .build()?;
        Ok(Self {
            client,
            url: settings.probe_url.clone(),
        })
    }
}

#[async_trait]
impl Connectivity for HttpProbe {
    async fn probe(&self) -> Result<(), ProbeFailure> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .header(reqwest::header::PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeFailure::Timeout
                } else {
                    ProbeFailure::Request(e.to_string())
                }
            })?;
        log::debug!("Network probe answered with {}", response.status());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCheck {
    pub reachable: bool,
    /// True only on the first reachable check after an unreachable one
    pub restored: bool,
}

#[derive(Debug, Default)]
struct MonitorState {
    recovery_mode: bool,
    last: Option<(i64, bool)>,
}

/// Tracks reachability over time. Leaving recovery mode is reported once.
pub struct NetworkMonitor {
    probe: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    cache_ms: i64,
    state: Mutex<MonitorState>,
}

impl NetworkMonitor {
    pub fn new(probe: Arc<dyn Connectivity>, clock: Arc<dyn Clock>, settings: &NetworkSettings) -> Self {
        Self {
            probe,
            clock,
            cache_ms: settings.probe_cache_ms(),
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Runs a fresh probe.
    pub async fn check(&self) -> NetworkCheck {
        let result = self.probe.probe().await;
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        match result {
            Ok(()) => {
                let restored = state.recovery_mode;
                if restored {
                    log::info!("Network connection restored");
                }
                state.recovery_mode = false;
                state.last = Some((now, true));
                NetworkCheck {
                    reachable: true,
                    restored,
                }
            }
            Err(failure) => {
                if !state.recovery_mode {
                    log::warn!("Network unreachable, entering recovery mode: {}", failure);
                } else {
                    log::debug!("Network still unreachable: {}", failure);
                }
                state.recovery_mode = true;
                state.last = Some((now, false));
                NetworkCheck {
                    reachable: false,
                    restored: false,
                }
            }
        }
    }

    /// Fresh check that treats an unreachable network as an error.
    pub async fn require_reachable(&self) -> Result<NetworkCheck, AgentError> {
        let check = self.check().await;
        if check.reachable {
            Ok(check)
        } else {
            Err(AgentError::NetworkUnavailable)
        }
    }

    /// Reuses a probe result younger than the cache window.
    pub async fn check_cached(&self) -> NetworkCheck {
        {
            let state = self.state.lock().await;
            if let Some((at, reachable)) = state.last {
                if self.clock.now_ms() - at < self.cache_ms {
                    return NetworkCheck {
                        reachable,
                        restored: false,
                    };
                }
            }
        }
        self.check().await
    }

    /// Forces the next probe to run fresh and report a restore if it succeeds.
    pub async fn enter_recovery_mode(&self) {
        let mut state = self.state.lock().await;
        state.recovery_mode = true;
        state.last = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Connectivity double that replays scripted results, then repeats the fallback.
    pub(crate) struct ScriptedConnectivity {
        script: std::sync::Mutex<VecDeque<bool>>,
        fallback: std::sync::atomic::AtomicBool,
        pub probes: AtomicUsize,
    }

    impl ScriptedConnectivity {
        pub(crate) fn always(reachable: bool) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(VecDeque::new()),
                fallback: std::sync::atomic::AtomicBool::new(reachable),
                probes: AtomicUsize::new(0),
            })
        }

        pub(crate) fn set(&self, reachable: bool) {
            self.fallback.store(reachable, Ordering::SeqCst);
        }

        pub(crate) fn push(&self, reachable: bool) {
            self.script.lock().unwrap().push_back(reachable);
        }
    }

    #[async_trait]
    impl Connectivity for ScriptedConnectivity {
        async fn probe(&self) -> Result<(), ProbeFailure> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.load(Ordering::SeqCst));
            if next {
                Ok(())
            } else {
                Err(ProbeFailure::Request("scripted".to_string()))
            }
        }
    }

    fn settings_for(url: String) -> NetworkSettings {
        NetworkSettings {
            probe_url: url,
            probe_timeout_seconds: 1,
            probe_cache_seconds: 60,
        }
    }

    #[tokio::test]
    async fn test_http_probe_reachable_with_no_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/favicon.ico"))
            .and(header("cache-control", "no-store"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let probe = HttpProbe::new(&settings_for(format!("{}/favicon.ico", server.uri()))).unwrap();
        assert_eq!(probe.probe().await, Ok(()));
    }

    #[tokio::test]
    async fn test_http_probe_error_status_still_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let probe = HttpProbe::new(&settings_for(server.uri())).unwrap();
        assert!(probe.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_http_probe_timeout_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;
        let probe = HttpProbe::new(&settings_for(server.uri())).unwrap();
        assert_eq!(probe.probe().await, Err(ProbeFailure::Timeout));
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused() {
        let probe = HttpProbe::new(&settings_for("http://127.0.0.1:9/".to_string())).unwrap();
        assert!(matches!(probe.probe().await, Err(ProbeFailure::Request(_))));
    }

    #[tokio::test]
    async fn test_restore_is_edge_triggered() {
        let probe = ScriptedConnectivity::always(true);
        let clock = Arc::new(ManualClock::new(0));
        let monitor = NetworkMonitor::new(probe.clone(), clock, &NetworkSettings::default());

        assert_eq!(
            monitor.check().await,
            NetworkCheck { reachable: true, restored: false }
        );

        probe.set(false);
        assert!(!monitor.check().await.reachable);
        assert!(!monitor.check().await.reachable);

        probe.set(true);
        assert_eq!(
            monitor.check().await,
            NetworkCheck { reachable: true, restored: true }
        );
        assert_eq!(
            monitor.check().await,
            NetworkCheck { reachable: true, restored: false }
        );
    }

    #[tokio::test]
    async fn test_require_reachable_maps_outage_to_error() {
        let link = ScriptedConnectivity::always(false);
        let monitor = NetworkMonitor::new(
            link.clone(),
            Arc::new(ManualClock::new(0)),
            &NetworkSettings::default(),
        );

        let err = monitor.require_reachable().await.unwrap_err();
        assert!(matches!(err, AgentError::NetworkUnavailable));
        assert!(err.is_retryable());

        link.set(true);
        assert_eq!(
            monitor.require_reachable().await.unwrap(),
            NetworkCheck { reachable: true, restored: true }
        );
    }

    #[tokio::test]
    async fn test_cached_result_expires() {
        let probe = ScriptedConnectivity::always(true);
        let clock = Arc::new(ManualClock::new(0));
        let monitor = NetworkMonitor::new(probe.clone(), clock.clone(), &NetworkSettings::default());

        monitor.check_cached().await;
        monitor.check_cached().await;
        assert_eq!(probe.probes.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        monitor.check_cached().await;
        assert_eq!(probe.probes.load(Ordering::SeqCst), 2);

        monitor.enter_recovery_mode().await;
        let check = monitor.check_cached().await;
        assert!(check.restored);
        assert_eq!(probe.probes.load(Ordering::SeqCst), 3);
    }
}
