use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    #[serde(default = "default_join_window_minutes")]
    pub join_window_minutes: u64,
    #[serde(default = "default_max_join_attempts")]
    pub max_join_attempts: u32,
    #[serde(default = "default_stale_attempt_minutes")]
    pub stale_attempt_minutes: u64,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_recovery_check_minutes")]
    pub recovery_check_minutes: u64,
    #[serde(default = "default_network_check_minutes")]
    pub network_check_minutes: u64,
    #[serde(default = "default_attempt_sweep_minutes")]
    pub attempt_sweep_minutes: u64,
    #[serde(default = "default_max_auto_close_minutes")]
    pub max_auto_close_minutes: i64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_wake_poll_seconds")]
    pub wake_poll_seconds: u64,
    #[serde(default = "default_wake_jump_seconds")]
    pub wake_jump_seconds: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkSettings {
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,
    /// A probe younger than this is reused by reconciliation passes
    #[serde(default = "default_probe_cache_seconds")]
    pub probe_cache_seconds: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorLogSettings {
    #[serde(default = "default_error_log_capacity")]
    pub capacity: usize,
    #[serde(default = "default_error_log_retention_days")]
    pub retention_days: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_long_poll_ms")]
    pub long_poll_ms: u64,
    #[serde(default = "default_detector_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_join_budget_seconds")]
    pub join_budget_seconds: u64,
    #[serde(default = "default_page_load_timeout_seconds")]
    pub page_load_timeout_seconds: u64,
    #[serde(default = "default_network_issue_threshold")]
    pub network_issue_threshold: u32,
    #[serde(default = "default_network_check_seconds")]
    pub network_check_seconds: u64,
    #[serde(default = "default_reload_delay_ms")]
    pub reload_delay_ms: u64,
}

/// Everything stored in `settings.toml`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentSettings {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Program (plus arguments) used to open meeting tabs. The URL is appended.
    #[serde(default)]
    pub browser_command: Option<String>,
    #[serde(default)]
    pub strategies_path: Option<PathBuf>,
    #[serde(default = "default_scheduler_settings")]
    pub scheduler: SchedulerSettings,
    #[serde(default = "default_network_settings")]
    pub network: NetworkSettings,
    #[serde(default = "default_error_log_settings")]
    pub error_log: ErrorLogSettings,
    #[serde(default = "default_detector_settings")]
    pub detector: DetectorSettings,
}

fn default_join_window_minutes() -> u64 { 30 }
fn default_max_join_attempts() -> u32 { 5 }
fn default_stale_attempt_minutes() -> u64 { 10 }
fn default_retention_hours() -> u64 { 24 }
fn default_recovery_check_minutes() -> u64 { 1 }
fn default_network_check_minutes() -> u64 { 5 }
fn default_attempt_sweep_minutes() -> u64 { 5 }
fn default_max_auto_close_minutes() -> i64 { 1440 }
fn default_request_timeout_seconds() -> u64 { 10 }
fn default_wake_poll_seconds() -> u64 { 60 }
fn default_wake_jump_seconds() -> u64 { 300 }

fn default_probe_url() -> String {
    "https://www.google.com/favicon.ico".to_string()
}

fn default_probe_timeout_seconds() -> u64 { 5 }
fn default_probe_cache_seconds() -> u64 { 60 }

fn default_error_log_capacity() -> usize { 100 }
fn default_error_log_retention_days() -> u64 { 7 }

fn default_tick_ms() -> u64 { 3_000 }
fn default_initial_delay_ms() -> u64 { 3_000 }
fn default_long_poll_ms() -> u64 { 10_000 }
fn default_detector_max_attempts() -> u32 { 20 }
fn default_initial_backoff_ms() -> u64 { 1_000 }
fn default_max_backoff_ms() -> u64 { 30_000 }
fn default_join_budget_seconds() -> u64 { 300 }
fn default_page_load_timeout_seconds() -> u64 { 60 }
fn default_network_issue_threshold() -> u32 { 5 }
fn default_network_check_seconds() -> u64 { 30 }
fn default_reload_delay_ms() -> u64 { 2_000 }

fn default_scheduler_settings() -> SchedulerSettings {
    SchedulerSettings {
        join_window_minutes: default_join_window_minutes(),
        max_join_attempts: default_max_join_attempts(),
        stale_attempt_minutes: default_stale_attempt_minutes(),
        retention_hours: default_retention_hours(),
        recovery_check_minutes: default_recovery_check_minutes(),
        network_check_minutes: default_network_check_minutes(),
        attempt_sweep_minutes: default_attempt_sweep_minutes(),
        max_auto_close_minutes: default_max_auto_close_minutes(),
        request_timeout_seconds: default_request_timeout_seconds(),
        wake_poll_seconds: default_wake_poll_seconds(),
        wake_jump_seconds: default_wake_jump_seconds(),
    }
}

fn default_network_settings() -> NetworkSettings {
    NetworkSettings {
        probe_url: default_probe_url(),
        probe_timeout_seconds: default_probe_timeout_seconds(),
        probe_cache_seconds: default_probe_cache_seconds(),
    }
}

fn default_error_log_settings() -> ErrorLogSettings {
    ErrorLogSettings {
        capacity: default_error_log_capacity(),
        retention_days: default_error_log_retention_days(),
    }
}

fn default_detector_settings() -> DetectorSettings {
    DetectorSettings {
        tick_ms: default_tick_ms(),
        initial_delay_ms: default_initial_delay_ms(),
        long_poll_ms: default_long_poll_ms(),
        max_attempts: default_detector_max_attempts(),
        initial_backoff_ms: default_initial_backoff_ms(),
        max_backoff_ms: default_max_backoff_ms(),
        join_budget_seconds: default_join_budget_seconds(),
        page_load_timeout_seconds: default_page_load_timeout_seconds(),
        network_issue_threshold: default_network_issue_threshold(),
        network_check_seconds: default_network_check_seconds(),
        reload_delay_ms: default_reload_delay_ms(),
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        default_scheduler_settings()
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        default_network_settings()
    }
}

impl Default for ErrorLogSettings {
    fn default() -> Self {
        default_error_log_settings()
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        default_detector_settings()
    }
}

impl NetworkSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds.max(1))
    }

    pub fn probe_cache_ms(&self) -> i64 {
        (self.probe_cache_seconds as i64) * 1000
    }
}

impl ErrorLogSettings {
    pub fn retention_ms(&self) -> i64 {
        minutes_to_ms(self.retention_days * 24 * 60)
    }
}

impl SchedulerSettings {
    pub fn join_window_ms(&self) -> i64 {
        minutes_to_ms(self.join_window_minutes)
    }

    pub fn stale_attempt_ms(&self) -> i64 {
        minutes_to_ms(self.stale_attempt_minutes)
    }

    pub fn retention_ms(&self) -> i64 {
        minutes_to_ms(self.retention_hours * 60)
    }

    pub fn recovery_check_period(&self) -> Duration {
        Duration::from_secs(self.recovery_check_minutes.max(1) * 60)
    }

    pub fn network_check_period(&self) -> Duration {
        Duration::from_secs(self.network_check_minutes.max(1) * 60)
    }

    pub fn attempt_sweep_period(&self) -> Duration {
        Duration::from_secs(self.attempt_sweep_minutes.max(1) * 60)
    }
}

impl DetectorSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(100))
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }

    pub fn join_budget(&self) -> Duration {
        Duration::from_secs(self.join_budget_seconds)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_seconds)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn long_poll(&self) -> Duration {
        Duration::from_millis(self.long_poll_ms.max(100))
    }

    pub fn network_check_period(&self) -> Duration {
        Duration::from_secs(self.network_check_seconds.max(1))
    }

    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }
}

fn minutes_to_ms(minutes: u64) -> i64 {
    (minutes as i64) * 60 * 1000
}

pub const SETTINGS_FILE_NAME: &str = "settings.toml";
pub const DATABASE_FILE_NAME: &str = "automeet.sqlite";

pub fn get_default_settings() -> AgentSettings {
    AgentSettings {
        data_dir: None,
        browser_command: None,
        strategies_path: None,
        scheduler: default_scheduler_settings(),
        network: default_network_settings(),
        error_log: default_error_log_settings(),
        detector: default_detector_settings(),
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        get_default_settings()
    }
}

impl AgentSettings {
    /// Directory holding the durable store; falls back to the platform data dir
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_local_dir()
            .ok_or_else(|| anyhow!("Could not determine local data directory"))?;
        Ok(base.join("AutoMeet"))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_data_dir()?.join(DATABASE_FILE_NAME))
    }

    /// Browser program and leading arguments, if one is configured
    pub fn browser_argv(&self) -> Option<Vec<String>> {
        let argv: Vec<String> = self
            .browser_command
            .as_deref()?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if argv.is_empty() {
            None
        } else {
            Some(argv)
        }
    }
}

pub fn default_config_dir() -> Result<PathBuf> {
    let base =
        dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
    Ok(base.join("AutoMeet"))
}

pub fn default_settings_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(SETTINGS_FILE_NAME))
}

pub fn load_or_create_settings(path: &Path) -> AgentSettings {
    let settings = match fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<AgentSettings>(&contents) {
            Ok(settings) => {
                log::debug!("Found existing settings: {:?}", settings);
                settings
            }
            Err(e) => {
                log::warn!("Failed to parse settings {}: {}", path.display(), e);
                // Fall back to default settings if parsing fails
                let default_settings = get_default_settings();
                if let Err(e) = write_settings(path, &default_settings) {
                    log::warn!("Failed to store default settings: {}", e);
                }
                default_settings
            }
        },
        Err(_) => {
            let default_settings = get_default_settings();
            if let Err(e) = write_settings(path, &default_settings) {
                log::warn!("Failed to store default settings: {}", e);
            }
            default_settings
        }
    };

    settings
}

pub fn write_settings(path: &Path, settings: &AgentSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, toml::to_string_pretty(settings)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_documented_constants() {
        let s = get_default_settings();
        assert_eq!(s.scheduler.join_window_ms(), 30 * 60 * 1000);
        assert_eq!(s.scheduler.max_join_attempts, 5);
        assert_eq!(s.scheduler.stale_attempt_ms(), 10 * 60 * 1000);
        assert_eq!(s.scheduler.retention_ms(), 24 * 60 * 60 * 1000);
        assert_eq!(s.error_log.capacity, 100);
        assert_eq!(s.detector.max_attempts, 20);
        assert_eq!(s.detector.max_backoff(), Duration::from_secs(30));
        assert_eq!(s.network.probe_timeout_seconds, 5);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(SETTINGS_FILE_NAME);

        let settings = load_or_create_settings(&path);
        assert_eq!(settings, get_default_settings());
        assert!(path.exists());
        assert_eq!(load_or_create_settings(&path), settings);
    }

    #[test]
    fn test_partial_file_keeps_field_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE_NAME);
        fs::write(
            &path,
            "browser_command = \"chromium --new-window\"\n[scheduler]\njoin_window_minutes = 45\n",
        )
        .unwrap();

        let settings = load_or_create_settings(&path);
        assert_eq!(settings.scheduler.join_window_minutes, 45);
        assert_eq!(settings.scheduler.max_join_attempts, 5);
        assert_eq!(settings.detector, DetectorSettings::default());
        assert_eq!(
            settings.browser_argv(),
            Some(vec!["chromium".to_string(), "--new-window".to_string()])
        );
    }

    #[test]
    fn test_unparseable_file_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "scheduler = [not toml").unwrap();

        let settings = load_or_create_settings(&path);
        assert_eq!(settings, get_default_settings());
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(toml::from_str::<AgentSettings>(&rewritten).is_ok());
    }
}
